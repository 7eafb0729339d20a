use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// A malformed or incomplete field in a request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("enrollment {0} is not active")]
    EnrollmentNotActive(String),

    #[error("a marksheet for enrollment {enrollment_no} and year {year} already exists")]
    DuplicateSubmission { enrollment_no: String, year: String },

    #[error("marksheet {0} is not verified")]
    NotVerified(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("enrollment number {0} is already registered")]
    DuplicateEnrollment(String),

    #[error("cannot {event} marksheet {id} while it is {from}")]
    InvalidTransition {
        id: String,
        from: String,
        event: &'static str,
    },

    #[error("marksheet {0} was changed by another request; reload and retry")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("document generation error: {0}")]
    Gateway(#[from] GatewayError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_failed",
            EngineError::EnrollmentNotActive(_) => "enrollment_not_active",
            EngineError::DuplicateSubmission { .. } => "duplicate_submission",
            EngineError::NotVerified(_) => "not_verified",
            EngineError::NotFound { .. } => "not_found",
            EngineError::DuplicateEnrollment(_) => "duplicate_enrollment",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Conflict(_) => "conflict",
            EngineError::Storage(_) => "storage_failed",
            EngineError::Gateway(_) => "gateway_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation(v) => Some(json!({ "field": v.field, "message": v.message })),
            EngineError::DuplicateSubmission {
                enrollment_no,
                year,
            } => Some(json!({ "enrollmentNo": enrollment_no, "year": year })),
            EngineError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::InvalidTransition { id, from, event } => {
                Some(json!({ "id": id, "from": from, "event": event }))
            }
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
