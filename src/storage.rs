use thiserror::Error;

use crate::model::{
    Course, EnrollmentNo, EnrollmentRecord, ListFilter, MarksheetAggregate, MarksheetRow, Page,
};

#[derive(Debug, Error)]
pub enum StorageError {
    /// A natural-key collision. Callers decide what the collision means.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A conditional write found the row changed since it was read.
    #[error("row changed since it was read: {0}")]
    Conflict(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, msg) = &e {
            let extended = code.extended_code;
            if extended == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || extended == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return StorageError::UniqueViolation(
                    msg.clone().unwrap_or_else(|| code.to_string()),
                );
            }
        }
        StorageError::Query(e.to_string())
    }
}

/// Persistence collaborator for the lifecycle engine.
///
/// `put_*` methods insert and must report a key collision as
/// [`StorageError::UniqueViolation`]; `update_*` methods overwrite an existing
/// row in a single write. Marksheet writes are conditional on the state the
/// caller read, so two writers sharing a database cannot undo each other.
pub trait Storage {
    fn get_enrollment(&self, no: &EnrollmentNo) -> Result<Option<EnrollmentRecord>, StorageError>;
    fn put_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StorageError>;
    fn update_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StorageError>;
    fn list_enrollments(&self, filter: &ListFilter)
        -> Result<Page<EnrollmentRecord>, StorageError>;

    fn get_course(&self, code: &str) -> Result<Option<Course>, StorageError>;
    /// Creates or replaces the course definition.
    fn put_course(&self, course: &Course) -> Result<(), StorageError>;

    fn get_aggregate(
        &self,
        no: &EnrollmentNo,
        year: &str,
    ) -> Result<Option<MarksheetAggregate>, StorageError>;
    fn get_aggregate_by_id(&self, id: &str) -> Result<Option<MarksheetAggregate>, StorageError>;
    fn put_aggregate(&self, aggregate: &MarksheetAggregate) -> Result<(), StorageError>;
    /// Overwrites the marksheet only if the stored row still has `read`'s
    /// `updated_at` and `verified`; otherwise [`StorageError::Conflict`].
    fn update_aggregate(
        &self,
        aggregate: &MarksheetAggregate,
        read: &MarksheetAggregate,
    ) -> Result<(), StorageError>;
    /// Flips `verified` from `from` to `!from`. Returns false when the stored
    /// flag was not `from` (or the row is gone) and nothing was written.
    fn set_verified(&self, id: &str, from: bool, updated_at: &str) -> Result<bool, StorageError>;
    fn list_aggregates(&self, filter: &ListFilter) -> Result<Page<MarksheetRow>, StorageError>;
}
