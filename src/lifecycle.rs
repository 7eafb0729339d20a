use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, ValidationError};
use crate::gateway::{DocumentGenerationGateway, GeneratedDocument};
use crate::grade::GradingTable;
use crate::marksheet;
use crate::model::{
    Course, DocType, EnrollmentInput, EnrollmentNo, EnrollmentRecord, ListFilter,
    MarksheetAggregate, MarksheetInput, MarksheetKey, MarksheetRow, MarksheetState, Page,
};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Editing a verified marksheet flips it back to submitted.
    pub reverify_on_edit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationChange {
    pub enrollment: EnrollmentRecord,
    /// False when the enrollment was already in the requested state.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentLookup {
    pub enrollment: EnrollmentRecord,
    pub course: Course,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksheetStatus {
    pub id: String,
    pub enrollment_no: EnrollmentNo,
    pub year: String,
    pub state: MarksheetState,
    pub verified: bool,
    pub generation_eligible: bool,
}

/// Drives enrollments and marksheets through their lifecycle.
///
/// Holds no state of its own between calls: every operation reads fresh
/// from `storage`, checks its guards, and then performs at most one write.
pub struct LifecycleController<S, G> {
    storage: S,
    gateway: G,
    grading: GradingTable,
    options: LifecycleOptions,
}

impl<S: Storage, G: DocumentGenerationGateway> LifecycleController<S, G> {
    pub fn new(storage: S, gateway: G, grading: GradingTable, options: LifecycleOptions) -> Self {
        Self {
            storage,
            gateway,
            grading,
            options,
        }
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn define_course(&self, course: Course) -> EngineResult<Course> {
        let course = course.normalize()?;
        self.storage.put_course(&course)?;
        info!(course = %course.code, subjects = course.subjects.len(), "course defined");
        Ok(course)
    }

    pub fn course(&self, code: &str) -> EngineResult<Course> {
        self.storage
            .get_course(code.trim())?
            .ok_or_else(|| EngineError::not_found("course", code.trim()))
    }

    pub fn register_enrollment(&self, input: EnrollmentInput) -> EngineResult<EnrollmentRecord> {
        let enrollment_no = EnrollmentNo::parse(&input.enrollment_no)?;
        let student_name = required("studentName", &input.student_name)?;
        let guardian_name = required("guardianName", &input.guardian_name)?;
        let center_code = required("centerCode", &input.center_code)?;
        let course_code = required("courseCode", &input.course_code)?;
        let date_of_birth = NaiveDate::parse_from_str(input.date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|_| ValidationError::new("dateOfBirth", "expected YYYY-MM-DD"))?;

        self.course(&course_code)?;

        let record = EnrollmentRecord {
            enrollment_no,
            student_name,
            guardian_name,
            date_of_birth,
            course_code,
            center_code,
            activated: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        match self.storage.put_enrollment(&record) {
            Ok(()) => {}
            Err(StorageError::UniqueViolation(_)) => {
                warn!(enrollment = %record.enrollment_no, "enrollment number already registered");
                return Err(EngineError::DuplicateEnrollment(
                    record.enrollment_no.to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        info!(enrollment = %record.enrollment_no, course = %record.course_code, "enrollment registered");
        Ok(record)
    }

    pub fn enrollment(&self, no: &EnrollmentNo) -> EngineResult<EnrollmentRecord> {
        self.storage
            .get_enrollment(no)?
            .ok_or_else(|| EngineError::not_found("enrollment", no.as_str()))
    }

    /// The enrollment together with the subjects marks must be entered for.
    pub fn lookup_enrollment(&self, no: &EnrollmentNo) -> EngineResult<EnrollmentLookup> {
        let enrollment = self.enrollment(no)?;
        let course = self.course(&enrollment.course_code)?;
        Ok(EnrollmentLookup { enrollment, course })
    }

    pub fn list_enrollments(&self, filter: &ListFilter) -> EngineResult<Page<EnrollmentRecord>> {
        Ok(self.storage.list_enrollments(filter)?)
    }

    /// Sets the activation flag. Requesting the current state succeeds
    /// without writing.
    pub fn set_activated(&self, no: &EnrollmentNo, activated: bool) -> EngineResult<ActivationChange> {
        let mut enrollment = self.enrollment(no)?;
        if enrollment.activated == activated {
            debug!(enrollment = %no, activated, "activation unchanged");
            return Ok(ActivationChange {
                enrollment,
                changed: false,
            });
        }
        enrollment.activated = activated;
        self.storage.update_enrollment(&enrollment)?;
        info!(enrollment = %no, activated, "activation changed");
        Ok(ActivationChange {
            enrollment,
            changed: true,
        })
    }

    pub fn submit(&self, no: &EnrollmentNo, input: &MarksheetInput) -> EngineResult<MarksheetAggregate> {
        let enrollment = self.enrollment(no)?;
        if !enrollment.activated {
            warn!(enrollment = %no, "marks submitted for inactive enrollment");
            return Err(EngineError::EnrollmentNotActive(no.to_string()));
        }
        let course = self.course(&enrollment.course_code)?;
        let aggregate = marksheet::build_aggregate(&enrollment, &course, input, &self.grading)?;

        match self.storage.put_aggregate(&aggregate) {
            Ok(()) => {}
            Err(StorageError::UniqueViolation(_)) => {
                warn!(enrollment = %no, year = %aggregate.year, "duplicate marksheet submission");
                return Err(EngineError::DuplicateSubmission {
                    enrollment_no: no.to_string(),
                    year: aggregate.year,
                });
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            marksheet = %aggregate.id,
            enrollment = %no,
            year = %aggregate.year,
            percentage = aggregate.percentage,
            grade = %aggregate.grade,
            "marksheet submitted"
        );
        Ok(aggregate)
    }

    pub fn marksheet(&self, key: &MarksheetKey) -> EngineResult<MarksheetAggregate> {
        let found = match key {
            MarksheetKey::Id(id) => self.storage.get_aggregate_by_id(id)?,
            MarksheetKey::Natural {
                enrollment_no,
                year,
            } => self.storage.get_aggregate(enrollment_no, year)?,
        };
        found.ok_or_else(|| EngineError::not_found("marksheet", key.to_string()))
    }

    pub fn status(&self, key: &MarksheetKey) -> EngineResult<MarksheetStatus> {
        let m = self.marksheet(key)?;
        Ok(MarksheetStatus {
            state: m.state(),
            verified: m.verified,
            generation_eligible: m.generation_eligible(),
            id: m.id,
            enrollment_no: m.enrollment_no,
            year: m.year,
        })
    }

    pub fn list_marksheets(&self, filter: &ListFilter) -> EngineResult<Page<MarksheetRow>> {
        Ok(self.storage.list_aggregates(filter)?)
    }

    pub fn verify(&self, key: &MarksheetKey) -> EngineResult<MarksheetAggregate> {
        self.set_verified(key, true)
    }

    /// Reopens a verified marksheet for correction.
    pub fn unverify(&self, key: &MarksheetKey) -> EngineResult<MarksheetAggregate> {
        self.set_verified(key, false)
    }

    /// The flag is flipped with a compare-and-set, so a concurrent toggle
    /// makes the loser see the record already in the target state.
    fn set_verified(&self, key: &MarksheetKey, verified: bool) -> EngineResult<MarksheetAggregate> {
        let (event, from) = if verified {
            ("verify", MarksheetState::Verified)
        } else {
            ("unverify", MarksheetState::Submitted)
        };
        let mut m = self.marksheet(key)?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        if m.verified == verified || !self.storage.set_verified(&m.id, !verified, &updated_at)? {
            warn!(marksheet = %m.id, event, "marksheet already {}", from);
            return Err(EngineError::InvalidTransition {
                id: m.id,
                from: from.to_string(),
                event,
            });
        }
        m.verified = verified;
        m.updated_at = updated_at;
        if verified {
            info!(marksheet = %m.id, "marksheet verified");
        } else {
            info!(marksheet = %m.id, "marksheet reopened");
        }
        Ok(m)
    }

    /// Replaces the scores and remarks of a stored marksheet. The year is
    /// part of the natural key and is kept; `input.year` is ignored.
    pub fn edit(&self, key: &MarksheetKey, input: &MarksheetInput) -> EngineResult<MarksheetAggregate> {
        let current = self.marksheet(key)?;
        let enrollment = self.enrollment(&current.enrollment_no)?;
        let course = self.course(&enrollment.course_code)?;

        let rescored = MarksheetInput {
            year: current.year.clone(),
            scores: input.scores.clone(),
            remarks: input.remarks.clone(),
        };
        let marks = marksheet::score_marks(&course, &rescored, &self.grading)?;

        let verified = current.verified && !self.options.reverify_on_edit;
        let updated = MarksheetAggregate {
            scores: marks.scores,
            total_marks: marks.total_marks,
            total_full: marks.total_full,
            percentage: marks.percentage,
            grade: marks.grade,
            remarks: marks.remarks,
            verified,
            updated_at: chrono::Utc::now().to_rfc3339(),
            ..current.clone()
        };
        match self.storage.update_aggregate(&updated, &current) {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                warn!(marksheet = %current.id, "edit lost a race with another writer");
                return Err(EngineError::Conflict(current.id));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            marksheet = %updated.id,
            percentage = updated.percentage,
            grade = %updated.grade,
            verified,
            "marksheet edited"
        );
        Ok(updated)
    }

    /// Hands a verified marksheet to the document gateway. A gateway failure
    /// is returned as-is and leaves the marksheet verified.
    pub fn generate(&self, key: &MarksheetKey, doc_type: DocType) -> EngineResult<GeneratedDocument> {
        let m = self.marksheet(key)?;
        if !m.generation_eligible() {
            warn!(marksheet = %m.id, doc_type = doc_type.as_str(), "generation requested before verification");
            return Err(EngineError::NotVerified(m.id));
        }
        let enrollment = self.enrollment(&m.enrollment_no)?;
        let document = self.gateway.generate(doc_type, &m, &enrollment)?;
        info!(
            marksheet = %m.id,
            doc_type = doc_type.as_str(),
            document = %document.document_id,
            "document generated"
        );
        Ok(document)
    }
}

fn required(field: &str, value: &str) -> Result<String, ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(v.to_string())
}
