use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ValidationError;

pub const ENROLLMENT_NO_LEN: usize = 14;

/// Fixed-length alphanumeric enrollment code. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnrollmentNo(String);

impl EnrollmentNo {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let s = raw.trim();
        if s.chars().count() != ENROLLMENT_NO_LEN {
            return Err(ValidationError::new(
                "enrollmentNo",
                format!("must be exactly {} characters", ENROLLMENT_NO_LEN),
            ));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::new(
                "enrollmentNo",
                "must contain only ASCII letters and digits",
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EnrollmentNo {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EnrollmentNo> for String {
    fn from(value: EnrollmentNo) -> Self {
        value.0
    }
}

impl fmt::Display for EnrollmentNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub enrollment_no: EnrollmentNo,
    pub student_name: String,
    pub guardian_name: String,
    pub date_of_birth: NaiveDate,
    pub course_code: String,
    pub center_code: String,
    pub activated: bool,
    pub created_at: String,
}

/// Registration request for a new enrollment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentInput {
    pub enrollment_no: String,
    pub student_name: String,
    pub guardian_name: String,
    pub date_of_birth: String,
    pub course_code: String,
    pub center_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub name: String,
    pub theory_full: u32,
    pub practical_full: u32,
}

impl Subject {
    pub fn full_marks(&self) -> u32 {
        self.theory_full.saturating_add(self.practical_full)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub duration_months: u32,
    pub subjects: Vec<Subject>,
}

impl Course {
    /// Trims names in place and checks the subject list.
    pub fn normalize(mut self) -> Result<Self, ValidationError> {
        self.code = self.code.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.code.is_empty() {
            return Err(ValidationError::new("code", "must not be empty"));
        }
        if self.name.is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }
        if self.subjects.is_empty() {
            return Err(ValidationError::new(
                "subjects",
                "a course needs at least one subject",
            ));
        }
        let mut seen = HashSet::new();
        let mut course_full: u32 = 0;
        for (i, subject) in self.subjects.iter_mut().enumerate() {
            subject.name = subject.name.trim().to_string();
            if subject.name.is_empty() {
                return Err(ValidationError::new(
                    format!("subjects[{}].name", i),
                    "must not be empty",
                ));
            }
            if !seen.insert(subject.name.clone()) {
                return Err(ValidationError::new(
                    format!("subjects[{}].name", i),
                    format!("duplicate subject '{}'", subject.name),
                ));
            }
            let Some(subject_full) = subject.theory_full.checked_add(subject.practical_full)
            else {
                return Err(ValidationError::new(
                    format!("subjects[{}]", i),
                    format!("full marks exceed {}", u32::MAX),
                ));
            };
            if subject_full == 0 {
                return Err(ValidationError::new(
                    format!("subjects[{}]", i),
                    "theory and practical full marks must add up to more than zero",
                ));
            }
            // Totals of every marksheet are bounded by this sum.
            course_full = course_full.checked_add(subject_full).ok_or_else(|| {
                ValidationError::new("subjects", format!("total full marks exceed {}", u32::MAX))
            })?;
        }
        Ok(self)
    }

    pub fn subject_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.subjects.iter().position(|s| s.name == name)
    }

    pub fn total_full(&self) -> u32 {
        self.subjects
            .iter()
            .fold(0u32, |acc, s| acc.saturating_add(s.full_marks()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    pub theory: u32,
    pub practical: u32,
}

impl SubjectScore {
    pub fn total(&self) -> u32 {
        self.theory.saturating_add(self.practical)
    }
}

/// One subject's marks as typed by the operator, before bounds checks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInput {
    pub subject: String,
    pub theory: i64,
    pub practical: i64,
}

/// Everything needed to submit or re-enter one marksheet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksheetInput {
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub scores: Vec<ScoreInput>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Remarks {
    Pass,
    Fail,
}

impl Remarks {
    /// Sentinel the entry form shows before a choice is made.
    pub const UNSET: &'static str = "Select";

    pub fn parse(raw: Option<&str>) -> Result<Self, ValidationError> {
        let s = raw.map(str::trim).unwrap_or("");
        if s.is_empty() || s.eq_ignore_ascii_case(Self::UNSET) {
            return Err(ValidationError::new("remarks", "choose PASS or FAIL"));
        }
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Remarks::Pass),
            "FAIL" => Ok(Remarks::Fail),
            _ => Err(ValidationError::new(
                "remarks",
                format!("unknown remarks '{}'", s),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Remarks::Pass => "PASS",
            Remarks::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksheetAggregate {
    pub id: String,
    pub enrollment_no: EnrollmentNo,
    pub year: String,
    pub scores: Vec<SubjectScore>,
    pub total_marks: u32,
    pub total_full: u32,
    pub percentage: f64,
    pub grade: String,
    pub remarks: Remarks,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl MarksheetAggregate {
    pub fn state(&self) -> MarksheetState {
        if self.verified {
            MarksheetState::Verified
        } else {
            MarksheetState::Submitted
        }
    }

    pub fn generation_eligible(&self) -> bool {
        self.verified
    }
}

/// Persisted lifecycle state. Drafts only exist while a submission is being
/// built and are never stored; a reopened record is stored as `Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarksheetState {
    Submitted,
    Verified,
}

impl fmt::Display for MarksheetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarksheetState::Submitted => write!(f, "submitted"),
            MarksheetState::Verified => write!(f, "verified"),
        }
    }
}

/// How callers address a stored marksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarksheetKey {
    Id(String),
    Natural {
        enrollment_no: EnrollmentNo,
        year: String,
    },
}

impl fmt::Display for MarksheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarksheetKey::Id(id) => f.write_str(id),
            MarksheetKey::Natural {
                enrollment_no,
                year,
            } => write!(f, "{}/{}", enrollment_no, year),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Marksheet,
    Certificate,
}

impl DocType {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "marksheet" => Ok(DocType::Marksheet),
            "certificate" => Ok(DocType::Certificate),
            other => Err(ValidationError::new(
                "docType",
                format!("expected marksheet or certificate, got '{}'", other),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Marksheet => "marksheet",
            DocType::Certificate => "certificate",
        }
    }
}

/// Listing filter shared by enrollments and marksheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    /// Case-insensitive substring of the center code.
    pub center_search: Option<String>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl ListFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

/// Marksheet listing row, joined with the enrollment it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksheetRow {
    pub marksheet: MarksheetAggregate,
    pub enrollment: EnrollmentRecord,
}
