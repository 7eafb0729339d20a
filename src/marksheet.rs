use std::collections::HashSet;

use uuid::Uuid;

use crate::error::ValidationError;
use crate::grade::{self, GradingTable};
use crate::model::{
    Course, EnrollmentRecord, MarksheetAggregate, MarksheetInput, Remarks, ScoreInput,
    SubjectScore,
};

/// Validated scores with their totals and grade; the part of an aggregate
/// that depends only on the input and the course.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMarks {
    pub year: String,
    pub scores: Vec<SubjectScore>,
    pub total_marks: u32,
    pub total_full: u32,
    pub percentage: f64,
    pub grade: String,
    pub remarks: Remarks,
}

/// Runs the marks-entry checks in order (subject coverage, per-field bounds,
/// year, remarks) and computes totals. The first failing check is reported.
pub fn score_marks(
    course: &Course,
    input: &MarksheetInput,
    table: &GradingTable,
) -> Result<ScoredMarks, ValidationError> {
    let slots = check_subject_coverage(course, &input.scores)?;

    let mut ordered: Vec<Option<SubjectScore>> = vec![None; course.subjects.len()];
    for (i, (entry, slot)) in input.scores.iter().zip(slots).enumerate() {
        let subject = &course.subjects[slot];
        let theory = bounded(entry.theory, subject.theory_full, i, "theory")?;
        let practical = bounded(entry.practical, subject.practical_full, i, "practical")?;
        ordered[slot] = Some(SubjectScore {
            subject: subject.name.clone(),
            theory,
            practical,
        });
    }

    let year = input.year.trim();
    if year.is_empty() {
        return Err(ValidationError::new("year", "must not be empty"));
    }

    let remarks = Remarks::parse(input.remarks.as_deref())?;

    let scores: Vec<SubjectScore> = ordered.into_iter().flatten().collect();
    // Each score is bounded by its subject's full marks, and a normalized
    // course keeps their sum within u32.
    let total_marks = scores
        .iter()
        .fold(0u32, |acc, s| acc.saturating_add(s.total()));
    let total_full = course.total_full();
    let outcome = grade::grade_or_sentinel(table, total_marks, total_full);

    Ok(ScoredMarks {
        year: year.to_string(),
        scores,
        total_marks,
        total_full,
        percentage: outcome.percentage,
        grade: outcome.grade,
        remarks,
    })
}

/// Builds a fresh, unverified aggregate for `enrollment`.
pub fn build_aggregate(
    enrollment: &EnrollmentRecord,
    course: &Course,
    input: &MarksheetInput,
    table: &GradingTable,
) -> Result<MarksheetAggregate, ValidationError> {
    let marks = score_marks(course, input, table)?;
    let now = chrono::Utc::now().to_rfc3339();
    Ok(MarksheetAggregate {
        id: Uuid::new_v4().to_string(),
        enrollment_no: enrollment.enrollment_no.clone(),
        year: marks.year,
        scores: marks.scores,
        total_marks: marks.total_marks,
        total_full: marks.total_full,
        percentage: marks.percentage,
        grade: marks.grade,
        remarks: marks.remarks,
        verified: false,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Maps each entry to its course subject slot. Fails on unknown, duplicated
/// or missing subjects.
fn check_subject_coverage(
    course: &Course,
    scores: &[ScoreInput],
) -> Result<Vec<usize>, ValidationError> {
    let mut seen = HashSet::new();
    let mut slots = Vec::with_capacity(scores.len());
    for (i, entry) in scores.iter().enumerate() {
        let Some(slot) = course.subject_index(&entry.subject) else {
            return Err(ValidationError::new(
                format!("scores[{}].subject", i),
                format!(
                    "'{}' is not a subject of course {}",
                    entry.subject.trim(),
                    course.code
                ),
            ));
        };
        if !seen.insert(slot) {
            return Err(ValidationError::new(
                format!("scores[{}].subject", i),
                format!("duplicate score for '{}'", course.subjects[slot].name),
            ));
        }
        slots.push(slot);
    }

    let missing: Vec<&str> = course
        .subjects
        .iter()
        .enumerate()
        .filter(|(slot, _)| !seen.contains(slot))
        .map(|(_, s)| s.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::new(
            "scores",
            format!("missing scores for: {}", missing.join(", ")),
        ));
    }
    Ok(slots)
}

fn bounded(value: i64, full: u32, index: usize, part: &str) -> Result<u32, ValidationError> {
    let field = || format!("scores[{}].{}", index, part);
    if value < 0 {
        return Err(ValidationError::new(field(), "must not be negative"));
    }
    if value > i64::from(full) {
        return Err(ValidationError::new(
            field(),
            format!("{} exceeds full marks {}", value, full),
        ));
    }
    Ok(value as u32)
}
