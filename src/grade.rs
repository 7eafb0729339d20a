use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grade reported when no percentage can be computed (zero full marks).
pub const NOT_ASSIGNABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradeError {
    #[error("total full marks is zero; no grade is assignable")]
    DivisionUndefined,

    #[error("invalid grading table: {0}")]
    InvalidTable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub grade: String,
}

impl GradeBand {
    pub fn new(min_percent: f64, grade: &str) -> Self {
        Self {
            min_percent,
            grade: grade.to_string(),
        }
    }

    fn threshold_hundredths(&self) -> u64 {
        (self.min_percent * 100.0).round() as u64
    }
}

/// Named grading tables shipped with the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingPolicy {
    /// AA / A+ / A / B+ / B / C / D.
    #[default]
    Standard,
    /// A+ / A / B+ / B / C / D / F, as printed by the older preview screen.
    Legacy,
}

impl GradingPolicy {
    pub fn table(self) -> GradingTable {
        match self {
            GradingPolicy::Standard => GradingTable::standard(),
            GradingPolicy::Legacy => GradingTable::legacy(),
        }
    }
}

/// Descending percentage thresholds plus the grade given below the lowest one.
///
/// Evaluation walks `bands` from the highest threshold down and returns the
/// first band whose threshold the percentage reaches; `floor` applies when
/// none match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingTable {
    pub bands: Vec<GradeBand>,
    pub floor: String,
}

impl GradingTable {
    pub fn standard() -> Self {
        Self {
            bands: vec![
                GradeBand::new(90.0, "AA"),
                GradeBand::new(80.0, "A+"),
                GradeBand::new(70.0, "A"),
                GradeBand::new(60.0, "B+"),
                GradeBand::new(50.0, "B"),
                GradeBand::new(40.0, "C"),
            ],
            floor: "D".to_string(),
        }
    }

    pub fn legacy() -> Self {
        Self {
            bands: vec![
                GradeBand::new(90.0, "A+"),
                GradeBand::new(80.0, "A"),
                GradeBand::new(70.0, "B+"),
                GradeBand::new(60.0, "B"),
                GradeBand::new(50.0, "C"),
                GradeBand::new(40.0, "D"),
            ],
            floor: "F".to_string(),
        }
    }

    pub fn new(bands: Vec<GradeBand>, floor: impl Into<String>) -> Result<Self, GradeError> {
        let table = Self {
            bands,
            floor: floor.into(),
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        if self.floor.trim().is_empty() {
            return Err(GradeError::InvalidTable(
                "floor grade must not be empty".into(),
            ));
        }
        if self.floor.trim() == NOT_ASSIGNABLE {
            return Err(GradeError::InvalidTable(format!(
                "'{}' is reserved for ungradable marksheets",
                NOT_ASSIGNABLE
            )));
        }
        let mut prev: Option<f64> = None;
        for (i, band) in self.bands.iter().enumerate() {
            if !band.min_percent.is_finite() || !(0.0..=100.0).contains(&band.min_percent) {
                return Err(GradeError::InvalidTable(format!(
                    "bands[{}].minPercent must be within 0..=100",
                    i
                )));
            }
            let label = band.grade.trim();
            if label.is_empty() || label == NOT_ASSIGNABLE {
                return Err(GradeError::InvalidTable(format!(
                    "bands[{}].grade must be a non-empty label other than {}",
                    i, NOT_ASSIGNABLE
                )));
            }
            if let Some(p) = prev {
                if band.min_percent >= p {
                    return Err(GradeError::InvalidTable(format!(
                        "bands[{}].minPercent must be strictly below the previous band",
                        i
                    )));
                }
            }
            prev = Some(band.min_percent);
        }
        Ok(())
    }

    /// Grade for a percentage expressed in hundredths (8000 == 80.00%).
    #[cfg(test)]
    pub fn grade_for_hundredths(&self, hundredths: u64) -> &str {
        self.bands
            .iter()
            .find(|b| hundredths >= b.threshold_hundredths())
            .map(|b| b.grade.as_str())
            .unwrap_or(self.floor.as_str())
    }

    /// Grade for the exact ratio `obtained / full`, before any rounding.
    /// A band is reached when `100 * obtained / full >= min_percent`.
    pub fn grade_for_ratio(&self, total_obtained: u32, total_full: u32) -> &str {
        let scaled = 10_000 * u64::from(total_obtained);
        let full = u64::from(total_full);
        self.bands
            .iter()
            .find(|b| scaled >= b.threshold_hundredths() * full)
            .map(|b| b.grade.as_str())
            .unwrap_or(self.floor.as_str())
    }

    #[cfg(test)]
    pub fn grade_for(&self, percentage: f64) -> &str {
        let hundredths = (percentage.max(0.0) * 100.0).round() as u64;
        self.grade_for_hundredths(hundredths)
    }
}

impl Default for GradingTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub percentage: f64,
    pub grade: String,
}

impl GradeOutcome {
    pub fn not_assignable() -> Self {
        Self {
            percentage: 0.0,
            grade: NOT_ASSIGNABLE.to_string(),
        }
    }
}

/// `round_half_up(100 * obtained / full, 2)` in integer hundredths.
pub fn percent_hundredths(total_obtained: u32, total_full: u32) -> Result<u64, GradeError> {
    if total_full == 0 {
        return Err(GradeError::DivisionUndefined);
    }
    let obtained = u64::from(total_obtained);
    let full = u64::from(total_full);
    // 10000 * o / f rounded half up == floor((20000 * o + f) / (2 * f))
    Ok((20_000 * obtained + full) / (2 * full))
}

pub fn compute_grade(
    table: &GradingTable,
    total_obtained: u32,
    total_full: u32,
) -> Result<GradeOutcome, GradeError> {
    // The displayed percentage is rounded; the band is chosen from the
    // unrounded ratio, so 89.995 shows as 90.00 but grades below 90.
    let hundredths = percent_hundredths(total_obtained, total_full)?;
    Ok(GradeOutcome {
        percentage: hundredths as f64 / 100.0,
        grade: table.grade_for_ratio(total_obtained, total_full).to_string(),
    })
}

/// Like [`compute_grade`], with the zero-full-marks case folded into the
/// `N/A` sentinel.
pub fn grade_or_sentinel(table: &GradingTable, total_obtained: u32, total_full: u32) -> GradeOutcome {
    match compute_grade(table, total_obtained, total_full) {
        Ok(outcome) => outcome,
        Err(_) => GradeOutcome::not_assignable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_full_marks_is_not_assignable() {
        let t = GradingTable::standard();
        assert_eq!(compute_grade(&t, 0, 0), Err(GradeError::DivisionUndefined));
        assert_eq!(compute_grade(&t, 17, 0), Err(GradeError::DivisionUndefined));
        let g = grade_or_sentinel(&t, 17, 0);
        assert_eq!(g.percentage, 0.0);
        assert_eq!(g.grade, "N/A");
    }

    #[test]
    fn rounds_half_up_to_two_decimals() {
        // 1/3 -> 33.33, 2/3 -> 66.67, 1/8 -> 12.5
        assert_eq!(percent_hundredths(1, 3), Ok(3333));
        assert_eq!(percent_hundredths(2, 3), Ok(6667));
        assert_eq!(percent_hundredths(1, 8), Ok(1250));
        // 0.125% exactly -> 0.13 (half up)
        assert_eq!(percent_hundredths(1, 800), Ok(13));
        assert_eq!(percent_hundredths(0, 800), Ok(0));
    }

    #[test]
    fn band_boundaries_are_closed_at_threshold() {
        let t = GradingTable::standard();
        assert_eq!(t.grade_for(90.0), "AA");
        assert_eq!(t.grade_for(89.99), "A+");
        assert_eq!(t.grade_for(80.0), "A+");
        assert_eq!(t.grade_for(79.99), "A");
        assert_eq!(t.grade_for(40.0), "C");
        assert_eq!(t.grade_for(39.99), "D");
        assert_eq!(t.grade_for(0.0), "D");
        assert_eq!(t.grade_for(100.0), "AA");
    }

    #[test]
    fn grade_uses_unrounded_ratio_at_boundaries() {
        let t = GradingTable::standard();
        // 89.995 displays as 90.00 but has not reached the 90 band
        let g = compute_grade(&t, 17_999, 20_000).expect("grade");
        assert_eq!(g.percentage, 90.0);
        assert_eq!(g.grade, "A+");
        // exactly 90 does
        let g = compute_grade(&t, 18_000, 20_000).expect("grade");
        assert_eq!(g.percentage, 90.0);
        assert_eq!(g.grade, "AA");
        // 79.996 displays as 80.00, grades A
        let g = compute_grade(&t, 79_996, 100_000).expect("grade");
        assert_eq!(g.percentage, 80.0);
        assert_eq!(g.grade, "A");
        // 8999.4 stays at 89.99
        let g = compute_grade(&t, 89_994, 100_000).expect("grade");
        assert_eq!(g.percentage, 89.99);
        assert_eq!(g.grade, "A+");
    }

    #[test]
    fn percentage_stays_within_range_for_valid_totals() {
        let t = GradingTable::standard();
        for full in [1u32, 7, 100, 333, 1000] {
            for obtained in [0, full / 3, full / 2, full] {
                let g = compute_grade(&t, obtained, full).expect("grade");
                assert!((0.0..=100.0).contains(&g.percentage), "{} / {}", obtained, full);
            }
        }
    }

    #[test]
    fn legacy_table_keeps_its_own_labels() {
        let t = GradingTable::legacy();
        assert_eq!(t.grade_for(95.0), "A+");
        assert_eq!(t.grade_for(85.0), "A");
        assert_eq!(t.grade_for(10.0), "F");
    }

    #[test]
    fn rejects_non_descending_tables() {
        let err = GradingTable::new(
            vec![GradeBand::new(50.0, "P"), GradeBand::new(60.0, "Q")],
            "F",
        )
        .expect_err("ascending bands");
        assert!(matches!(err, GradeError::InvalidTable(_)));

        let err = GradingTable::new(vec![GradeBand::new(50.0, "P")], " ").expect_err("empty floor");
        assert!(matches!(err, GradeError::InvalidTable(_)));

        let err = GradingTable::new(vec![GradeBand::new(120.0, "P")], "F").expect_err("range");
        assert!(matches!(err, GradeError::InvalidTable(_)));
    }

    #[test]
    fn custom_table_is_evaluated_highest_first() {
        let t = GradingTable::new(
            vec![GradeBand::new(75.0, "Distinction"), GradeBand::new(35.0, "Pass")],
            "Fail",
        )
        .expect("table");
        assert_eq!(compute_grade(&t, 150, 200).expect("grade").grade, "Distinction");
        assert_eq!(compute_grade(&t, 149, 200).expect("grade").grade, "Pass");
        assert_eq!(compute_grade(&t, 69, 200).expect("grade").grade, "Fail");
    }
}
