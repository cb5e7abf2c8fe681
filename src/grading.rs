use serde::Serialize;

pub const CA_MAX: f64 = 20.0;
pub const MIDTERM_MAX: f64 = 20.0;
pub const EXAM_MAX: f64 = 60.0;

/// Letter bands over a 100-point total. Band floors are inclusive and the
/// highest matching band wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A1,
    B2,
    B3,
    C4,
    C5,
    C6,
    D7,
    E8,
    F9,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::B2 => "B2",
            Self::B3 => "B3",
            Self::C4 => "C4",
            Self::C5 => "C5",
            Self::C6 => "C6",
            Self::D7 => "D7",
            Self::E8 => "E8",
            Self::F9 => "F9",
        }
    }

    pub fn remark(self) -> &'static str {
        match self {
            Self::A1 => "Excellent",
            Self::B2 => "Very Good",
            Self::B3 => "Good",
            Self::C4 | Self::C5 | Self::C6 => "Credit",
            Self::D7 | Self::E8 => "Pass",
            Self::F9 => "Fail",
        }
    }

    pub fn is_pass(self) -> bool {
        !matches!(self, Self::F9)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ScoreError {
    fn invalid(field: &str, max: f64, message: impl Into<String>) -> Self {
        Self {
            code: "invalid_score".to_string(),
            message: message.into(),
            details: Some(serde_json::json!({ "field": field, "min": 0.0, "max": max })),
        }
    }
}

fn check_component(field: &str, value: f64, max: f64) -> Result<(), ScoreError> {
    if !value.is_finite() {
        return Err(ScoreError::invalid(
            field,
            max,
            format!("{} must be a number", field),
        ));
    }
    if value < 0.0 || value > max {
        return Err(ScoreError::invalid(
            field,
            max,
            format!("{} must be between 0 and {}", field, max),
        ));
    }
    Ok(())
}

/// Sums the three assessment components after range validation. Components
/// outside their range are rejected, never clamped, so a bad entry can be
/// corrected at the source instead of silently skewing the sheet.
pub fn compute_total(ca: f64, midterm: f64, exam: f64) -> Result<f64, ScoreError> {
    check_component("ca", ca, CA_MAX)?;
    check_component("midterm", midterm, MIDTERM_MAX)?;
    check_component("exam", exam, EXAM_MAX)?;
    Ok(ca + midterm + exam)
}

pub fn grade_from_total(total: f64) -> Grade {
    if total >= 75.0 {
        Grade::A1
    } else if total >= 70.0 {
        Grade::B2
    } else if total >= 65.0 {
        Grade::B3
    } else if total >= 60.0 {
        Grade::C4
    } else if total >= 55.0 {
        Grade::C5
    } else if total >= 50.0 {
        Grade::C6
    } else if total >= 45.0 {
        Grade::D7
    } else if total >= 40.0 {
        Grade::E8
    } else {
        Grade::F9
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Dense class positions over per-student averages: the best value gets 1,
/// equal values share a position, and the next distinct value gets the
/// previous position plus one.
pub fn dense_positions(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut positions = vec![0usize; values.len()];
    let mut rank = 0usize;
    let mut prev: Option<f64> = None;
    for &idx in &order {
        if prev != Some(values[idx]) {
            rank += 1;
            prev = Some(values[idx]);
        }
        positions[idx] = rank;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_exact_sum_of_components() {
        assert_eq!(compute_total(15.0, 12.0, 48.0).unwrap(), 75.0);
        assert_eq!(compute_total(0.0, 0.0, 0.0).unwrap(), 0.0);
        assert_eq!(compute_total(20.0, 20.0, 60.0).unwrap(), 100.0);
    }

    #[test]
    fn half_marks_are_accepted() {
        let total = compute_total(12.5, 10.0, 40.5).unwrap();
        assert!((total - 63.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_components_are_rejected_not_clamped() {
        let err = compute_total(21.0, 10.0, 40.0).unwrap_err();
        assert_eq!(err.code, "invalid_score");
        assert_eq!(
            err.details.as_ref().and_then(|d| d.get("field")).and_then(|v| v.as_str()),
            Some("ca")
        );

        assert!(compute_total(10.0, -0.5, 40.0).is_err());
        assert!(compute_total(10.0, 10.0, 60.5).is_err());
        assert!(compute_total(f64::NAN, 10.0, 40.0).is_err());
    }

    #[test]
    fn band_floors_are_inclusive() {
        assert_eq!(grade_from_total(75.0), Grade::A1);
        assert_eq!(grade_from_total(74.999), Grade::B2);
        assert_eq!(grade_from_total(70.0), Grade::B2);
        assert_eq!(grade_from_total(65.0), Grade::B3);
        assert_eq!(grade_from_total(60.0), Grade::C4);
        assert_eq!(grade_from_total(55.0), Grade::C5);
        assert_eq!(grade_from_total(50.0), Grade::C6);
        assert_eq!(grade_from_total(45.0), Grade::D7);
        assert_eq!(grade_from_total(40.0), Grade::E8);
        assert_eq!(grade_from_total(39.0), Grade::F9);
        assert_eq!(grade_from_total(0.0), Grade::F9);
    }

    #[test]
    fn grades_never_improve_as_totals_fall() {
        let order = [
            Grade::A1,
            Grade::B2,
            Grade::B3,
            Grade::C4,
            Grade::C5,
            Grade::C6,
            Grade::D7,
            Grade::E8,
            Grade::F9,
        ];
        let rank = |g: Grade| order.iter().position(|&x| x == g).unwrap();

        let mut t = 100.0;
        let mut prev = rank(grade_from_total(t));
        while t > 0.0 {
            t -= 0.25;
            let r = rank(grade_from_total(t));
            assert!(r >= prev, "grade improved as total fell at {}", t);
            prev = r;
        }
    }

    #[test]
    fn median_of_even_and_odd_counts() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[50.0]), Some(50.0));
        assert_eq!(median(&[40.0, 60.0]), Some(50.0));
        assert_eq!(median(&[70.0, 40.0, 60.0]), Some(60.0));
    }

    #[test]
    fn positions_are_dense_and_ties_share() {
        assert_eq!(dense_positions(&[82.0, 91.0, 82.0, 60.0]), vec![2, 1, 2, 3]);
        assert_eq!(dense_positions(&[50.0]), vec![1]);
        assert!(dense_positions(&[]).is_empty());
    }
}
