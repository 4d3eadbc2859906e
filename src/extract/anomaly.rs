//! Extraction Engine anomaly flagging (§4.7, tail): per-column profiling
//! and per-cell flag assignment. Flags are advisory and never drop rows.

use std::collections::HashMap;

use super::engine::parse_numeric;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagReason {
    NonNumericInNumericColumn,
    OutlierLength,
    RarePattern,
}

impl FlagReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::NonNumericInNumericColumn => "non_numeric_in_numeric_column",
            FlagReason::OutlierLength => "outlier_length",
            FlagReason::RarePattern => "rare_pattern",
        }
    }
}

pub struct ColumnProfile {
    numeric_fraction: f64,
    length_mean: f64,
    length_stdev: f64,
    value_counts: HashMap<String, usize>,
    top_count: usize,
    non_empty: usize,
}

pub fn profile_column(values: &[&str]) -> ColumnProfile {
    let non_empty_values: Vec<&str> = values.iter().copied().filter(|v| !v.trim().is_empty()).collect();
    let non_empty = non_empty_values.len();

    let numeric_fraction = if non_empty == 0 {
        0.0
    } else {
        non_empty_values
            .iter()
            .filter(|v| parse_numeric(v).is_some())
            .count() as f64
            / non_empty as f64
    };

    let lengths: Vec<f64> = non_empty_values.iter().map(|v| v.chars().count() as f64).collect();
    let length_mean = mean(&lengths);
    let length_stdev = stdev(&lengths, length_mean);

    let mut value_counts: HashMap<String, usize> = HashMap::new();
    for v in &non_empty_values {
        *value_counts.entry(v.to_lowercase()).or_insert(0) += 1;
    }
    let top_count = value_counts.values().copied().max().unwrap_or(0);

    ColumnProfile {
        numeric_fraction,
        length_mean,
        length_stdev,
        value_counts,
        top_count,
        non_empty,
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn stdev(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let variance = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    variance.sqrt()
}

/// Flags `value` against its column's profile, per the three rules in
/// §4.7. At most one reason is reported per cell.
pub fn flag_cell(value: &str, profile: &ColumnProfile) -> Option<FlagReason> {
    if value.trim().is_empty() {
        return None;
    }

    if profile.numeric_fraction >= 0.8 && parse_numeric(value).is_none() {
        return Some(FlagReason::NonNumericInNumericColumn);
    }

    if profile.length_stdev >= 2.0 {
        let len = value.chars().count() as f64;
        if (len - profile.length_mean).abs() > 3.0 * profile.length_stdev {
            return Some(FlagReason::OutlierLength);
        }
    }

    if profile.non_empty > 0 {
        let top_ratio = profile.top_count as f64 / profile.non_empty as f64;
        if top_ratio >= 0.5 {
            let count = profile.value_counts.get(&value.to_lowercase()).copied().unwrap_or(0);
            if count == 1 {
                return Some(FlagReason::RarePattern);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_non_numeric_value_in_mostly_numeric_column() {
        let values = ["100", "120", "N/A", "90"];
        let profile = profile_column(&values);
        assert_eq!(
            flag_cell("N/A", &profile),
            Some(FlagReason::NonNumericInNumericColumn)
        );
        assert_eq!(flag_cell("100", &profile), None);
    }

    #[test]
    fn flags_outlier_length() {
        let values = [
            "AC-1", "AC-2", "AC-3", "AC-4", "AC-5",
            "AC-THIS-ONE-IS-WAY-LONGER-THAN-ALL-THE-OTHERS",
        ];
        let profile = profile_column(&values);
        assert_eq!(
            flag_cell(
                "AC-THIS-ONE-IS-WAY-LONGER-THAN-ALL-THE-OTHERS",
                &profile
            ),
            Some(FlagReason::OutlierLength)
        );
    }

    #[test]
    fn flags_rare_pattern_against_a_dominant_value() {
        let values = ["red", "red", "red", "red", "blue"];
        let profile = profile_column(&values);
        assert_eq!(flag_cell("blue", &profile), Some(FlagReason::RarePattern));
        assert_eq!(flag_cell("red", &profile), None);
    }

    #[test]
    fn empty_cell_is_never_flagged() {
        let values = ["100", "", "120"];
        let profile = profile_column(&values);
        assert_eq!(flag_cell("", &profile), None);
    }
}
