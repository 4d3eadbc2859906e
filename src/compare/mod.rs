//! Comparator (C9): inner-joins two extractions by reference (and variant
//! when melted), classifying each pair by price/availability change.

use std::collections::HashMap;

use serde::Serialize;

use crate::extract::engine::parse_numeric;
use crate::extract::ExtractionResult;

const SAME_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    New,
    Removed,
    Unavail,
    Avail,
    Up,
    Down,
    Same,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub reference: String,
    pub variant: Option<String>,
    pub status: Status,
    pub base_value: Option<String>,
    pub target_value: Option<String>,
    pub absolute_change: Option<f64>,
    pub percent_change: Option<f64>,
    pub base_page: Option<i32>,
    pub target_page: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComparisonSummary {
    pub new: usize,
    pub removed: usize,
    pub unavail: usize,
    pub avail: usize,
    pub up: usize,
    pub down: usize,
    pub same: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub summary: ComparisonSummary,
    pub rows: Vec<ComparisonRow>,
}

/// `reference` (and `variant`, when present) joined into one key.
fn join_key(reference: &str, variant: Option<&str>) -> String {
    match variant {
        Some(v) => format!("{reference}\u{0}{v}"),
        None => reference.to_string(),
    }
}

struct Indexed {
    value: String,
    page: Option<i32>,
}

fn index_by_key(result: &ExtractionResult) -> HashMap<String, Indexed> {
    let reference_col = 0usize;
    let variant_col = result.columns.iter().position(|c| c == "variant");
    let value_col = result.columns.iter().position(|c| c == "value").unwrap_or(1);
    let page_col = result.columns.iter().position(|c| c == "page");

    let mut out = HashMap::new();
    for (row_idx, row) in result.rows.iter().enumerate() {
        let reference = row.get(reference_col).cloned().unwrap_or_default();
        let variant = variant_col.and_then(|c| row.get(c)).cloned();
        let value = row.get(value_col).cloned().unwrap_or_default();
        let page = page_col
            .and_then(|c| row.get(c))
            .and_then(|p| p.parse::<i32>().ok())
            .or_else(|| result.row_table_indices.get(row_idx).map(|(p, _)| *p));
        out.insert(join_key(&reference, variant.as_deref()), Indexed { value, page });
    }
    out
}

/// Compare two ExtractionResults produced from the same ExtractionConfig.
pub fn compare(base: &ExtractionResult, target: &ExtractionResult) -> ComparisonResult {
    let base_index = index_by_key(base);
    let target_index = index_by_key(target);

    let mut keys: Vec<&String> = base_index.keys().chain(target_index.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut summary = ComparisonSummary::default();
    let mut rows = Vec::with_capacity(keys.len());

    for key in keys {
        let base_entry = base_index.get(key);
        let target_entry = target_index.get(key);
        let mut parts = key.splitn(2, '\u{0}');
        let reference = parts.next().unwrap_or_default().to_string();
        let variant = parts.next().map(|s| s.to_string());

        let (status, absolute_change, percent_change) = match (base_entry, target_entry) {
            (None, Some(_)) => (Status::New, None, None),
            (Some(_), None) => (Status::Removed, None, None),
            (Some(b), Some(t)) => {
                let base_numeric = parse_numeric(&b.value);
                let target_numeric = parse_numeric(&t.value);
                match (base_numeric, target_numeric) {
                    (Some(_), None) => (Status::Unavail, None, None),
                    (None, Some(_)) => (Status::Avail, None, None),
                    (Some(bv), Some(tv)) => {
                        let absolute = tv - bv;
                        let percent = if bv != 0.0 { (absolute / bv) * 100.0 } else { 0.0 };
                        let status = if bv == 0.0 {
                            if tv == 0.0 { Status::Same } else { Status::Up }
                        } else if (absolute / bv).abs() <= SAME_TOLERANCE {
                            Status::Same
                        } else if tv > bv {
                            Status::Up
                        } else {
                            Status::Down
                        };
                        (status, Some(absolute), Some(percent))
                    }
                    (None, None) => (Status::Same, None, None),
                }
            }
            (None, None) => unreachable!("key must come from at least one index"),
        };

        match status {
            Status::New => summary.new += 1,
            Status::Removed => summary.removed += 1,
            Status::Unavail => summary.unavail += 1,
            Status::Avail => summary.avail += 1,
            Status::Up => summary.up += 1,
            Status::Down => summary.down += 1,
            Status::Same => summary.same += 1,
        }

        rows.push(ComparisonRow {
            reference,
            variant,
            status,
            base_value: base_entry.map(|e| e.value.clone()),
            target_value: target_entry.map(|e| e.value.clone()),
            absolute_change,
            percent_change,
            base_page: base_entry.and_then(|e| e.page),
            target_page: target_entry.and_then(|e| e.page),
        });
    }

    ComparisonResult { summary, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(columns: &[&str], rows: Vec<Vec<&str>>) -> ExtractionResult {
        ExtractionResult {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|s| s.to_string()).collect())
                .collect(),
            flags: vec![],
            row_count: 0,
            page_count: 0,
            flagged_count: 0,
            row_table_indices: vec![],
        }
    }

    #[test]
    fn classifies_new_removed_up_down_same() {
        let base = result(
            &["reference", "value"],
            vec![vec!["A", "100"], vec!["B", "50"], vec!["C", "10"]],
        );
        let target = result(
            &["reference", "value"],
            vec![vec!["A", "120"], vec!["C", "10"], vec!["D", "5"]],
        );
        let cmp = compare(&base, &target);
        assert_eq!(cmp.summary.new, 1);
        assert_eq!(cmp.summary.removed, 1);
        assert_eq!(cmp.summary.up, 1);
        assert_eq!(cmp.summary.same, 1);
    }

    #[test]
    fn within_half_percent_counts_as_same() {
        let base = result(&["reference", "value"], vec![vec!["A", "100.00"]]);
        let target = result(&["reference", "value"], vec![vec!["A", "100.40"]]);
        let cmp = compare(&base, &target);
        assert_eq!(cmp.rows[0].status, Status::Same);
    }

    #[test]
    fn missing_target_price_is_unavail() {
        let base = result(&["reference", "value"], vec![vec!["A", "100"]]);
        let target = result(&["reference", "value"], vec![vec!["A", ""]]);
        let cmp = compare(&base, &target);
        assert_eq!(cmp.rows[0].status, Status::Unavail);
    }
}
