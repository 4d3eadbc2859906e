//! Extraction Engine (C7): turns resolved Tables into an ExtractionResult —
//! fill-down, melt expansion, heading/page injection, anomaly flagging,
//! and the `(page, table_index)` trail back to source.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::ExtractionConfig;

use super::anomaly;
use super::resolver::{self, ResolvedTable, ValueResolution};
use super::table::{self, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub row: usize,
    pub col: usize,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub flags: Vec<Flag>,
    pub row_count: usize,
    pub page_count: usize,
    pub flagged_count: usize,
    /// Source `(page_num, table_index)` per output row, same length as `rows`.
    pub row_table_indices: Vec<(i32, usize)>,
}

/// Parses a decimal number allowing `.` or `,` as the decimal separator,
/// with optional currency symbols or spaces. Shared with the Comparator (C9).
pub fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    let normalized = if cleaned.contains('.') && cleaned.contains(',') {
        cleaned.replace(',', "")
    } else if cleaned.contains(',') {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };
    normalized.parse::<f64>().ok()
}

/// A row anchor cell is carried forward (fill-down) when it is empty, or
/// looks like a sub-row annotation of the previous reference: a lone
/// lowercase letter/word, or a bare digit suffix.
fn should_fill_down(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.chars().next().is_some_and(|c| c.is_lowercase()) {
        return true;
    }
    trimmed.chars().all(|c| c.is_ascii_digit())
}

struct UsableTable<'a> {
    page_num: i32,
    table: &'a Table,
    resolved: ResolvedTable<'a>,
}

/// Run the engine over every page's markdown, in page order.
pub fn run(pages: &[(i32, String)], config: &ExtractionConfig) -> ExtractionResult {
    let parsed: Vec<(i32, Vec<Table>)> = pages
        .iter()
        .map(|(page_num, markdown)| (*page_num, table::parse_tables(markdown)))
        .collect();

    let mut usable: Vec<UsableTable<'_>> = Vec::new();
    for (page_num, tables) in &parsed {
        for t in tables {
            if let Some(resolved) = resolver::resolve(t, config) {
                usable.push(UsableTable {
                    page_num: *page_num,
                    table: t,
                    resolved,
                });
            }
        }
    }

    let melt_mode = usable
        .iter()
        .any(|u| matches!(u.resolved.value, ValueResolution::Melt(_)));

    let mut columns = vec!["reference".to_string()];
    if melt_mode {
        columns.push("variant".to_string());
    }
    columns.extend(config.extras.iter().cloned());
    columns.push("value".to_string());
    if config.include_heading {
        columns.push("heading".to_string());
    }
    if config.include_page {
        columns.push("page".to_string());
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row_table_indices: Vec<(i32, usize)> = Vec::new();
    let mut pages_seen: HashSet<i32> = HashSet::new();

    for usable_table in &usable {
        pages_seen.insert(usable_table.page_num);
        let table = usable_table.table;
        let resolved = &usable_table.resolved;
        let heading = table.headings.last().cloned().unwrap_or_default();

        let mut last_anchor = String::new();
        let mut last_value = String::new();

        for data_row in &table.rows {
            let raw_anchor = data_row
                .get(resolved.row_anchor_col)
                .cloned()
                .unwrap_or_default();
            let anchor = if should_fill_down(&raw_anchor) {
                last_anchor.clone()
            } else {
                last_anchor = raw_anchor.clone();
                raw_anchor
            };
            if anchor.is_empty() {
                continue;
            }

            let extras_vals: Vec<String> = resolved
                .extras
                .iter()
                .map(|opt| opt.and_then(|c| data_row.get(c).cloned()).unwrap_or_default())
                .collect();

            match &resolved.value {
                ValueResolution::Flat(col) | ValueResolution::Pin(col) => {
                    let mut value = data_row.get(*col).cloned().unwrap_or_default();
                    if config.fill_down_value && value.trim().is_empty() {
                        value = last_value.clone();
                    } else {
                        last_value = value.clone();
                    }

                    let mut row = vec![anchor.clone()];
                    if melt_mode {
                        row.push(String::new());
                    }
                    row.extend(extras_vals.clone());
                    row.push(value);
                    push_trailers(&mut row, config, &heading, usable_table.page_num);
                    rows.push(row);
                    row_table_indices.push((usable_table.page_num, table.table_index));
                }
                ValueResolution::Melt(cols) => {
                    for &col in cols {
                        let variant = table.columns[col].display();
                        let value = data_row.get(col).cloned().unwrap_or_default();
                        let mut row = vec![anchor.clone(), variant];
                        row.extend(extras_vals.clone());
                        row.push(value);
                        push_trailers(&mut row, config, &heading, usable_table.page_num);
                        rows.push(row);
                        row_table_indices.push((usable_table.page_num, table.table_index));
                    }
                }
            }
        }
    }

    let mut flags = Vec::new();
    let mut flagged_rows: HashSet<usize> = HashSet::new();
    for col_idx in 0..columns.len() {
        if columns[col_idx] == "heading" || columns[col_idx] == "page" {
            continue;
        }
        let values: Vec<&str> = rows.iter().map(|r| r[col_idx].as_str()).collect();
        let profile = anomaly::profile_column(&values);
        for (row_idx, row) in rows.iter().enumerate() {
            if let Some(reason) = anomaly::flag_cell(&row[col_idx], &profile) {
                flags.push(Flag {
                    row: row_idx,
                    col: col_idx,
                    reason: reason.as_str(),
                });
                flagged_rows.insert(row_idx);
            }
        }
    }

    let row_count = rows.len();
    let page_count = pages_seen.len();
    let flagged_count = flagged_rows.len();

    ExtractionResult {
        columns,
        rows,
        flags,
        row_count,
        page_count,
        flagged_count,
        row_table_indices,
    }
}

fn push_trailers(row: &mut Vec<String>, config: &ExtractionConfig, heading: &str, page_num: i32) {
    if config.include_heading {
        row.push(heading.to_string());
    }
    if config.include_page {
        row.push(page_num.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(melt: bool, fill_down_value: bool) -> ExtractionConfig {
        ExtractionConfig {
            row_anchor: "ref".into(),
            value_anchor: "mrp".into(),
            extras: vec![],
            include_page: true,
            include_heading: true,
            fill_down_value,
            match_child: None,
            melt,
        }
    }

    #[test]
    fn parse_numeric_handles_comma_decimal_and_currency() {
        assert_eq!(parse_numeric("$1,234.56"), Some(1234.56));
        assert_eq!(parse_numeric("90,5"), Some(90.5));
        assert_eq!(parse_numeric("N/A"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn flat_extraction_fills_down_row_anchor() {
        let md = "<table><tr><th>Ref</th><th>MRP</th></tr>\
            <tr><td>AC-1</td><td>100</td></tr>\
            <tr><td>a</td><td>110</td></tr></table>";
        let result = run(&[(1, md.to_string())], &config(false, false));
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1][0], "AC-1");
    }

    #[test]
    fn melt_mode_emits_one_row_per_child_column() {
        let md = "<table><tr><th>Ref</th><th colspan=\"2\">MRP</th></tr>\
            <tr><th></th><th>S</th><th>L</th></tr>\
            <tr><td>AC-1</td><td>100</td><td>120</td></tr></table>";
        let result = run(&[(1, md.to_string())], &config(true, false));
        assert_eq!(result.row_count, 2);
        assert!(result.columns.contains(&"variant".to_string()));
    }

    #[test]
    fn row_table_indices_track_source_page_and_table() {
        let md = "<table><tr><th>Ref</th><th>MRP</th></tr><tr><td>AC-1</td><td>100</td></tr></table>";
        let result = run(&[(3, md.to_string())], &config(false, false));
        assert_eq!(result.row_table_indices, vec![(3, 0)]);
    }

    #[test]
    fn same_inputs_yield_identical_output() {
        let md = "<table><tr><th>Ref</th><th>MRP</th></tr><tr><td>AC-1</td><td>100</td></tr></table>";
        let a = run(&[(1, md.to_string())], &config(false, false));
        let b = run(&[(1, md.to_string())], &config(false, false));
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.row_table_indices, b.row_table_indices);
    }
}
