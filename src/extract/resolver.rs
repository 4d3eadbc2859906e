//! Column Resolver (C6): maps an ExtractionConfig's `row_anchor`,
//! `value_anchor`, and `extras` to concrete columns of a parsed Table.
//! Pure functions only — no I/O, no persisted state.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ExtractionConfig;

use super::table::Table;

/// Vendor-specific synonyms the normalizer treats as equivalent. Not
/// exhaustive; new pairs are additive and never change existing matches.
pub const SYNONYMS: &[(&str, &str)] = &[
    ("ref", "reference"),
    ("sku", "reference"),
    ("mrp", "list price"),
    ("rrp", "list price"),
    ("net", "net price"),
    ("qty", "quantity"),
];

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let stripped = NON_ALNUM_RE.replace_all(&lower, "");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").to_string()
}

fn synonyms_of(term: &str) -> Vec<&'static str> {
    SYNONYMS
        .iter()
        .filter_map(|(a, b)| {
            if *a == term {
                Some(*b)
            } else if *b == term {
                Some(*a)
            } else {
                None
            }
        })
        .collect()
}

/// True if `query` matches `candidate` under substring-either-way matching,
/// tried against the normalized term and its synonyms.
pub fn matches(query: &str, candidate: &str) -> bool {
    let q = normalize(query);
    let c = normalize(candidate);
    if matches_normalized(&q, &c) {
        return true;
    }
    synonyms_of(&q).iter().any(|syn| matches_normalized(syn, &c))
}

fn matches_normalized(q: &str, c: &str) -> bool {
    !q.is_empty() && !c.is_empty() && (c.contains(q) || q.contains(c))
}

/// How a Table's value column(s) were resolved for a given config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueResolution {
    Flat(usize),
    Pin(usize),
    Melt(Vec<usize>),
}

/// Concrete column indices resolved for one Table.
#[derive(Debug, Clone)]
pub struct ResolvedTable<'a> {
    pub table: &'a Table,
    pub row_anchor_col: usize,
    pub value: ValueResolution,
    /// One resolved column index per `extras` entry, in config order.
    pub extras: Vec<Option<usize>>,
}

/// Fraction of non-empty cells in `col` across the table's data rows.
fn non_empty_ratio(table: &Table, col: usize) -> f64 {
    if table.rows.is_empty() {
        return 0.0;
    }
    let filled = table
        .rows
        .iter()
        .filter(|r| r.get(col).is_some_and(|c| !c.trim().is_empty()))
        .count();
    filled as f64 / table.rows.len() as f64
}

fn candidate_columns(table: &Table, anchor: &str) -> Vec<usize> {
    (0..table.columns.len())
        .filter(|&i| {
            let col = &table.columns[i];
            matches(anchor, &col.parent) || matches(anchor, &col.child)
        })
        .collect()
}

/// Resolve `row_anchor`: parent-level matches with multiple children pick
/// the fullest non-empty column, leftmost on ties.
fn resolve_row_anchor(table: &Table, anchor: &str) -> Option<usize> {
    let candidates = candidate_columns(table, anchor);
    candidates.into_iter().max_by(|&a, &b| {
        non_empty_ratio(table, a)
            .partial_cmp(&non_empty_ratio(table, b))
            .unwrap()
            .then(b.cmp(&a)) // leftmost wins ties: prefer smaller index
    })
}

fn resolve_value(table: &Table, config: &ExtractionConfig) -> Option<ValueResolution> {
    if let Some(child) = &config.match_child {
        let idx = (0..table.columns.len()).find(|&i| {
            matches(&config.value_anchor, &table.columns[i].parent)
                && matches(child, &table.columns[i].child)
        })?;
        return Some(ValueResolution::Pin(idx));
    }

    if config.melt {
        let parent_col = (0..table.columns.len())
            .find(|&i| matches(&config.value_anchor, &table.columns[i].parent))?;
        let parent_name = &table.columns[parent_col].parent;
        let cols: Vec<usize> = (0..table.columns.len())
            .filter(|&i| table.columns[i].parent == *parent_name)
            .collect();
        return if cols.is_empty() {
            None
        } else {
            Some(ValueResolution::Melt(cols))
        };
    }

    let idx = candidate_columns(table, &config.value_anchor)
        .into_iter()
        .next()?;
    Some(ValueResolution::Flat(idx))
}

/// Resolve a single Table against `config`. Returns `None` if the table
/// isn't *usable*: it must resolve a row_anchor and at least one value column.
pub fn resolve(table: &Table, config: &ExtractionConfig) -> Option<ResolvedTable<'_>> {
    let row_anchor_col = resolve_row_anchor(table, &config.row_anchor)?;
    let value = resolve_value(table, config)?;

    let extras = config
        .extras
        .iter()
        .map(|extra| candidate_columns(table, extra).into_iter().next())
        .collect();

    Some(ResolvedTable {
        table,
        row_anchor_col,
        value,
        extras,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::table::{ColumnHeader, Table};

    fn col(parent: &str, child: &str) -> ColumnHeader {
        ColumnHeader {
            normalized_parent: normalize(parent),
            normalized_child: normalize(child),
            parent: parent.to_string(),
            child: child.to_string(),
        }
    }

    fn base_config() -> ExtractionConfig {
        ExtractionConfig {
            row_anchor: "ref".into(),
            value_anchor: "mrp".into(),
            extras: vec![],
            include_page: false,
            include_heading: false,
            fill_down_value: false,
            match_child: None,
            melt: false,
        }
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("List Price!"), "list price");
    }

    #[test]
    fn synonym_matches_ref_against_reference() {
        assert!(matches("ref", "Reference"));
        assert!(matches("mrp", "List Price"));
    }

    #[test]
    fn flat_mode_resolves_value_anchor_substring() {
        let table = Table {
            table_index: 0,
            headings: vec![],
            columns: vec![col("Reference", "Reference"), col("MRP", "MRP")],
            rows: vec![vec!["AC-1".into(), "100".into()]],
        };
        let resolved = resolve(&table, &base_config()).unwrap();
        assert_eq!(resolved.row_anchor_col, 0);
        assert_eq!(resolved.value, ValueResolution::Flat(1));
    }

    #[test]
    fn melt_mode_collects_every_child_under_matching_parent() {
        let table = Table {
            table_index: 0,
            headings: vec![],
            columns: vec![
                col("Reference", "Reference"),
                col("MRP", "S"),
                col("MRP", "L"),
            ],
            rows: vec![vec!["AC-1".into(), "100".into(), "120".into()]],
        };
        let mut config = base_config();
        config.melt = true;
        let resolved = resolve(&table, &config).unwrap();
        assert_eq!(resolved.value, ValueResolution::Melt(vec![1, 2]));
    }

    #[test]
    fn pin_mode_requires_both_parent_and_child_match() {
        let table = Table {
            table_index: 0,
            headings: vec![],
            columns: vec![
                col("Reference", "Reference"),
                col("MRP", "S"),
                col("MRP", "L"),
            ],
            rows: vec![vec!["AC-1".into(), "100".into(), "120".into()]],
        };
        let mut config = base_config();
        config.match_child = Some("L".into());
        let resolved = resolve(&table, &config).unwrap();
        assert_eq!(resolved.value, ValueResolution::Pin(2));
    }

    #[test]
    fn unusable_table_has_no_value_match() {
        let table = Table {
            table_index: 0,
            headings: vec![],
            columns: vec![col("Reference", "Reference"), col("Color", "Color")],
            rows: vec![vec!["AC-1".into(), "red".into()]],
        };
        assert!(resolve(&table, &base_config()).is_none());
    }
}
