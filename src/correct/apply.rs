//! Surgical markdown splice: replaces the N-th `<table>...</table>` block
//! (0-based, matching the Table Parser's discovery order) with a corrected
//! HTML table, leaving the rest of the page markdown byte-identical.

use crate::errors::{AppError, AppResult};
use crate::extract::table::table_byte_ranges;

pub fn apply_correction(markdown: &str, table_index: usize, corrected_html: &str) -> AppResult<String> {
    let ranges = table_byte_ranges(markdown);
    let range = ranges
        .get(table_index)
        .ok_or_else(|| AppError::not_found(format!("no table at index {table_index}")))?;

    let mut out = String::with_capacity(markdown.len() + corrected_html.len());
    out.push_str(&markdown[..range.start]);
    out.push_str(corrected_html);
    out.push_str(&markdown[range.end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_the_targeted_table() {
        let md = "intro\n<table><tr><td>old</td></tr></table>\nmid\n<table><tr><td>second</td></tr></table>\ntail";
        let replaced = apply_correction(md, 1, "<table><tr><td>fixed</td></tr></table>").unwrap();
        assert!(replaced.contains("old"));
        assert!(replaced.contains("fixed"));
        assert!(!replaced.contains("second"));
        assert!(replaced.starts_with("intro\n"));
        assert!(replaced.ends_with("\ntail"));
    }

    #[test]
    fn out_of_range_index_is_not_found() {
        let md = "<table><tr><td>only</td></tr></table>";
        assert!(apply_correction(md, 5, "<table></table>").is_err());
    }
}
