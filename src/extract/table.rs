//! Table Parser (C5): finds HTML tables in page markdown and normalizes
//! each into a physical cell grid honoring `rowspan`/`colspan`. A lenient,
//! regex-based tokenizer is used rather than a full HTML parser — vendor
//! markdown is OCR output, not well-formed documents, so strictness would
//! throw away recoverable tables.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// One resolved column identity: a `(parent, child)` header pair plus its
/// normalized form used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnHeader {
    pub parent: String,
    pub child: String,
    pub normalized_parent: String,
    pub normalized_child: String,
}

impl ColumnHeader {
    pub fn display(&self) -> String {
        if self.parent == self.child {
            self.parent.clone()
        } else {
            format!("{} · {}", self.parent, self.child)
        }
    }
}

/// One HTML `<table>` block discovered in a page's markdown, normalized
/// into a rectangular grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Table {
    /// 0-based index within the page, stable across re-renders (§4.5).
    pub table_index: usize,
    /// Headings preceding this table on the page.
    pub headings: Vec<String>,
    pub columns: Vec<ColumnHeader>,
    /// Data rows only (header rows are consumed into `columns`), each of
    /// length `columns.len()`.
    pub rows: Vec<Vec<String>>,
}

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table[^>]*>(.*?)</table>").unwrap());
static ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<(td|th)([^>]*)>(.*?)</(?:td|th)>"#).unwrap());
static ROWSPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)rowspan\s*=\s*"?(\d+)"?"#).unwrap());
static COLSPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)colspan\s*=\s*"?(\d+)"?"#).unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
static ATX_HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*$").unwrap());
static SETEXT_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\S.*?)\n(?:=+|-{2,})\s*$").unwrap());

/// Byte ranges of every `<table>...</table>` block in source order,
/// matching `parse_tables`' discovery order. Used by the Correction Loop
/// to splice a replacement block in by table index (§4.8).
pub fn table_byte_ranges(markdown: &str) -> Vec<std::ops::Range<usize>> {
    TABLE_RE.find_iter(markdown).map(|m| m.range()).collect()
}

/// Parse every `<table>` block in `markdown`, in source order, attaching
/// the nearest preceding heading(s) as context.
pub fn parse_tables(markdown: &str) -> Vec<Table> {
    let headings = collect_headings(markdown);

    TABLE_RE
        .find_iter(markdown)
        .enumerate()
        .map(|(table_index, m)| {
            let preceding: Vec<String> = headings
                .iter()
                .filter(|(pos, _)| *pos <= m.start())
                .map(|(_, text)| text.clone())
                .collect();
            let inner = &m.as_str()[m.as_str().find('>').map(|i| i + 1).unwrap_or(0)..];
            let inner = inner.strip_suffix("</table>").unwrap_or(inner);
            build_table(table_index, inner, preceding)
        })
        .collect()
}

/// Collects `(byte_offset, heading_text)` pairs in document order. Only
/// the *last* heading before a given position matters to callers, but we
/// keep all of them so a table can inherit its full heading trail if a
/// future caller wants more than the closest one.
fn collect_headings(markdown: &str) -> Vec<(usize, String)> {
    let mut out: Vec<(usize, String)> = ATX_HEADING_RE
        .captures_iter(markdown)
        .map(|c| {
            let m = c.get(0).unwrap();
            (m.start(), c[1].trim().to_string())
        })
        .collect();
    out.extend(SETEXT_HEADING_RE.captures_iter(markdown).map(|c| {
        let m = c.get(0).unwrap();
        (m.start(), c[1].trim().to_string())
    }));
    out.sort_by_key(|(pos, _)| *pos);
    out
}

/// Keep only the closest preceding heading, matching "attached as context"
/// from §4.5 (a table inherits the heading immediately above it).
fn closest_heading(headings: &[String]) -> Vec<String> {
    headings.last().cloned().into_iter().collect()
}

struct RawCell {
    text: String,
    row_span: usize,
    col_span: usize,
}

/// Concatenated, lowercased, whitespace-normalized cell text of a table
/// HTML block — the Correction Loop's equivalence test compares this
/// between the original and a proposed replacement (§4.8).
pub fn normalized_cell_text(table_html_block: &str) -> String {
    let inner = &table_html_block[table_html_block.find('>').map(|i| i + 1).unwrap_or(0)..];
    let inner = inner.strip_suffix("</table>").unwrap_or(inner);
    let cells: Vec<String> = ROW_RE
        .captures_iter(inner)
        .flat_map(|c| parse_row(&c[1]))
        .map(|cell| cell.text)
        .collect();
    cells.join(" ").to_lowercase()
}

/// Per-row effective column count (sum of `colspan`s, before rowspan
/// carry-over), used by the LLM Correction method's structural diagnosis
/// (§4.8): a row whose count differs from the table's mode is flagged.
pub fn row_effective_column_counts(table_html_block: &str) -> Vec<usize> {
    let inner = &table_html_block[table_html_block.find('>').map(|i| i + 1).unwrap_or(0)..];
    let inner = inner.strip_suffix("</table>").unwrap_or(inner);
    ROW_RE
        .captures_iter(inner)
        .map(|c| parse_row(&c[1]).iter().map(|cell| cell.col_span).sum())
        .filter(|&count: &usize| count > 0)
        .collect()
}

fn parse_row(row_html: &str) -> Vec<RawCell> {
    CELL_RE
        .captures_iter(row_html)
        .map(|c| {
            let attrs = &c[2];
            let row_span = ROWSPAN_RE
                .captures(attrs)
                .and_then(|m| m[1].parse().ok())
                .unwrap_or(1)
                .max(1);
            let col_span = COLSPAN_RE
                .captures(attrs)
                .and_then(|m| m[1].parse().ok())
                .unwrap_or(1)
                .max(1);
            RawCell {
                text: clean_text(&c[3]),
                row_span,
                col_span,
            }
        })
        .collect()
}

fn clean_text(html: &str) -> String {
    let no_tags = TAG_RE.replace_all(html, " ");
    let unescaped = no_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builds the physical grid from raw `<tr>`/`<td>` rows, carrying rowspans
/// down into the rows they cover and duplicating colspans across columns.
fn build_table(table_index: usize, inner: &str, headings: Vec<String>) -> Table {
    let raw_rows: Vec<Vec<RawCell>> = ROW_RE
        .captures_iter(inner)
        .map(|c| parse_row(&c[1]))
        .filter(|r| !r.is_empty())
        .collect();

    if raw_rows.is_empty() {
        return Table {
            table_index,
            headings: closest_heading(&headings),
            columns: vec![],
            rows: vec![],
        };
    }

    let mut grid: Vec<Vec<String>> = Vec::with_capacity(raw_rows.len());
    // carry[col] = Some((text, rows_remaining)) while a rowspan from above still covers it.
    let mut carry: Vec<Option<(String, usize)>> = Vec::new();

    for raw_row in &raw_rows {
        let mut physical_row: Vec<String> = Vec::new();
        let mut raw_cells = raw_row.iter();
        let mut col = 0usize;
        let mut current = raw_cells.next();

        loop {
            if col < carry.len() {
                if let Some((text, remaining)) = &carry[col] {
                    physical_row.push(text.clone());
                    let remaining = *remaining;
                    if remaining <= 1 {
                        carry[col] = None;
                    } else {
                        carry[col] = Some((text.clone(), remaining - 1));
                    }
                    col += 1;
                    continue;
                }
            }
            let Some(cell) = current else { break };
            for span_i in 0..cell.col_span {
                let target_col = col + span_i;
                if target_col >= carry.len() {
                    carry.resize(target_col + 1, None);
                }
                physical_row.push(cell.text.clone());
                if cell.row_span > 1 {
                    carry[target_col] = Some((cell.text.clone(), cell.row_span - 1));
                }
            }
            col += cell.col_span;
            current = raw_cells.next();
        }
        grid.push(physical_row);
    }

    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, String::new());
    }

    let header_row_count = grid.len().min(2);
    let columns: Vec<ColumnHeader> = (0..width)
        .map(|c| {
            let parent = grid[0].get(c).cloned().unwrap_or_default();
            let child = if header_row_count == 2 {
                grid[1].get(c).cloned().unwrap_or_default()
            } else {
                parent.clone()
            };
            ColumnHeader {
                normalized_parent: super::resolver::normalize(&parent),
                normalized_child: super::resolver::normalize(&child),
                parent,
                child,
            }
        })
        .collect();

    let rows: Vec<Vec<String>> = grid.into_iter().skip(header_row_count).collect();

    Table {
        table_index,
        headings: closest_heading(&headings),
        columns,
        rows,
    }
}
