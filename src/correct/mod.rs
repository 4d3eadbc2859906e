//! Correction Loop (C8): VLM/LLM round-trip for a single table, an
//! equivalence test against the original, and a surgical apply that
//! re-enters the Extraction Engine.

pub mod apply;

use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::extract::{self, table::{normalized_cell_text, row_effective_column_counts}, ExtractionCache};
use crate::llm::ChatClient;
use crate::models::ExtractState;
use crate::repository::{PageRepository, SchemaRepository, UploadRepository};
use crate::store::{self, ObjectStore};

const VLM_SYSTEM_PROMPT: &str = "You re-OCR a single table region from a vendor pricelist. \
Respond with ONLY an HTML table using thead, tbody, tr, td, th, rowspan, and colspan as needed. \
Do not include any prose, explanation, or markdown fencing outside the table.";

/// Result of a VLM or LLM correction attempt.
pub struct CorrectionOutcome {
    pub original_html: String,
    pub corrected_html: String,
    /// False when the equivalence test found no material change; callers
    /// must not apply a no-change outcome.
    pub changed: bool,
}

/// True if the original and proposed replacement carry the same cell
/// text once whitespace- and case-normalized (§4.8 "Equivalence test").
pub fn is_equivalent(original_html: &str, corrected_html: &str) -> bool {
    normalized_cell_text(original_html) == normalized_cell_text(corrected_html)
}

/// Per-row effective column counts compared against the table's mode,
/// flagging rows whose count differs (§4.8 "LLM method").
fn structural_diagnosis(original_html: &str) -> String {
    let counts = row_effective_column_counts(original_html);
    if counts.is_empty() {
        return "no rows detected".to_string();
    }
    let mode = mode_of(&counts);
    let flagged: Vec<String> = counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c != mode)
        .map(|(i, &c)| format!("row {i}: {c} columns (expected {mode})"))
        .collect();
    if flagged.is_empty() {
        format!("all {} rows have {mode} columns; no structural anomaly", counts.len())
    } else {
        format!("table mode column count is {mode}; irregular rows: {}", flagged.join(", "))
    }
}

fn mode_of(counts: &[usize]) -> usize {
    use std::collections::HashMap;
    let mut freq: HashMap<usize, usize> = HashMap::new();
    for &c in counts {
        *freq.entry(c).or_insert(0) += 1;
    }
    freq.into_iter().max_by_key(|(_, n)| *n).map(|(c, _)| c).unwrap_or(0)
}

#[derive(Clone)]
pub struct CorrectionService {
    pages: PageRepository,
    uploads: UploadRepository,
    schemas: SchemaRepository,
    store: Arc<dyn ObjectStore>,
    chat: ChatClient,
    extraction_cache: Arc<ExtractionCache>,
}

impl CorrectionService {
    pub fn new(
        pages: PageRepository,
        uploads: UploadRepository,
        schemas: SchemaRepository,
        store: Arc<dyn ObjectStore>,
        chat: ChatClient,
        extraction_cache: Arc<ExtractionCache>,
    ) -> Self {
        Self {
            pages,
            uploads,
            schemas,
            store,
            chat,
            extraction_cache,
        }
    }

    async fn fetch_table(&self, upload_id: &str, page_num: i32, table_index: usize) -> AppResult<(String, String)> {
        let page = self
            .pages
            .get(upload_id, page_num)
            .await?
            .ok_or_else(|| AppError::not_found(format!("page {page_num} not found")))?;
        let markdown = page
            .markdown
            .ok_or_else(|| AppError::conflict("page has no markdown yet"))?;
        let ranges = crate::extract::table::table_byte_ranges(&markdown);
        let range = ranges
            .get(table_index)
            .ok_or_else(|| AppError::not_found(format!("no table at index {table_index}")))?;
        Ok((markdown[range.clone()].to_string(), markdown))
    }

    /// `validate_vlm`: re-OCR the table region via a vision prompt. The
    /// original HTML is never sent, to avoid anchoring.
    pub async fn validate_vlm(
        &self,
        upload_id: &str,
        page_num: i32,
        table_index: usize,
    ) -> AppResult<CorrectionOutcome> {
        let (original_html, _markdown) = self.fetch_table(upload_id, page_num, table_index).await?;
        let key = store::upload_prefixed(upload_id, &store::page_key(page_num));
        let image_bytes = self.store.get(store::BUCKET_PAGES, &key).await?;
        let corrected_html = self
            .chat
            .validate_vlm(&image_bytes, "image/png", VLM_SYSTEM_PROMPT)
            .await?;
        let changed = !is_equivalent(&original_html, &corrected_html);
        Ok(CorrectionOutcome {
            original_html,
            corrected_html,
            changed,
        })
    }

    /// `validate_llm`: send the original HTML, a structural diagnosis, and
    /// the full page markdown as context; ask for a corrected table only.
    pub async fn validate_llm(
        &self,
        upload_id: &str,
        page_num: i32,
        table_index: usize,
    ) -> AppResult<CorrectionOutcome> {
        let (original_html, markdown) = self.fetch_table(upload_id, page_num, table_index).await?;
        let diagnosis = structural_diagnosis(&original_html);
        let prompt = format!(
            "The following HTML table was extracted from a vendor pricelist and may have \
            structural errors.\n\nStructural diagnosis: {diagnosis}\n\nOriginal table:\n{original_html}\n\n\
            Full page markdown for context:\n{markdown}\n\n\
            Respond with ONLY a corrected HTML table (thead, tbody, tr, td, th, rowspan, colspan). \
            No prose."
        );
        let corrected_html = self.chat.validate_llm(&prompt).await?;
        let changed = !is_equivalent(&original_html, &corrected_html);
        Ok(CorrectionOutcome {
            original_html,
            corrected_html,
            changed,
        })
    }

    /// `apply_correction`: splice the corrected HTML in, persist the
    /// markdown, invalidate any cached ExtractionResult for the upload, and
    /// re-run C7 against the upload's company default Schema (§4.8 "on
    /// acceptance — surgically replaces one HTML table in the stored
    /// markdown and re-runs extraction").
    pub async fn apply(
        &self,
        workspace_id: &str,
        upload_id: &str,
        page_num: i32,
        table_index: usize,
        corrected_html: &str,
    ) -> AppResult<()> {
        let page = self
            .pages
            .get(upload_id, page_num)
            .await?
            .ok_or_else(|| AppError::not_found(format!("page {page_num} not found")))?;
        let markdown = page
            .markdown
            .ok_or_else(|| AppError::conflict("page has no markdown yet"))?;
        let spliced = apply::apply_correction(&markdown, table_index, corrected_html)?;
        self.pages.mark_done(&page.id, &spliced).await?;
        self.extraction_cache.invalidate(upload_id);
        self.uploads
            .set_extract_state(upload_id, ExtractState::None)
            .await?;
        self.rerun_extraction(workspace_id, upload_id).await;
        Ok(())
    }

    /// Re-enters C6+C7 against the upload's company default Schema, if one
    /// exists, mirroring the Ingest Pipeline's auto-extraction step so the
    /// stored CSV and `extract_state` stay in sync with the corrected
    /// markdown. An upload without a default schema just keeps the
    /// invalidated cache; the next manual `/extract` call recomputes.
    async fn rerun_extraction(&self, workspace_id: &str, upload_id: &str) {
        let Ok(Some(upload)) = self.uploads.get(workspace_id, upload_id).await else {
            return;
        };
        let Ok(Some(schema)) = self
            .schemas
            .default_for_company(workspace_id, &upload.company)
            .await
        else {
            return;
        };
        let Ok(pages) = self.pages.list_for_upload(upload_id).await else {
            return;
        };
        let page_data: Vec<(i32, String)> = pages
            .into_iter()
            .filter_map(|p| p.markdown.map(|md| (p.page_num, md)))
            .collect();
        let Ok(result) = extract::run(&page_data, &schema.config) else {
            return;
        };
        self.extraction_cache
            .put(upload_id, schema.config.clone(), result.clone());
        if let Ok(csv) = extract::to_csv(&result) {
            let key = format!("{upload_id}.csv");
            let _ = self.store.put(store::BUCKET_OUTPUT, &key, &csv, "text/csv").await;
        }
        let _ = self
            .uploads
            .set_extract_state(upload_id, ExtractState::Done)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence_test_ignores_case_and_whitespace() {
        let a = "<table><tr><td>AC-1</td><td> 100 </td></tr></table>";
        let b = "<table><tr><td>ac-1</td><td>100</td></tr></table>";
        assert!(is_equivalent(a, b));
    }

    #[test]
    fn equivalence_test_detects_a_real_change() {
        let a = "<table><tr><td>AC-1</td><td>100</td></tr></table>";
        let b = "<table><tr><td>AC-1</td><td>120</td></tr></table>";
        assert!(!is_equivalent(a, b));
    }

    #[test]
    fn structural_diagnosis_flags_rows_off_the_mode() {
        let html = "<table><tr><td>a</td><td>b</td></tr><tr><td colspan=\"3\">c</td></tr></table>";
        let diagnosis = structural_diagnosis(html);
        assert!(diagnosis.contains("irregular rows"));
    }
}
