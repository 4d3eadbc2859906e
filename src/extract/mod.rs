//! Extraction: Table Parser (C5) -> Column Resolver (C6) -> Extraction
//! Engine (C7). `run` is the single entry point the Ingest Pipeline and
//! the manual-extraction HTTP handler both call.

pub mod anomaly;
pub mod cache;
pub mod engine;
pub mod resolver;
pub mod table;

pub use cache::ExtractionCache;
pub use engine::{ExtractionResult, Flag};

use crate::errors::AppResult;
use crate::models::ExtractionConfig;

/// Run the full extraction pipeline over a document's pages, in page order.
pub fn run(pages: &[(i32, String)], config: &ExtractionConfig) -> AppResult<ExtractionResult> {
    config.validate()?;
    Ok(engine::run(pages, config))
}

/// RFC 4180 CSV rendering of an ExtractionResult, written to `output/{id}.csv`.
/// `csv`'s writer defaults to a bare `\n` terminator; §6 requires CRLF.
pub fn to_csv(result: &ExtractionResult) -> AppResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row)?;
    }
    Ok(writer.into_inner().map_err(|e| crate::errors::AppError::internal(e.to_string()))?)
}
