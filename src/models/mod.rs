//! Domain entities. Upload/Page/Schema are Diesel-mapped rows; Table,
//! ExtractionResult and ComparisonResult are computed values never
//! persisted as rows (see repository/ vs extract/compare for the split).

mod page;
mod schema_config;
mod upload;

pub use page::{Page, PageState};
pub use schema_config::{ExtractionConfig, Schema};
pub use upload::{DocType, ExtractState, IngestState, Upload};
