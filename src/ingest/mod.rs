//! Ingest Pipeline (C4): the render -> OCR -> auto-extract state machine
//! that drives an Upload from `queued` to a terminal state.

mod locks;
mod pipeline;
pub mod state;
mod worker;

pub use locks::{CancelRegistry, LockRegistry};
pub use pipeline::{original_key, IngestPipeline};
