//! Handlers grouped by resource, mirroring `routes.rs`'s endpoint groups.

pub mod compare;
pub mod extract;
pub mod pages;
pub mod schemas;
pub mod sse;
pub mod uploads;
