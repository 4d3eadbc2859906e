//! Object Store Adapter (C1): named buckets `pdfs`, `pages`, `output`;
//! put/get/delete of opaque byte blobs keyed by forward-slash path.

mod fs;

pub use fs::FsObjectStore;

use async_trait::async_trait;

use crate::errors::AppResult;

pub const BUCKET_PDFS: &str = "pdfs";
pub const BUCKET_PAGES: &str = "pages";
pub const BUCKET_OUTPUT: &str = "output";

/// Byte-blob storage behind named buckets. The store is flat within a
/// bucket; keys are forward-slash paths, treated opaquely.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> AppResult<()>;
    async fn get(&self, bucket: &str, key: &str) -> AppResult<Vec<u8>>;
    async fn exists(&self, bucket: &str, key: &str) -> AppResult<bool>;
    /// Best-effort idempotent: deleting an already-absent prefix is not an error.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> AppResult<()>;
}

pub fn page_key(page_num: i32) -> String {
    format!("page_{page_num:03}.png")
}

pub fn upload_prefixed(upload_id: &str, artifact: &str) -> String {
    format!("{upload_id}/{artifact}")
}
