//! Local-filesystem ObjectStore: one top-level directory per bucket, keys
//! joined underneath it verbatim (forward slashes map directly to
//! subdirectories, matching the "`{upload_id}/{artifact}`" key shape spec
//! §4.1 describes).
//!
//! `MINIO_*` env vars are accepted by Config for a future S3-compatible
//! adapter, but only this filesystem adapter ships (see DESIGN.md).

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::errors::{AppError, AppResult};

use super::ObjectStore;

#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> AppResult<PathBuf> {
        if key.contains("..") {
            return Err(AppError::validation("object key must not contain '..'"));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], _content_type: &str) -> AppResult<()> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(bucket, key)?;
        fs::read(&path)
            .await
            .map_err(|e| AppError::internal(format!("reading {}: {e}", path.display())))
    }

    async fn exists(&self, bucket: &str, key: &str) -> AppResult<bool> {
        let path = self.path_for(bucket, key)?;
        Ok(fs::metadata(&path).await.is_ok())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> AppResult<()> {
        let path = self.path_for(bucket, prefix)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A prefix may also be a single file key (e.g. output/{id}.csv).
                match fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put("pages", "u1/page_001.png", b"hello", "image/png")
            .await
            .unwrap();
        let bytes = store.get("pages", "u1/page_001.png").await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(store.exists("pages", "u1/page_001.png").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefix_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.delete_prefix("pages", "never-existed").await.unwrap();
        store
            .put("pages", "u1/page_001.png", b"x", "image/png")
            .await
            .unwrap();
        store.delete_prefix("pages", "u1").await.unwrap();
        assert!(!store.exists("pages", "u1/page_001.png").await.unwrap());
        store.delete_prefix("pages", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("pages", "../../etc/passwd").await.is_err());
    }
}
