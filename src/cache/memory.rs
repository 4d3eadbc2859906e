//! In-process TokenBlacklist backing tests and a REDIS_URL-less dev run.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::errors::AppResult;

use super::TokenBlacklist;

#[derive(Default)]
pub struct InMemoryTokenBlacklist {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryTokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryTokenBlacklist {
    async fn is_blacklisted(&self, jti: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(jti) {
            Some(expires_at) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(jti);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn blacklist(&self, jti: &str, ttl: Duration) -> AppResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(jti.to_string(), Instant::now() + ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blacklisted_token_is_reported() {
        let cache = InMemoryTokenBlacklist::new();
        assert!(!cache.is_blacklisted("jti-1").await.unwrap());
        cache
            .blacklist("jti-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.is_blacklisted("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_is_not_blacklisted() {
        let cache = InMemoryTokenBlacklist::new();
        cache
            .blacklist("jti-2", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.is_blacklisted("jti-2").await.unwrap());
    }
}
