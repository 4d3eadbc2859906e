//! Redis-backed token blacklist: a key-prefix + TTL entry per revoked
//! token jti, via a shared `ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::errors::{AppError, AppResult};

use super::TokenBlacklist;

const KEY_PREFIX: &str = "pricetrack:blacklist:";

#[derive(Clone)]
pub struct RedisTokenBlacklist {
    conn: ConnectionManager,
}

impl RedisTokenBlacklist {
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::internal(format!("redis connection error: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::internal(format!("redis connection manager error: {e}")))?;
        Ok(Self { conn })
    }

    fn key(&self, jti: &str) -> String {
        format!("{KEY_PREFIX}{jti}")
    }
}

#[async_trait]
impl TokenBlacklist for RedisTokenBlacklist {
    async fn is_blacklisted(&self, jti: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(self.key(jti))
            .await
            .map_err(|e| AppError::upstream(e.to_string()))?;
        Ok(exists)
    }

    async fn blacklist(&self, jti: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(jti), "1", seconds)
            .await
            .map_err(|e| AppError::upstream(e.to_string()))?;
        Ok(())
    }
}
