//! Token blacklist cache (§4.11), consulted by the auth guard on every
//! authenticated request. Out of scope as a system (spec.md §1 excludes
//! the cache itself) but its interface is part of this crate's surface.

mod memory;
mod redis_backed;

pub use memory::InMemoryTokenBlacklist;
pub use redis_backed::RedisTokenBlacklist;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::AppResult;

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn is_blacklisted(&self, jti: &str) -> AppResult<bool>;
    async fn blacklist(&self, jti: &str, ttl: Duration) -> AppResult<()>;
}
