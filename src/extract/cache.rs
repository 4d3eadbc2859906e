//! In-process ExtractionResult cache (spec.md §3's "Ownership / lifecycle"
//! note: "An ExtractionResult is a value; it may be cached but is always
//! reproducible from (Pages, ExtractionConfig)"). Keyed by upload id, one
//! entry per upload; a cache hit also requires the requested config to
//! match the config the cached result was built from, so a config change
//! behaves as an implicit cache miss rather than serving a stale result.
//!
//! Invalidated whenever a Page's markdown changes (correction-loop apply,
//! reparse) or an extraction explicitly overwrites the entry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::ExtractionConfig;

use super::engine::ExtractionResult;

struct CachedResult {
    config: ExtractionConfig,
    result: ExtractionResult,
}

#[derive(Default)]
pub struct ExtractionCache {
    entries: Mutex<HashMap<String, CachedResult>>,
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `upload_id` if present and its config
    /// matches `config`; otherwise `None` (caller should recompute and `put`).
    pub fn get(&self, upload_id: &str, config: &ExtractionConfig) -> Option<ExtractionResult> {
        let entries = self.entries.lock().unwrap();
        entries.get(upload_id).and_then(|cached| {
            if &cached.config == config {
                Some(cached.result.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, upload_id: &str, config: ExtractionConfig, result: ExtractionResult) {
        self.entries.lock().unwrap().insert(
            upload_id.to_string(),
            CachedResult { config, result },
        );
    }

    /// Drops any cached result for `upload_id`. Called on any Page markdown
    /// change (correction apply, reparse) so a later lookup recomputes.
    pub fn invalidate(&self, upload_id: &str) {
        self.entries.lock().unwrap().remove(upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            row_anchor: "ref".into(),
            value_anchor: "mrp".into(),
            extras: vec![],
            include_page: false,
            include_heading: false,
            fill_down_value: false,
            match_child: None,
            melt: false,
        }
    }

    fn result(value: &str) -> ExtractionResult {
        ExtractionResult {
            columns: vec!["reference".into(), "value".into()],
            rows: vec![vec!["A".into(), value.into()]],
            flags: vec![],
            row_count: 1,
            page_count: 1,
            flagged_count: 0,
            row_table_indices: vec![(1, 0)],
        }
    }

    #[test]
    fn miss_then_hit_after_put() {
        let cache = ExtractionCache::new();
        assert!(cache.get("u1", &config()).is_none());
        cache.put("u1", config(), result("100"));
        let cached = cache.get("u1", &config()).unwrap();
        assert_eq!(cached.rows[0][1], "100");
    }

    #[test]
    fn config_mismatch_is_a_miss() {
        let cache = ExtractionCache::new();
        cache.put("u1", config(), result("100"));
        let mut other = config();
        other.include_page = true;
        assert!(cache.get("u1", &other).is_none());
    }

    #[test]
    fn invalidate_clears_the_entry() {
        let cache = ExtractionCache::new();
        cache.put("u1", config(), result("100"));
        cache.invalidate("u1");
        assert!(cache.get("u1", &config()).is_none());
    }
}
