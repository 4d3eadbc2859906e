//! Per-upload in-process mutual exclusion, keyed on upload id (§5:
//! "Per-upload mutations... are serialized by an in-process lock keyed on
//! the upload id, plus a database transaction"). Guards the sequence of
//! read-state / transition / dispatch steps in the pipeline so two
//! concurrent requests (e.g. `resume` fired twice) cannot both observe the
//! same starting state and race into the worker pool together.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `upload_id`, creating its entry on first use.
    /// Entries are never removed: the registry is small (one per upload
    /// that has ever been touched this process lifetime) and removal
    /// would race a concurrent acquirer against the entry's deletion.
    pub async fn acquire(&self, upload_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(upload_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

/// In-process cancellation flags, keyed on upload id (§4.4 "Cancellation").
/// A worker pool reads its flag's handle once at dispatch time and polls it
/// between pages; `cancel` only needs to flip the bit, never block.
#[derive(Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_for(&self, upload_id: &str) -> Arc<AtomicBool> {
        self.flags
            .lock()
            .unwrap()
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub fn cancel(&self, upload_id: &str) {
        self.handle_for(upload_id)
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_drop() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.acquire("u1").await;

        let registry2 = registry.clone();
        let handle = tokio::spawn(async move {
            let _guard = registry2.acquire("u1").await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn different_upload_ids_do_not_contend() {
        let registry = LockRegistry::new();
        let g1 = registry.acquire("u1").await;
        let g2 = registry.acquire("u2").await;
        drop(g1);
        drop(g2);
    }

    #[test]
    fn cancel_flips_only_the_named_upload() {
        use std::sync::atomic::Ordering;

        let registry = CancelRegistry::new();
        let h1 = registry.handle_for("u1");
        let h2 = registry.handle_for("u2");
        registry.cancel("u1");
        assert!(h1.load(Ordering::Relaxed));
        assert!(!h2.load(Ordering::Relaxed));
    }
}
