//! Progress Channel (C10): per-upload publish/subscribe of state-update
//! records consumed by SSE clients. A late subscriber receives the latest
//! record immediately, then every subsequent one until the terminal record,
//! at which point the channel closes.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{ExtractState, IngestState};

/// One progress snapshot for an Upload.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub state: IngestState,
    pub current_page: i32,
    pub total_pages: i32,
    pub message: Option<String>,
    pub extract_state: ExtractState,
}

impl ProgressRecord {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Registry of live per-upload channels. Entries are removed once the
/// terminal record has been published, per §4.10 ("the channel... closes").
#[derive(Default)]
pub struct ProgressRegistry {
    channels: Mutex<HashMap<String, watch::Sender<Option<ProgressRecord>>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a record for `upload_id`, creating the channel if needed.
    /// Publish is wait-free for the producer: `watch::Sender::send` never
    /// blocks on slow subscribers.
    pub fn publish(&self, upload_id: &str, record: ProgressRecord) {
        let terminal = record.is_terminal();
        let mut channels = self.channels.lock().unwrap();
        match channels.get(upload_id) {
            Some(tx) => {
                let _ = tx.send(Some(record));
            }
            None => {
                let (tx, _rx) = watch::channel(Some(record));
                channels.insert(upload_id.to_string(), tx);
            }
        }
        if terminal {
            channels.remove(upload_id);
        }
    }

    /// Subscribe to `upload_id`'s live channel. Returns `None` if the
    /// upload has no active channel (already terminal, or never started);
    /// callers fall back to a single fetch-and-close from the repository.
    pub fn subscribe(&self, upload_id: &str) -> Option<watch::Receiver<Option<ProgressRecord>>> {
        self.channels
            .lock()
            .unwrap()
            .get(upload_id)
            .map(|tx| tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: IngestState, page: i32) -> ProgressRecord {
        ProgressRecord {
            state,
            current_page: page,
            total_pages: 10,
            message: None,
            extract_state: ExtractState::None,
        }
    }

    #[tokio::test]
    async fn late_subscriber_receives_latest_then_new_records() {
        let registry = ProgressRegistry::new();
        registry.publish("u1", record(IngestState::Parsing, 3));

        let mut rx = registry.subscribe("u1").unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().current_page, 3);

        registry.publish("u1", record(IngestState::Parsing, 4));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().current_page, 4);
    }

    #[test]
    fn channel_is_removed_after_terminal_record() {
        let registry = ProgressRegistry::new();
        registry.publish("u1", record(IngestState::Done, 10));
        assert!(registry.subscribe("u1").is_none());
    }

    #[test]
    fn unknown_upload_has_no_channel() {
        let registry = ProgressRegistry::new();
        assert!(registry.subscribe("missing").is_none());
    }
}
