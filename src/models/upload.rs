//! Upload entity and its ingest/extract state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ingest state machine, per spec §4.4.
///
/// ```text
/// queued -> rendering -> parsing -> done
///                   \-------------> error
///    parsing -(crash)-> interrupted -(resume)-> parsing
///    done -(reparse)-> parsing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Queued,
    Rendering,
    Parsing,
    Done,
    Error,
    Interrupted,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Queued => "queued",
            IngestState::Rendering => "rendering",
            IngestState::Parsing => "parsing",
            IngestState::Done => "done",
            IngestState::Error => "error",
            IngestState::Interrupted => "interrupted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => IngestState::Queued,
            "rendering" => IngestState::Rendering,
            "parsing" => IngestState::Parsing,
            "done" => IngestState::Done,
            "error" => IngestState::Error,
            "interrupted" => IngestState::Interrupted,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Done | IngestState::Error)
    }
}

/// Extract state machine for the auto-triggered default-schema extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractState {
    None,
    Running,
    Done,
    Error,
    NoConfig,
}

impl ExtractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractState::None => "none",
            ExtractState::Running => "running",
            ExtractState::Done => "done",
            ExtractState::Error => "error",
            ExtractState::NoConfig => "no_config",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "none" => ExtractState::None,
            "running" => ExtractState::Running,
            "done" => ExtractState::Done,
            "error" => ExtractState::Error,
            "no_config" => ExtractState::NoConfig,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Image,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Pdf => "pdf",
            DocType::Image => "image",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pdf" => DocType::Pdf,
            "image" => DocType::Image,
            _ => return None,
        })
    }
}

/// A single ingested vendor pricelist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub workspace_id: String,
    pub original_filename: String,
    pub company: String,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub doc_type: DocType,
    pub total_pages: i32,
    pub state: IngestState,
    pub last_message: Option<String>,
    pub current_page: i32,
    pub extract_state: ExtractState,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(
        workspace_id: impl Into<String>,
        original_filename: impl Into<String>,
        company: impl Into<String>,
        year: Option<i32>,
        month: Option<i32>,
        doc_type: DocType,
    ) -> Self {
        let now = Utc::now();
        Upload {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            original_filename: original_filename.into(),
            company: company.into(),
            year,
            month,
            doc_type,
            total_pages: 0,
            state: IngestState::Queued,
            last_message: None,
            current_page: 0,
            extract_state: ExtractState::None,
            cancelled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_state_round_trips_through_str() {
        for s in [
            IngestState::Queued,
            IngestState::Rendering,
            IngestState::Parsing,
            IngestState::Done,
            IngestState::Error,
            IngestState::Interrupted,
        ] {
            assert_eq!(IngestState::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn unknown_state_string_is_none() {
        assert_eq!(IngestState::from_str("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(IngestState::Done.is_terminal());
        assert!(IngestState::Error.is_terminal());
        assert!(!IngestState::Parsing.is_terminal());
        assert!(!IngestState::Interrupted.is_terminal());
    }
}
