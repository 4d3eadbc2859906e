//! Page entity: one rendered+OCR'd page of an Upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Running,
    Done,
    Error,
}

impl PageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageState::Pending => "pending",
            PageState::Running => "running",
            PageState::Done => "done",
            PageState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => PageState::Pending,
            "running" => PageState::Running,
            "done" => PageState::Done,
            "error" => PageState::Error,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PageState::Done | PageState::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub upload_id: String,
    pub page_num: i32,
    pub markdown: Option<String>,
    pub state: PageState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new_pending(upload_id: impl Into<String>, page_num: i32) -> Self {
        let now = Utc::now();
        Page {
            id: uuid::Uuid::new_v4().to_string(),
            upload_id: upload_id.into(),
            page_num,
            markdown: None,
            state: PageState::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_state_round_trips() {
        for s in [
            PageState::Pending,
            PageState::Running,
            PageState::Done,
            PageState::Error,
        ] {
            assert_eq!(PageState::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn done_implies_would_carry_markdown() {
        let mut page = Page::new_pending("u1", 1);
        page.state = PageState::Done;
        page.markdown = Some("# hi".into());
        assert!(page.state.is_terminal());
        assert!(page.markdown.is_some());
    }
}
