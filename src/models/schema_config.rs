//! ExtractionConfig (closed, versioned input to the Column Resolver) and
//! Schema (a named, persisted ExtractionConfig scoped to a workspace+company).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// A closed, versioned description of how to pull rows out of a Table.
/// Unknown fields are rejected per spec §9's "ad-hoc JSON schema" redesign note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    pub row_anchor: String,
    pub value_anchor: String,
    #[serde(default)]
    pub extras: Vec<String>,
    #[serde(default)]
    pub include_page: bool,
    #[serde(default)]
    pub include_heading: bool,
    #[serde(default)]
    pub fill_down_value: bool,
    /// Pin mode: resolve value_anchor against this specific child header.
    #[serde(default)]
    pub match_child: Option<String>,
    /// Melt mode: unpivot every child column under value_anchor's parent.
    #[serde(default)]
    pub melt: bool,
}

impl ExtractionConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.row_anchor.trim().is_empty() {
            return Err(AppError::validation("row_anchor must not be empty"));
        }
        if self.value_anchor.trim().is_empty() {
            return Err(AppError::validation("value_anchor must not be empty"));
        }
        if self.melt && self.match_child.is_some() {
            return Err(AppError::validation(
                "melt and match_child are mutually exclusive",
            ));
        }
        Ok(())
    }
}

/// A named, persisted ExtractionConfig for a (workspace, company).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    pub workspace_id: String,
    pub company: String,
    pub name: String,
    pub config: ExtractionConfig,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema {
    pub fn new(
        workspace_id: impl Into<String>,
        company: impl Into<String>,
        name: impl Into<String>,
        config: ExtractionConfig,
    ) -> Self {
        let now = Utc::now();
        Schema {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            company: company.into(),
            name: name.into(),
            config,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }
}
