//! Per-page inspection and correction endpoints (spec.md §6, C5/C6/C8).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::extract::resolver;
use crate::extract::table::{parse_tables, Table};
use crate::models::ExtractionConfig;
use crate::store;

use super::super::auth::AuthContext;
use super::super::AppState;

async fn owned_upload(
    state: &AppState,
    ctx: &AuthContext,
    upload_id: &str,
) -> AppResult<()> {
    state
        .uploads
        .get(&ctx.workspace_id, upload_id)
        .await?
        .ok_or_else(|| AppError::not_found("upload not found"))?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PageListing {
    pub page_num: i32,
    pub image_key: String,
}

pub async fn list_pages(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(upload_id): Path<String>,
) -> AppResult<Json<Vec<PageListing>>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let pages = state.pages.list_for_upload(&upload_id).await?;
    Ok(Json(
        pages
            .into_iter()
            .map(|p| PageListing {
                page_num: p.page_num,
                image_key: store::upload_prefixed(&upload_id, &store::page_key(p.page_num)),
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct PageStateEntry {
    pub page_num: i32,
    pub state: String,
}

pub async fn page_states(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(upload_id): Path<String>,
) -> AppResult<Json<Vec<PageStateEntry>>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let pages = state.pages.list_for_upload(&upload_id).await?;
    Ok(Json(
        pages
            .into_iter()
            .map(|p| PageStateEntry {
                page_num: p.page_num,
                state: p.state.as_str().to_string(),
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct PageDetail {
    pub markdown: Option<String>,
    pub state: String,
    pub error: Option<String>,
}

pub async fn get_page(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path((upload_id, page_num)): Path<(String, i32)>,
) -> AppResult<Json<PageDetail>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let page = state
        .pages
        .get(&upload_id, page_num)
        .await?
        .ok_or_else(|| AppError::not_found("page not found"))?;
    Ok(Json(PageDetail {
        markdown: page.markdown,
        state: page.state.as_str().to_string(),
        error: page.error,
    }))
}

pub async fn page_tables(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path((upload_id, page_num)): Path<(String, i32)>,
) -> AppResult<Json<Vec<Table>>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let page = state
        .pages
        .get(&upload_id, page_num)
        .await?
        .ok_or_else(|| AppError::not_found("page not found"))?;
    let markdown = page.markdown.unwrap_or_default();
    Ok(Json(parse_tables(&markdown)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateTableBody {
    pub table_index: usize,
    pub method: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateTableResponse {
    pub original_html: String,
    pub corrected_html: String,
    pub changed: bool,
}

pub async fn validate_table(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path((upload_id, page_num)): Path<(String, i32)>,
    Json(body): Json<ValidateTableBody>,
) -> AppResult<Json<ValidateTableResponse>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let outcome = match body.method.as_str() {
        "vlm" => {
            state
                .correction
                .validate_vlm(&upload_id, page_num, body.table_index)
                .await?
        }
        "llm" => {
            state
                .correction
                .validate_llm(&upload_id, page_num, body.table_index)
                .await?
        }
        other => return Err(AppError::validation(format!("unknown correction method {other}"))),
    };
    Ok(Json(ValidateTableResponse {
        original_html: outcome.original_html,
        corrected_html: outcome.corrected_html,
        changed: outcome.changed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApplyCorrectionBody {
    pub table_index: usize,
    pub corrected_html: String,
}

pub async fn apply_correction(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path((upload_id, page_num)): Path<(String, i32)>,
    Json(body): Json<ApplyCorrectionBody>,
) -> AppResult<StatusCode> {
    owned_upload(&state, &ctx, &upload_id).await?;
    state
        .correction
        .apply(
            &ctx.workspace_id,
            &upload_id,
            page_num,
            body.table_index,
            &body.corrected_html,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ScanColumnsBody {
    pub row_anchor: String,
    pub value_anchor: String,
}

#[derive(Debug, Serialize)]
pub struct ScanColumnsResponse {
    /// Column display strings seen across every Done page's tables that
    /// the probe config resolves against, excluding `value_anchor` itself.
    pub candidate_extras: Vec<String>,
}

/// `POST /uploads/{id}/scan-columns`: resolves a minimal probe config
/// against every page's tables and surfaces the other columns found
/// alongside the matched value column, as candidates for `extras` (§4.6).
pub async fn scan_columns(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(upload_id): Path<String>,
    Json(body): Json<ScanColumnsBody>,
) -> AppResult<Json<ScanColumnsResponse>> {
    owned_upload(&state, &ctx, &upload_id).await?;
    let probe = ExtractionConfig {
        row_anchor: body.row_anchor,
        value_anchor: body.value_anchor,
        extras: Vec::new(),
        include_page: false,
        include_heading: false,
        fill_down_value: false,
        match_child: None,
        melt: false,
    };
    probe.validate()?;

    let pages = state.pages.list_for_upload(&upload_id).await?;
    let mut seen = std::collections::BTreeSet::new();
    for page in pages {
        let Some(markdown) = page.markdown else { continue };
        for table in parse_tables(&markdown) {
            let Some(resolved) = resolver::resolve(&table, &probe) else {
                continue;
            };
            for col in &resolved.table.columns {
                if col.normalized_child != resolver::normalize(&probe.value_anchor)
                    && col.normalized_parent != resolver::normalize(&probe.value_anchor)
                {
                    seen.insert(col.display());
                }
            }
        }
    }
    Ok(Json(ScanColumnsResponse {
        candidate_extras: seen.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::server::{auth::test_support::sign, create_router, tests_support::test_state};

    #[tokio::test]
    async fn get_page_for_missing_upload_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-pages");
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/uploads/missing/page/1")
                    .header("authorization", format!("Bearer {token}"))
                    .header("x-workspace-id", "ws-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
