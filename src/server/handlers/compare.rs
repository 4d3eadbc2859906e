//! Comparator endpoint (§4.9/§6): extracts two uploads under the same
//! config and classifies each reference/variant pair by price or
//! availability change.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::compare::{self as comparator, ComparisonResult};
use crate::errors::{AppError, AppResult};
use crate::models::{ExtractionConfig, PageState};

use super::super::auth::AuthContext;
use super::super::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareBody {
    pub base_upload_id: String,
    pub target_upload_id: String,
    pub config: ExtractionConfig,
}

async fn extract_upload(
    state: &AppState,
    ctx: &AuthContext,
    upload_id: &str,
    config: &ExtractionConfig,
) -> AppResult<crate::extract::ExtractionResult> {
    state
        .uploads
        .get(&ctx.workspace_id, upload_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("upload {upload_id} not found")))?;
    if let Some(cached) = state.extraction_cache.get(upload_id, config) {
        return Ok(cached);
    }
    let pages = state.pages.list_for_upload(upload_id).await?;
    let done: Vec<(i32, String)> = pages
        .into_iter()
        .filter(|p| p.state == PageState::Done)
        .filter_map(|p| p.markdown.map(|md| (p.page_num, md)))
        .collect();
    let result = crate::extract::run(&done, config)?;
    state
        .extraction_cache
        .put(upload_id, config.clone(), result.clone());
    Ok(result)
}

async fn run_comparison(
    state: &AppState,
    ctx: &AuthContext,
    body: &CompareBody,
) -> AppResult<ComparisonResult> {
    body.config.validate()?;
    let base = extract_upload(state, ctx, &body.base_upload_id, &body.config).await?;
    let target = extract_upload(state, ctx, &body.target_upload_id, &body.config).await?;
    Ok(comparator::compare(&base, &target))
}

pub async fn compare(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(body): Json<CompareBody>,
) -> AppResult<Json<ComparisonResult>> {
    Ok(Json(run_comparison(&state, &ctx, &body).await?))
}

pub async fn compare_csv(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(body): Json<CompareBody>,
) -> AppResult<Response> {
    let result = run_comparison(&state, &ctx, &body).await?;
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record([
        "reference",
        "variant",
        "status",
        "base_value",
        "target_value",
        "absolute_change",
        "percent_change",
        "base_page",
        "target_page",
    ])?;
    for row in &result.rows {
        writer.write_record([
            row.reference.clone(),
            row.variant.clone().unwrap_or_default(),
            serde_json::to_value(row.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            row.base_value.clone().unwrap_or_default(),
            row.target_value.clone().unwrap_or_default(),
            row.absolute_change.map(|v| v.to_string()).unwrap_or_default(),
            row.percent_change.map(|v| v.to_string()).unwrap_or_default(),
            row.base_page.map(|v| v.to_string()).unwrap_or_default(),
            row.target_page.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    let csv_bytes = writer
        .into_inner()
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv_bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::server::{auth::test_support::sign, create_router, tests_support::test_state};

    #[tokio::test]
    async fn compare_against_missing_uploads_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-compare");
        let app = create_router(state);

        let body = serde_json::json!({
            "base_upload_id": "missing-base",
            "target_upload_id": "missing-target",
            "config": {"row_anchor": "ref", "value_anchor": "mrp"},
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/compare")
                    .header("authorization", format!("Bearer {token}"))
                    .header("x-workspace-id", "ws-1")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
