//! `POST /upload`, `GET /uploads`, and per-upload metadata/lifecycle
//! endpoints (spec.md §6).

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::ingest;
use crate::models::{DocType, Upload};
use crate::store;

use super::super::auth::AuthContext;
use super::super::AppState;

#[derive(Debug, Serialize)]
pub struct UploadCreated {
    pub id: String,
}

fn detect_doc_type(bytes: &[u8]) -> AppResult<DocType> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type() == "application/pdf" => Ok(DocType::Pdf),
        Some(kind) if kind.mime_type().starts_with("image/") => Ok(DocType::Image),
        _ => Err(AppError::validation(
            "unsupported file type; expected pdf, png, or jpeg",
        )),
    }
}

/// `POST /upload` (multipart: `file`, `company`, optional `year`/`month`).
/// Persists the Upload row and original bytes, then fires the Ingest
/// Pipeline in the background (§4.4).
pub async fn create_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadCreated>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename = "upload".to_string();
    let mut company: Option<String> = None;
    let mut year: Option<i32> = None;
    let mut month: Option<i32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.to_string()))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                filename = field.file_name().unwrap_or("upload").to_string();
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::validation(e.to_string()))?
                        .to_vec(),
                );
            }
            "company" => {
                company = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation(e.to_string()))?,
                );
            }
            "year" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(e.to_string()))?;
                year = text.trim().parse().ok();
            }
            "month" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(e.to_string()))?;
                month = text.trim().parse().ok();
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::validation("missing file field"))?;
    let company = company.ok_or_else(|| AppError::validation("missing company field"))?;
    let doc_type = detect_doc_type(&bytes)?;

    let upload = Upload::new(
        ctx.workspace_id.clone(),
        filename,
        company,
        year,
        month,
        doc_type,
    );
    state.uploads.insert(&upload).await?;

    let content_type = match doc_type {
        DocType::Pdf => "application/pdf",
        DocType::Image => "image/png",
    };
    let key = ingest::original_key(&upload.id, doc_type);
    state
        .store
        .put(store::BUCKET_PDFS, &key, &bytes, content_type)
        .await?;

    state.pipeline.spawn(ctx.workspace_id, upload.id.clone());

    Ok((StatusCode::CREATED, Json(UploadCreated { id: upload.id })))
}

pub async fn list_uploads(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Json<Vec<Upload>>> {
    Ok(Json(state.uploads.list(&ctx.workspace_id).await?))
}

pub async fn get_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<Json<Upload>> {
    let upload = state
        .uploads
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("upload not found"))?;
    Ok(Json(upload))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUploadBody {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<i32>,
}

/// `PUT /uploads/{id}`. Clearing `year`/`month` back to null is out of
/// scope for this endpoint; only setting a value is supported.
pub async fn update_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
    Json(body): Json<UpdateUploadBody>,
) -> AppResult<StatusCode> {
    state
        .uploads
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("upload not found"))?;
    state
        .uploads
        .update_fields(
            &ctx.workspace_id,
            &id,
            body.company.as_deref(),
            body.year.map(Some),
            body.month.map(Some),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /uploads/{id}`: cascade-deletes pages and the object-store
/// artifacts (original, rendered pages, cached CSV).
pub async fn delete_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state
        .uploads
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("upload not found"))?;

    state.pipeline.cancel(&id);
    state.pages.delete_for_upload(&id).await?;
    state.uploads.delete(&ctx.workspace_id, &id).await?;
    state.store.delete_prefix(store::BUCKET_PDFS, &id).await?;
    state.store.delete_prefix(store::BUCKET_PAGES, &id).await?;
    state
        .store
        .delete_prefix(store::BUCKET_OUTPUT, &format!("{id}.csv"))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.pipeline.resume(&ctx.workspace_id, &id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn reparse_upload(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.pipeline.reparse(&ctx.workspace_id, &id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::server::{create_router, tests_support::test_state};

    #[tokio::test]
    async fn list_uploads_is_empty_for_a_fresh_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let token = crate::server::auth::test_support::sign(&state.jwt_secret, "jti-list");
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/uploads")
                    .header("authorization", format!("Bearer {token}"))
                    .header("x-workspace-id", "ws-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn get_upload_without_token_is_unauthorized() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/uploads/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn get_missing_upload_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let token = crate::server::auth::test_support::sign(&state.jwt_secret, "jti-get");
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/uploads/does-not-exist")
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
