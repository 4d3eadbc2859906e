//! Schema CRUD endpoints (§4.3/§6): a Schema is a named, persisted
//! ExtractionConfig scoped to a workspace + company.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::models::{ExtractionConfig, Schema};

use super::super::auth::AuthContext;
use super::super::AppState;

pub async fn list_schemas(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Json<Vec<Schema>>> {
    Ok(Json(state.schemas.list(&ctx.workspace_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateSchemaBody {
    pub company: String,
    pub name: String,
    pub config: ExtractionConfig,
}

pub async fn create_schema(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(body): Json<CreateSchemaBody>,
) -> AppResult<(StatusCode, Json<Schema>)> {
    body.config.validate()?;
    let schema = Schema::new(ctx.workspace_id, body.company, body.name, body.config);
    state.schemas.insert(&schema).await?;
    Ok((StatusCode::CREATED, Json(schema)))
}

pub async fn get_schema(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<Json<Schema>> {
    let schema = state
        .schemas
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("schema not found"))?;
    Ok(Json(schema))
}

pub async fn delete_schema(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state
        .schemas
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("schema not found"))?;
    state.schemas.delete(&ctx.workspace_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_default_schema(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let schema = state
        .schemas
        .get(&ctx.workspace_id, &id)
        .await?
        .ok_or_else(|| AppError::not_found("schema not found"))?;
    state
        .schemas
        .set_default(&ctx.workspace_id, &id, &schema.company)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
