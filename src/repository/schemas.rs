//! Schema (named, persisted ExtractionConfig) persistence.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::errors::AppError;
use crate::models::{ExtractionConfig, Schema};
use crate::schema::schemas;
use crate::with_conn;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schemas)]
struct SchemaRow {
    id: String,
    workspace_id: String,
    company: String,
    name: String,
    row_anchor: String,
    value_anchor: String,
    extras_json: String,
    include_page: bool,
    include_heading: bool,
    fill_down_value: bool,
    match_child: Option<String>,
    melt: bool,
    is_default: bool,
    created_at: String,
    updated_at: String,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl TryFrom<SchemaRow> for Schema {
    type Error = AppError;

    fn try_from(r: SchemaRow) -> Result<Self, Self::Error> {
        let extras: Vec<String> = serde_json::from_str(&r.extras_json)?;
        Ok(Schema {
            id: r.id,
            workspace_id: r.workspace_id,
            company: r.company,
            name: r.name,
            config: ExtractionConfig {
                row_anchor: r.row_anchor,
                value_anchor: r.value_anchor,
                extras,
                include_page: r.include_page,
                include_heading: r.include_heading,
                fill_down_value: r.fill_down_value,
                match_child: r.match_child,
                melt: r.melt,
            },
            is_default: r.is_default,
            created_at: parse_dt(&r.created_at),
            updated_at: parse_dt(&r.updated_at),
        })
    }
}

#[derive(Clone)]
pub struct SchemaRepository {
    pool: DbPool,
}

impl SchemaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, schema: &Schema) -> Result<(), DbError> {
        let extras_json = serde_json::to_string(&schema.config.extras)
            .map_err(|e| super::util::to_diesel_error(e.to_string()))?;
        let created_at = schema.created_at.to_rfc3339();
        let updated_at = schema.updated_at.to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(schemas::table)
                .values((
                    schemas::id.eq(&schema.id),
                    schemas::workspace_id.eq(&schema.workspace_id),
                    schemas::company.eq(&schema.company),
                    schemas::name.eq(&schema.name),
                    schemas::row_anchor.eq(&schema.config.row_anchor),
                    schemas::value_anchor.eq(&schema.config.value_anchor),
                    schemas::extras_json.eq(&extras_json),
                    schemas::include_page.eq(schema.config.include_page),
                    schemas::include_heading.eq(schema.config.include_heading),
                    schemas::fill_down_value.eq(schema.config.fill_down_value),
                    schemas::match_child.eq(&schema.config.match_child),
                    schemas::melt.eq(schema.config.melt),
                    schemas::is_default.eq(schema.is_default),
                    schemas::created_at.eq(&created_at),
                    schemas::updated_at.eq(&updated_at),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn list(&self, workspace_id: &str) -> Result<Vec<Schema>, AppError> {
        let rows: Vec<SchemaRow> = with_conn!(self.pool, conn, {
            schemas::table
                .filter(schemas::workspace_id.eq(workspace_id))
                .order(schemas::created_at.desc())
                .select(SchemaRow::as_select())
                .load(&mut conn)
                .await
        })?;
        rows.into_iter().map(Schema::try_from).collect()
    }

    pub async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<Schema>, AppError> {
        let row: Option<SchemaRow> = with_conn!(self.pool, conn, {
            schemas::table
                .filter(schemas::id.eq(id))
                .filter(schemas::workspace_id.eq(workspace_id))
                .select(SchemaRow::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        row.map(Schema::try_from).transpose()
    }

    /// The workspace-default Schema for a company, consumed by the Ingest
    /// Pipeline's auto-extraction step (spec §4.4 step 4).
    pub async fn default_for_company(
        &self,
        workspace_id: &str,
        company: &str,
    ) -> Result<Option<Schema>, AppError> {
        let row: Option<SchemaRow> = with_conn!(self.pool, conn, {
            schemas::table
                .filter(schemas::workspace_id.eq(workspace_id))
                .filter(schemas::company.eq(company))
                .filter(schemas::is_default.eq(true))
                .select(SchemaRow::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        row.map(Schema::try_from).transpose()
    }

    /// Sets `id` as the sole default for its (workspace, company), clearing
    /// any previous default first (spec §3: "at most one is_default per
    /// (workspace, company)").
    pub async fn set_default(&self, workspace_id: &str, id: &str, company: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                schemas::table
                    .filter(schemas::workspace_id.eq(workspace_id))
                    .filter(schemas::company.eq(company)),
            )
            .set((schemas::is_default.eq(false), schemas::updated_at.eq(&now)))
            .execute(&mut conn)
            .await?;

            diesel::update(
                schemas::table
                    .filter(schemas::id.eq(id))
                    .filter(schemas::workspace_id.eq(workspace_id)),
            )
            .set((schemas::is_default.eq(true), schemas::updated_at.eq(&now)))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    pub async fn delete(&self, workspace_id: &str, id: &str) -> Result<(), DbError> {
        with_conn!(self.pool, conn, {
            diesel::delete(
                schemas::table
                    .filter(schemas::id.eq(id))
                    .filter(schemas::workspace_id.eq(workspace_id)),
            )
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }
}
