//! Upload persistence.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{DocType, ExtractState, IngestState, Upload};
use crate::schema::uploads;
use crate::{with_conn, with_conn_split};

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = uploads)]
struct UploadRow {
    id: String,
    workspace_id: String,
    original_filename: String,
    company: String,
    year: Option<i32>,
    month: Option<i32>,
    doc_type: String,
    total_pages: i32,
    state: String,
    last_message: Option<String>,
    current_page: i32,
    extract_state: String,
    cancelled: bool,
    created_at: String,
    updated_at: String,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<UploadRow> for Upload {
    fn from(r: UploadRow) -> Self {
        Upload {
            id: r.id,
            workspace_id: r.workspace_id,
            original_filename: r.original_filename,
            company: r.company,
            year: r.year,
            month: r.month,
            doc_type: DocType::from_str(&r.doc_type).unwrap_or(DocType::Pdf),
            total_pages: r.total_pages,
            state: IngestState::from_str(&r.state).unwrap_or(IngestState::Error),
            last_message: r.last_message,
            current_page: r.current_page,
            extract_state: ExtractState::from_str(&r.extract_state).unwrap_or(ExtractState::None),
            cancelled: r.cancelled,
            created_at: parse_dt(&r.created_at),
            updated_at: parse_dt(&r.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct UploadRepository {
    pool: DbPool,
}

impl UploadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, upload: &Upload) -> Result<(), DbError> {
        let created_at = upload.created_at.to_rfc3339();
        let updated_at = upload.updated_at.to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(uploads::table)
                .values((
                    uploads::id.eq(&upload.id),
                    uploads::workspace_id.eq(&upload.workspace_id),
                    uploads::original_filename.eq(&upload.original_filename),
                    uploads::company.eq(&upload.company),
                    uploads::year.eq(upload.year),
                    uploads::month.eq(upload.month),
                    uploads::doc_type.eq(upload.doc_type.as_str()),
                    uploads::total_pages.eq(upload.total_pages),
                    uploads::state.eq(upload.state.as_str()),
                    uploads::last_message.eq(&upload.last_message),
                    uploads::current_page.eq(upload.current_page),
                    uploads::extract_state.eq(upload.extract_state.as_str()),
                    uploads::cancelled.eq(upload.cancelled),
                    uploads::created_at.eq(&created_at),
                    uploads::updated_at.eq(&updated_at),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<Upload>, DbError> {
        let row: Option<UploadRow> = with_conn!(self.pool, conn, {
            uploads::table
                .filter(uploads::id.eq(id))
                .filter(uploads::workspace_id.eq(workspace_id))
                .select(UploadRow::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(row.map(Upload::from))
    }

    pub async fn list(&self, workspace_id: &str) -> Result<Vec<Upload>, DbError> {
        let rows: Vec<UploadRow> = with_conn!(self.pool, conn, {
            uploads::table
                .filter(uploads::workspace_id.eq(workspace_id))
                .order(uploads::created_at.desc())
                .select(UploadRow::as_select())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(Upload::from).collect())
    }

    /// Workspace-default schema lookup joins on `company`; this fetches
    /// the bare company string without requiring a full Upload load.
    pub async fn company_of(&self, workspace_id: &str, id: &str) -> Result<Option<String>, DbError> {
        with_conn!(self.pool, conn, {
            uploads::table
                .filter(uploads::id.eq(id))
                .filter(uploads::workspace_id.eq(workspace_id))
                .select(uploads::company)
                .first(&mut conn)
                .await
                .optional()
        })
    }

    pub async fn update_fields(
        &self,
        workspace_id: &str,
        id: &str,
        company: Option<&str>,
        year: Option<Option<i32>>,
        month: Option<Option<i32>>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            let target = uploads::table
                .filter(uploads::id.eq(id))
                .filter(uploads::workspace_id.eq(workspace_id));
            if let Some(company) = company {
                diesel::update(target)
                    .set((uploads::company.eq(company), uploads::updated_at.eq(&now)))
                    .execute(&mut conn)
                    .await?;
            }
            if let Some(year) = year {
                diesel::update(
                    uploads::table
                        .filter(uploads::id.eq(id))
                        .filter(uploads::workspace_id.eq(workspace_id)),
                )
                .set((uploads::year.eq(year), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?;
            }
            if let Some(month) = month {
                diesel::update(
                    uploads::table
                        .filter(uploads::id.eq(id))
                        .filter(uploads::workspace_id.eq(workspace_id)),
                )
                .set((uploads::month.eq(month), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?;
            }
            Ok(())
        })
    }

    /// Persist a progress transition. `current_page` is advisory per spec §4.4;
    /// callers compute it from terminal Page counts, never decrementing it here.
    pub async fn set_progress(
        &self,
        id: &str,
        state: IngestState,
        current_page: i32,
        message: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(uploads::table.filter(uploads::id.eq(id)))
                .set((
                    uploads::state.eq(state.as_str()),
                    uploads::current_page.eq(current_page),
                    uploads::last_message.eq(message),
                    uploads::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn set_total_pages(&self, id: &str, total_pages: i32) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(uploads::table.filter(uploads::id.eq(id)))
                .set((uploads::total_pages.eq(total_pages), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn set_extract_state(&self, id: &str, state: ExtractState) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(uploads::table.filter(uploads::id.eq(id)))
                .set((uploads::extract_state.eq(state.as_str()), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Optimistic compare-and-swap on `state`, per spec §5's cross-process
    /// safety note. Returns whether the swap applied.
    pub async fn cas_state(
        &self,
        id: &str,
        expected: IngestState,
        next: IngestState,
    ) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let affected: usize = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::update(
                    uploads::table
                        .filter(uploads::id.eq(id))
                        .filter(uploads::state.eq(expected.as_str())),
                )
                .set((uploads::state.eq(next.as_str()), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?
            },
            postgres: conn => {
                diesel::update(
                    uploads::table
                        .filter(uploads::id.eq(id))
                        .filter(uploads::state.eq(expected.as_str())),
                )
                .set((uploads::state.eq(next.as_str()), uploads::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?
            }
        );
        Ok(affected == 1)
    }

    pub async fn set_cancelled(&self, id: &str) -> Result<(), DbError> {
        with_conn!(self.pool, conn, {
            diesel::update(uploads::table.filter(uploads::id.eq(id)))
                .set(uploads::cancelled.eq(true))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn delete(&self, workspace_id: &str, id: &str) -> Result<(), DbError> {
        with_conn!(self.pool, conn, {
            diesel::delete(
                uploads::table
                    .filter(uploads::id.eq(id))
                    .filter(uploads::workspace_id.eq(workspace_id)),
            )
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }
}
