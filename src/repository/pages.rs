//! Page persistence: per-page OCR state, transitions, and markdown.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Page, PageState};
use crate::schema::pages;
use crate::with_conn;

use super::pool::{DbError, DbPool};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pages)]
struct PageRow {
    id: String,
    upload_id: String,
    page_num: i32,
    markdown: Option<String>,
    state: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<PageRow> for Page {
    fn from(r: PageRow) -> Self {
        Page {
            id: r.id,
            upload_id: r.upload_id,
            page_num: r.page_num,
            markdown: r.markdown,
            state: PageState::from_str(&r.state).unwrap_or(PageState::Error),
            error: r.error,
            created_at: parse_dt(&r.created_at),
            updated_at: parse_dt(&r.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct PageRepository {
    pool: DbPool,
}

impl PageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create one pending Page per page number, idempotently (spec §4.4 step 1):
    /// an existing row for `(upload_id, page_num)` is left untouched.
    pub async fn ensure_pending_pages(
        &self,
        upload_id: &str,
        total_pages: i32,
    ) -> Result<(), DbError> {
        for page_num in 1..=total_pages {
            let existing: Option<String> = with_conn!(self.pool, conn, {
                pages::table
                    .filter(pages::upload_id.eq(upload_id))
                    .filter(pages::page_num.eq(page_num))
                    .select(pages::id)
                    .first(&mut conn)
                    .await
                    .optional()
            })?;
            if existing.is_some() {
                continue;
            }
            let page = Page::new_pending(upload_id, page_num);
            let created_at = page.created_at.to_rfc3339();
            let updated_at = page.updated_at.to_rfc3339();
            with_conn!(self.pool, conn, {
                diesel::insert_into(pages::table)
                    .values((
                        pages::id.eq(&page.id),
                        pages::upload_id.eq(&page.upload_id),
                        pages::page_num.eq(page.page_num),
                        pages::markdown.eq(&page.markdown),
                        pages::state.eq(page.state.as_str()),
                        pages::error.eq(&page.error),
                        pages::created_at.eq(&created_at),
                        pages::updated_at.eq(&updated_at),
                    ))
                    .execute(&mut conn)
                    .await?;
                Ok(())
            })?;
        }
        Ok(())
    }

    pub async fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Page>, DbError> {
        let rows: Vec<PageRow> = with_conn!(self.pool, conn, {
            pages::table
                .filter(pages::upload_id.eq(upload_id))
                .order(pages::page_num.asc())
                .select(PageRow::as_select())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(Page::from).collect())
    }

    pub async fn get(&self, upload_id: &str, page_num: i32) -> Result<Option<Page>, DbError> {
        let row: Option<PageRow> = with_conn!(self.pool, conn, {
            pages::table
                .filter(pages::upload_id.eq(upload_id))
                .filter(pages::page_num.eq(page_num))
                .select(PageRow::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(row.map(Page::from))
    }

    /// Pages dispatched into the OCR worker pool: `pending` or `error` (resume),
    /// ascending page_num, per spec §4.4 step 2 / §4.4 "Resume".
    pub async fn claimable(&self, upload_id: &str) -> Result<Vec<Page>, DbError> {
        let rows: Vec<PageRow> = with_conn!(self.pool, conn, {
            pages::table
                .filter(pages::upload_id.eq(upload_id))
                .filter(pages::state.eq("pending").or(pages::state.eq("error")))
                .order(pages::page_num.asc())
                .select(PageRow::as_select())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(Page::from).collect())
    }

    pub async fn mark_running(&self, id: &str) -> Result<(), DbError> {
        self.set_state(id, PageState::Running, None, None).await
    }

    pub async fn mark_done(&self, id: &str, markdown: &str) -> Result<(), DbError> {
        self.set_state(id, PageState::Done, Some(markdown), None)
            .await
    }

    pub async fn mark_error(&self, id: &str, error: &str) -> Result<(), DbError> {
        self.set_state(id, PageState::Error, None, Some(error))
            .await
    }

    async fn set_state(
        &self,
        id: &str,
        state: PageState,
        markdown: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(pages::table.filter(pages::id.eq(id)))
                .set((
                    pages::state.eq(state.as_str()),
                    pages::markdown.eq(markdown),
                    pages::error.eq(error),
                    pages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Revert any page stuck in `running` back to `pending` on process start,
    /// per spec §5's "abandons remaining pages in `running`" shutdown note.
    pub async fn requeue_running(&self, upload_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                pages::table
                    .filter(pages::upload_id.eq(upload_id))
                    .filter(pages::state.eq("running")),
            )
            .set((pages::state.eq("pending"), pages::updated_at.eq(&now)))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    /// Reset every page to `pending`, used by reparse (spec §4.4 "Resume").
    pub async fn reset_all_to_pending(&self, upload_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(pages::table.filter(pages::upload_id.eq(upload_id)))
                .set((
                    pages::state.eq("pending"),
                    pages::error.eq::<Option<&str>>(None),
                    pages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// `current_page` is counted from terminal Pages, per spec §5's ordering
    /// guarantee ("reflects the count of terminal Pages").
    pub async fn terminal_count(&self, upload_id: &str) -> Result<i32, DbError> {
        use diesel::dsl::count_star;
        let count: i64 = with_conn!(self.pool, conn, {
            pages::table
                .filter(pages::upload_id.eq(upload_id))
                .filter(pages::state.eq("done").or(pages::state.eq("error")))
                .select(count_star())
                .first(&mut conn)
                .await
        })?;
        Ok(count as i32)
    }

    pub async fn all_terminal(&self, upload_id: &str) -> Result<bool, DbError> {
        use diesel::dsl::count_star;
        let pending: i64 = with_conn!(self.pool, conn, {
            pages::table
                .filter(pages::upload_id.eq(upload_id))
                .filter(pages::state.eq("pending").or(pages::state.eq("running")))
                .select(count_star())
                .first(&mut conn)
                .await
        })?;
        Ok(pending == 0)
    }

    pub async fn delete_for_upload(&self, upload_id: &str) -> Result<(), DbError> {
        with_conn!(self.pool, conn, {
            diesel::delete(pages::table.filter(pages::upload_id.eq(upload_id)))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }
}
