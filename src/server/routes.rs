//! Router configuration: every endpoint spec.md §6 lists, wired onto
//! `handlers/` with a permissive CORS layer and axum 0.7 `:param` path
//! syntax.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(handlers::uploads::create_upload))
        .route(
            "/uploads",
            get(handlers::uploads::list_uploads),
        )
        .route(
            "/uploads/:id",
            get(handlers::uploads::get_upload)
                .put(handlers::uploads::update_upload)
                .delete(handlers::uploads::delete_upload),
        )
        .route(
            "/uploads/:id/resume",
            post(handlers::uploads::resume_upload),
        )
        .route(
            "/uploads/:id/reparse",
            post(handlers::uploads::reparse_upload),
        )
        .route(
            "/uploads/:id/status",
            get(handlers::sse::upload_status),
        )
        .route("/uploads/:id/pages", get(handlers::pages::list_pages))
        .route(
            "/uploads/:id/page-states",
            get(handlers::pages::page_states),
        )
        .route("/uploads/:id/page/:n", get(handlers::pages::get_page))
        .route(
            "/uploads/:id/page/:n/tables",
            get(handlers::pages::page_tables),
        )
        .route(
            "/uploads/:id/page/:n/validate-table",
            post(handlers::pages::validate_table),
        )
        .route(
            "/uploads/:id/page/:n/apply-correction",
            post(handlers::pages::apply_correction),
        )
        .route(
            "/uploads/:id/scan-columns",
            post(handlers::pages::scan_columns),
        )
        .route("/uploads/:id/extract", post(handlers::extract::extract))
        .route(
            "/uploads/:id/extract/csv",
            post(handlers::extract::extract_csv),
        )
        .route(
            "/schemas",
            get(handlers::schemas::list_schemas).post(handlers::schemas::create_schema),
        )
        .route(
            "/schemas/:id",
            get(handlers::schemas::get_schema).delete(handlers::schemas::delete_schema),
        )
        .route(
            "/schemas/:id/set-default",
            post(handlers::schemas::set_default_schema),
        )
        .route("/compare", post(handlers::compare::compare))
        .route("/compare/csv", post(handlers::compare::compare_csv))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
