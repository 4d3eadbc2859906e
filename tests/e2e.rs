//! Cross-cutting integration tests driving the real axum router over a temp
//! SQLite database and a temp filesystem object store (SPEC_FULL.md §8):
//! no network OCR/VLM/LLM calls are needed for these scenarios since Pages
//! are seeded directly as `done` with known markdown, exercising extraction
//! and comparison the way a completed ingest would leave them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;

use pricetrack::cache::{InMemoryTokenBlacklist, TokenBlacklist};
use pricetrack::config::Settings;
use pricetrack::correct::CorrectionService;
use pricetrack::extract::ExtractionCache;
use pricetrack::ingest::IngestPipeline;
use pricetrack::llm::ChatClient;
use pricetrack::models::{DocType, Upload};
use pricetrack::progress::ProgressRegistry;
use pricetrack::render::RenderOptions;
use pricetrack::repository::{migrations, DbPool, PageRepository, SchemaRepository, UploadRepository};
use pricetrack::server::{create_router, AppState};
use pricetrack::store::{FsObjectStore, ObjectStore};

const WORKSPACE: &str = "ws-e2e";

#[derive(Serialize)]
struct Claims {
    sub: String,
    jti: String,
    exp: i64,
}

fn bearer_token(secret: &str, jti: &str) -> String {
    let claims = Claims {
        sub: "tester".to_string(),
        jti: jti.to_string(),
        exp: Utc::now().timestamp() + 900,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn build_state(tmp: &std::path::Path) -> AppState {
    let db_url = format!("sqlite:{}", tmp.join("test.db").display());
    migrations::run_migrations(&db_url).await.unwrap();
    let pool = DbPool::from_url(&db_url).unwrap();

    let uploads = UploadRepository::new(pool.clone());
    let pages = PageRepository::new(pool.clone());
    let schemas = SchemaRepository::new(pool.clone());

    let objects_dir = tmp.join("objects");
    std::fs::create_dir_all(&objects_dir).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(objects_dir));

    let settings = Settings {
        database_url: db_url,
        redis_url: None,
        minio_endpoint: None,
        minio_access_key: None,
        minio_secret_key: None,
        minio_secure: false,
        object_store_root: None,
        jwt_secret_key: "e2e-secret".to_string(),
        jwt_access_token_expires: 900,
        jwt_refresh_token_expires: 604_800,
        ocr_server_url: "http://localhost:0".to_string(),
        vlm_server_url: "http://localhost:0".to_string(),
        vlm_model: "vlm".to_string(),
        llm_server_url: "http://localhost:0".to_string(),
        llm_model: "llm".to_string(),
        ocr_worker_count: 1,
        render_dpi: 200.0,
        render_long_edge_px: 1540,
        bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
    };

    let chat = ChatClient::new(&settings);
    let progress = Arc::new(ProgressRegistry::new());
    let extraction_cache = Arc::new(ExtractionCache::new());
    let render_options = RenderOptions {
        dpi: settings.render_dpi,
        long_edge_px: settings.render_long_edge_px,
    };
    let pipeline = Arc::new(IngestPipeline::new(
        uploads.clone(),
        pages.clone(),
        schemas.clone(),
        store.clone(),
        chat.clone(),
        progress.clone(),
        extraction_cache.clone(),
        render_options,
        1,
    ));
    let correction = CorrectionService::new(
        pages.clone(),
        uploads.clone(),
        schemas.clone(),
        store.clone(),
        chat.clone(),
        extraction_cache.clone(),
    );
    let blacklist: Arc<dyn TokenBlacklist> = Arc::new(InMemoryTokenBlacklist::new());

    AppState {
        uploads,
        pages,
        schemas,
        store,
        chat,
        progress,
        pipeline,
        correction,
        blacklist,
        extraction_cache,
        jwt_secret: settings.jwt_secret_key,
    }
}

/// Inserts an Upload in `done` state with one Page carrying `markdown`.
async fn seed_done_upload(state: &AppState, company: &str, markdown: &str) -> String {
    let upload = Upload::new(WORKSPACE, "pricelist.pdf", company, None, None, DocType::Pdf);
    let upload_id = upload.id.clone();
    state.uploads.insert(&upload).await.unwrap();
    state.uploads.set_total_pages(&upload_id, 1).await.unwrap();
    state.pages.ensure_pending_pages(&upload_id, 1).await.unwrap();
    let page = state.pages.get(&upload_id, 1).await.unwrap().unwrap();
    state.pages.mark_done(&page.id, markdown).await.unwrap();
    state
        .uploads
        .cas_state(&upload_id, pricetrack::models::IngestState::Queued, pricetrack::models::IngestState::Done)
        .await
        .ok();
    upload_id
}

async fn post_json(app: axum::Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("authorization", format!("Bearer {token}"))
                .header("x-workspace-id", WORKSPACE)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Scenario 3 + 4 (spec.md §8): melt extraction over a parent/child price
/// table, with fill-down of the row anchor across continuation rows.
#[tokio::test]
async fn melt_extraction_with_fill_down_over_http() {
    let tmp = tempfile::tempdir().unwrap();
    let state = build_state(tmp.path()).await;
    let token = bearer_token(&state.jwt_secret, "jti-melt");

    let markdown = "# Contactors\n\n<table>\
        <tr><th>Reference</th><th colspan=\"3\">Unit MRP</th></tr>\
        <tr><th></th><th>AC-1</th><th>AC-3</th><th>AC-4</th></tr>\
        <tr><td>LC1D09</td><td>100</td><td>110</td><td>120</td></tr>\
        <tr><td>a</td><td>101</td><td>111</td><td>121</td></tr>\
        </table>";
    let upload_id = seed_done_upload(&state, "schneider", markdown).await;

    let app = create_router(state);
    let config = json!({
        "row_anchor": "Reference",
        "value_anchor": "Unit MRP",
        "melt": true,
        "include_page": true,
    });
    let (status, result) = post_json(app, &format!("/uploads/{upload_id}/extract"), &token, config).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["columns"], json!(["reference", "variant", "value", "page"]));
    assert_eq!(result["row_count"], json!(6));
    let rows = result["rows"].as_array().unwrap();
    // Every row carries the fill-down reference, including continuation row "a".
    assert!(rows.iter().all(|r| r[0] == "LC1D09"));
    let variants: Vec<&str> = rows.iter().map(|r| r[1].as_str().unwrap()).collect();
    assert!(variants.contains(&"AC-1") && variants.contains(&"AC-3") && variants.contains(&"AC-4"));
}

/// Scenario 5 (spec.md §8): a numeric value column with one non-numeric
/// cell is flagged `non_numeric_in_numeric_column`, and only that cell.
#[tokio::test]
async fn anomaly_flagging_over_http() {
    let tmp = tempfile::tempdir().unwrap();
    let state = build_state(tmp.path()).await;
    let token = bearer_token(&state.jwt_secret, "jti-anomaly");

    let mut rows = String::new();
    for i in 0..19 {
        rows.push_str(&format!("<tr><td>REF{i}</td><td>{}</td></tr>", 100 + i));
    }
    rows.push_str("<tr><td>REF19</td><td>N/A</td></tr>");
    let markdown = format!("<table><tr><th>Reference</th><th>MRP</th></tr>{rows}</table>");
    let upload_id = seed_done_upload(&state, "legrand", &markdown).await;

    let app = create_router(state);
    let config = json!({"row_anchor": "Reference", "value_anchor": "MRP"});
    let (status, result) = post_json(app, &format!("/uploads/{upload_id}/extract"), &token, config).await;

    assert_eq!(status, StatusCode::OK);
    let flags = result["flags"].as_array().unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0]["reason"], json!("non_numeric_in_numeric_column"));
    assert_eq!(result["flagged_count"], json!(1));
}

/// Scenario 7 (spec.md §8): comparison classifies new/removed/price-up rows.
#[tokio::test]
async fn comparison_classifies_price_changes_over_http() {
    let tmp = tempfile::tempdir().unwrap();
    let state = build_state(tmp.path()).await;
    let token = bearer_token(&state.jwt_secret, "jti-compare");

    let base_md = "<table><tr><th>Reference</th><th>MRP</th></tr>\
        <tr><td>LC1D09</td><td>120.00</td></tr>\
        <tr><td>LC1D12</td><td>150.00</td></tr></table>";
    let target_md = "<table><tr><th>Reference</th><th>MRP</th></tr>\
        <tr><td>LC1D09</td><td>130.00</td></tr>\
        <tr><td>LC1D18</td><td>200.00</td></tr></table>";
    let base_id = seed_done_upload(&state, "schneider", base_md).await;
    let target_id = seed_done_upload(&state, "schneider", target_md).await;

    let app = create_router(state);
    let body = json!({
        "base_upload_id": base_id,
        "target_upload_id": target_id,
        "config": {"row_anchor": "Reference", "value_anchor": "MRP"},
    });
    let (status, result) = post_json(app, "/compare", &token, body).await;

    assert_eq!(status, StatusCode::OK);
    let rows = result["rows"].as_array().unwrap();
    let find = |reference: &str| rows.iter().find(|r| r["reference"] == reference).unwrap();
    assert_eq!(find("LC1D09")["status"], json!("UP"));
    assert_eq!(find("LC1D12")["status"], json!("REMOVED"));
    assert_eq!(find("LC1D18")["status"], json!("NEW"));
}

/// Auth is enforced on the real router, not just in handler unit tests.
#[tokio::test]
async fn missing_token_is_rejected_over_http() {
    let tmp = tempfile::tempdir().unwrap();
    let state = build_state(tmp.path()).await;
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/uploads")
                .header("x-workspace-id", WORKSPACE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
