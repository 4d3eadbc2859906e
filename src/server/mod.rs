//! HTTP surface (§4.12, spec.md §6): `AppState` bundles every collaborator
//! a handler might need; `routes::create_router` wires spec.md §6's route
//! list onto `handlers/`.

pub mod auth;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::cache::{InMemoryTokenBlacklist, RedisTokenBlacklist, TokenBlacklist};
use crate::config::Settings;
use crate::correct::CorrectionService;
use crate::errors::AppResult;
use crate::extract::ExtractionCache;
use crate::ingest::IngestPipeline;
use crate::llm::ChatClient;
use crate::progress::ProgressRegistry;
use crate::render::RenderOptions;
use crate::repository::{migrations, DbPool, PageRepository, SchemaRepository, UploadRepository};
use crate::store::{FsObjectStore, ObjectStore};

pub use routes::create_router;

/// Shared state for every handler. Cloning is cheap: every field is either
/// an `Arc` or itself internally `Arc`-backed (the repositories wrap a
/// `DbPool`, which is cheap to clone).
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadRepository,
    pub pages: PageRepository,
    pub schemas: SchemaRepository,
    pub store: Arc<dyn ObjectStore>,
    pub chat: ChatClient,
    pub progress: Arc<ProgressRegistry>,
    pub pipeline: Arc<IngestPipeline>,
    pub correction: CorrectionService,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub extraction_cache: Arc<ExtractionCache>,
    pub jwt_secret: String,
}

impl AppState {
    pub async fn new(settings: &Settings) -> AppResult<Self> {
        migrations::run_migrations(&settings.database_url).await?;
        let pool = DbPool::from_url(&settings.database_url)?;

        let uploads = UploadRepository::new(pool.clone());
        let pages = PageRepository::new(pool.clone());
        let schemas = SchemaRepository::new(pool.clone());

        let store_root = settings
            .object_store_root
            .clone()
            .unwrap_or_else(|| "./data/objects".to_string());
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(store_root));

        let chat = ChatClient::new(settings);
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
            settings.ocr_worker_count,
        ));
        let correction = CorrectionService::new(
            pages.clone(),
            uploads.clone(),
            schemas.clone(),
            store.clone(),
            chat.clone(),
            extraction_cache.clone(),
        );

        let blacklist: Arc<dyn TokenBlacklist> = match &settings.redis_url {
            Some(url) => Arc::new(RedisTokenBlacklist::connect(url).await?),
            None => Arc::new(InMemoryTokenBlacklist::new()),
        };

        Ok(Self {
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
            jwt_secret: settings.jwt_secret_key.clone(),
        })
    }
}

/// Start the HTTP server; binds `settings.bind_addr` and serves until
/// shutdown.
pub async fn serve(settings: &Settings) -> AppResult<()> {
    tracing::info!(
        addr = %settings.bind_addr,
        database_url = %crate::repository::util::redact_url_password(&settings.database_url),
        "starting pricetrack server"
    );
    let state = AppState::new(settings).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .map_err(|e| crate::errors::AppError::internal(format!("failed to bind {}: {e}", settings.bind_addr)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::errors::AppError::internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
pub mod tests_support {
    use super::*;
    use crate::llm::ChatClient;

    /// Builds an `AppState` over a temp SQLite db and temp filesystem object
    /// store, without a running OCR/VLM/LLM server — good enough for
    /// handler tests that never reach the pipeline's worker pool (schema
    /// CRUD, upload metadata, auth rejection).
    pub async fn test_state(tmp: &std::path::Path) -> AppState {
        let db_path = tmp.join("test.db");
        let db_url = format!("sqlite:{}", db_path.display());
        migrations::run_migrations(&db_url).await.unwrap();
        let pool = DbPool::from_url(&db_url).unwrap();

        let uploads = UploadRepository::new(pool.clone());
        let pages = PageRepository::new(pool.clone());
        let schemas = SchemaRepository::new(pool.clone());

        let objects_dir = tmp.join("objects");
        std::fs::create_dir_all(&objects_dir).unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(objects_dir));

        let settings_stub = Settings {
            database_url: db_url,
            redis_url: None,
            minio_endpoint: None,
            minio_access_key: None,
            minio_secret_key: None,
            minio_secure: false,
            object_store_root: None,
            jwt_secret_key: "test-secret".to_string(),
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
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let chat = ChatClient::new(&settings_stub);
        let progress = Arc::new(ProgressRegistry::new());
        let extraction_cache = Arc::new(ExtractionCache::new());
        let render_options = RenderOptions {
            dpi: settings_stub.render_dpi,
            long_edge_px: settings_stub.render_long_edge_px,
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
            jwt_secret: settings_stub.jwt_secret_key,
        }
    }
}
