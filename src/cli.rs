//! Command-line entry points: `serve`, `migrate`, and three one-shot
//! ingest-pipeline commands for operating on an upload without the HTTP
//! surface (§5.1).

use std::sync::Arc;

use clap::{Parser, Subcommand};

use pricetrack::cache::{InMemoryTokenBlacklist, RedisTokenBlacklist, TokenBlacklist};
use pricetrack::config::Settings;
use pricetrack::errors::{AppError, AppResult};
use pricetrack::extract::ExtractionCache;
use pricetrack::ingest::{original_key, IngestPipeline};
use pricetrack::llm::ChatClient;
use pricetrack::models::{DocType, Upload};
use pricetrack::progress::ProgressRegistry;
use pricetrack::render::RenderOptions;
use pricetrack::repository::{migrations, DbPool, PageRepository, SchemaRepository, UploadRepository};
use pricetrack::server;
use pricetrack::store::{self, FsObjectStore, ObjectStore};

const DEFAULT_WORKSPACE: &str = "default";

#[derive(Parser)]
#[command(name = "pricetrack", about = "Vendor pricelist ingestion, extraction, and comparison")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Ingest a single file (PDF or image) and block until done or failed.
    Ingest {
        file: std::path::PathBuf,
        #[arg(long)]
        company: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<i32>,
        #[arg(long, default_value = DEFAULT_WORKSPACE)]
        workspace: String,
    },
    /// Resume an interrupted upload and block until done or failed.
    Resume {
        upload_id: String,
        #[arg(long, default_value = DEFAULT_WORKSPACE)]
        workspace: String,
    },
    /// Reparse a done upload from its original bytes and block until done.
    Reparse {
        upload_id: String,
        #[arg(long, default_value = DEFAULT_WORKSPACE)]
        workspace: String,
    },
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

struct Collaborators {
    uploads: UploadRepository,
    pipeline: Arc<IngestPipeline>,
    store: Arc<dyn ObjectStore>,
}

async fn build_collaborators(settings: &Settings) -> AppResult<Collaborators> {
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
        schemas,
        store.clone(),
        chat,
        progress,
        extraction_cache,
        render_options,
        settings.ocr_worker_count,
    ));

    Ok(Collaborators {
        uploads,
        pipeline,
        store,
    })
}

async fn run_ingest(
    settings: &Settings,
    file: std::path::PathBuf,
    company: String,
    year: Option<i32>,
    month: Option<i32>,
    workspace: String,
) -> AppResult<()> {
    let collaborators = build_collaborators(settings).await?;
    let bytes = tokio::fs::read(&file)
        .await
        .map_err(|e| AppError::internal(format!("failed to read {}: {e}", file.display())))?;
    let doc_type = detect_doc_type(&bytes)?;

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let upload = Upload::new(workspace.clone(), filename, company, year, month, doc_type);
    collaborators.uploads.insert(&upload).await?;

    let content_type = match doc_type {
        DocType::Pdf => "application/pdf",
        DocType::Image => "image/png",
    };
    let key = original_key(&upload.id, doc_type);
    collaborators
        .store
        .put(store::BUCKET_PDFS, &key, &bytes, content_type)
        .await?;

    tracing::info!(upload_id = %upload.id, "ingesting");
    collaborators
        .pipeline
        .run_to_completion(&workspace, &upload.id)
        .await?;
    println!("{}", upload.id);
    Ok(())
}

async fn run_resume(settings: &Settings, upload_id: String, workspace: String) -> AppResult<()> {
    let collaborators = build_collaborators(settings).await?;
    collaborators
        .pipeline
        .resume_to_completion(&workspace, &upload_id)
        .await
}

async fn run_reparse(settings: &Settings, upload_id: String, workspace: String) -> AppResult<()> {
    let collaborators = build_collaborators(settings).await?;
    collaborators
        .pipeline
        .reparse_to_completion(&workspace, &upload_id)
        .await
}

pub async fn run(cli: Cli) -> AppResult<()> {
    let settings = Settings::load()?;
    match cli.command {
        Command::Serve => server::serve(&settings).await,
        Command::Migrate => migrations::run_migrations(&settings.database_url).await.map_err(AppError::from),
        Command::Ingest {
            file,
            company,
            year,
            month,
            workspace,
        } => run_ingest(&settings, file, company, year, month, workspace).await,
        Command::Resume { upload_id, workspace } => run_resume(&settings, upload_id, workspace).await,
        Command::Reparse { upload_id, workspace } => run_reparse(&settings, upload_id, workspace).await,
    }
}
