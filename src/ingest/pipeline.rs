//! Ingest Pipeline (C4): orchestrates the Renderer, the OCR worker pool,
//! and the auto-triggered Extraction Engine run behind the state machine
//! in `ingest::state`. One `IngestPipeline` is shared process-wide
//! (`AppState` holds an `Arc<IngestPipeline>`); per-upload exclusion comes
//! from the `LockRegistry`, not from cloning a separate instance per job.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::errors::{AppError, AppResult};
use crate::extract::{self, ExtractionCache};
use crate::llm::ChatClient;
use crate::models::{DocType, ExtractState, IngestState, Page, PageState, Upload};
use crate::progress::{ProgressRecord, ProgressRegistry};
use crate::render::{self, RenderOptions};
use crate::repository::{PageRepository, SchemaRepository, UploadRepository};
use crate::store::{self, ObjectStore};

use super::locks::{CancelRegistry, LockRegistry};
use super::worker;

#[derive(Clone)]
pub struct IngestPipeline {
    uploads: UploadRepository,
    pages: PageRepository,
    schemas: SchemaRepository,
    store: Arc<dyn ObjectStore>,
    chat: ChatClient,
    progress: Arc<ProgressRegistry>,
    locks: Arc<LockRegistry>,
    cancels: Arc<CancelRegistry>,
    extraction_cache: Arc<ExtractionCache>,
    render_options: RenderOptions,
    worker_count: usize,
}

fn extension_for(doc_type: DocType) -> &'static str {
    match doc_type {
        DocType::Pdf => "pdf",
        DocType::Image => "png",
    }
}

/// The object key an original upload's bytes live under, per §6's
/// `pdfs/{upload_id}/original.{pdf|png|jpg}` layout. Image uploads are
/// always re-encoded to PNG before storage (see `render::render_image`'s
/// "re-encoded as PNG for uniform storage"), so the extension is a pure
/// function of `doc_type`.
pub fn original_key(upload_id: &str, doc_type: DocType) -> String {
    store::upload_prefixed(upload_id, &format!("original.{}", extension_for(doc_type)))
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uploads: UploadRepository,
        pages: PageRepository,
        schemas: SchemaRepository,
        store: Arc<dyn ObjectStore>,
        chat: ChatClient,
        progress: Arc<ProgressRegistry>,
        extraction_cache: Arc<ExtractionCache>,
        render_options: RenderOptions,
        worker_count: usize,
    ) -> Self {
        Self {
            uploads,
            pages,
            schemas,
            store,
            chat,
            progress,
            locks: Arc::new(LockRegistry::new()),
            cancels: Arc::new(CancelRegistry::new()),
            extraction_cache,
            render_options,
            worker_count: worker_count.max(1),
        }
    }

    /// Fires the full ingest (render -> parse -> auto-extract) as a
    /// detached task. Called immediately after the Upload row and its
    /// original bytes are persisted; the HTTP handler does not wait on it.
    pub fn spawn(&self, workspace_id: String, upload_id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run(&workspace_id, &upload_id).await {
                error!(upload_id, error = %e, "ingest pipeline failed");
            }
        });
    }

    #[instrument(skip(self), fields(upload_id))]
    async fn run(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(upload_id).await;
        self.do_render(workspace_id, upload_id).await?;
        self.do_parse_and_extract(workspace_id, upload_id).await
    }

    /// Runs the full ingest inline and awaits completion, for the `ingest`
    /// CLI subcommand (§5.1's "one-shot" mode has no HTTP caller to hand a
    /// detached task back to).
    pub async fn run_to_completion(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        self.run(workspace_id, upload_id).await
    }

    /// `POST /uploads/{id}/resume`: valid only from `interrupted` (and a
    /// no-op success from `done`, per spec §8's idempotence property).
    /// Validates and transitions synchronously so the HTTP handler can
    /// report 404/409 immediately; the OCR/extract tail runs detached,
    /// same as `spawn`.
    pub async fn resume(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let guard = self.locks.acquire(upload_id).await;
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        match upload.state {
            IngestState::Done => return Ok(()),
            IngestState::Interrupted => {}
            other => {
                return Err(AppError::conflict(format!(
                    "cannot resume from state {}",
                    other.as_str()
                )))
            }
        }

        self.pages.requeue_running(upload_id).await?;
        if !self
            .uploads
            .cas_state(upload_id, IngestState::Interrupted, IngestState::Parsing)
            .await?
        {
            return Err(AppError::conflict("upload state changed concurrently"));
        }
        self.publish_parsing_snapshot(upload_id, upload.total_pages)
            .await;

        self.spawn_parse_and_extract(guard, workspace_id.to_string(), upload_id.to_string());
        Ok(())
    }

    /// Same transition as `resume`, but awaits the OCR/extract tail inline
    /// for the `resume` CLI subcommand, which has no process left running
    /// to receive a detached task's completion.
    pub async fn resume_to_completion(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let guard = self.locks.acquire(upload_id).await;
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        match upload.state {
            IngestState::Done => return Ok(()),
            IngestState::Interrupted => {}
            other => {
                return Err(AppError::conflict(format!(
                    "cannot resume from state {}",
                    other.as_str()
                )))
            }
        }

        self.pages.requeue_running(upload_id).await?;
        if !self
            .uploads
            .cas_state(upload_id, IngestState::Interrupted, IngestState::Parsing)
            .await?
        {
            return Err(AppError::conflict("upload state changed concurrently"));
        }
        self.publish_parsing_snapshot(upload_id, upload.total_pages)
            .await;

        let _guard = guard;
        self.do_parse_and_extract(workspace_id, upload_id).await
    }

    /// `POST /uploads/{id}/reparse`: valid only from `done`. Resets every
    /// Page to `pending`, drops the cached CSV, and re-enters the OCR pool.
    /// Same synchronous-validation / detached-tail split as `resume`.
    pub async fn reparse(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let guard = self.locks.acquire(upload_id).await;
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        if upload.state != IngestState::Done {
            return Err(AppError::conflict(format!(
                "cannot reparse from state {}",
                upload.state.as_str()
            )));
        }

        self.pages.reset_all_to_pending(upload_id).await?;
        self.store
            .delete_prefix(store::BUCKET_OUTPUT, &format!("{upload_id}.csv"))
            .await?;
        self.extraction_cache.invalidate(upload_id);
        self.uploads
            .set_extract_state(upload_id, ExtractState::None)
            .await?;
        if !self
            .uploads
            .cas_state(upload_id, IngestState::Done, IngestState::Parsing)
            .await?
        {
            return Err(AppError::conflict("upload state changed concurrently"));
        }
        self.publish_parsing_snapshot(upload_id, upload.total_pages)
            .await;

        self.spawn_parse_and_extract(guard, workspace_id.to_string(), upload_id.to_string());
        Ok(())
    }

    /// Same transition as `reparse`, awaiting the tail inline for the
    /// `reparse` CLI subcommand.
    pub async fn reparse_to_completion(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let guard = self.locks.acquire(upload_id).await;
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        if upload.state != IngestState::Done {
            return Err(AppError::conflict(format!(
                "cannot reparse from state {}",
                upload.state.as_str()
            )));
        }

        self.pages.reset_all_to_pending(upload_id).await?;
        self.store
            .delete_prefix(store::BUCKET_OUTPUT, &format!("{upload_id}.csv"))
            .await?;
        self.extraction_cache.invalidate(upload_id);
        self.uploads
            .set_extract_state(upload_id, ExtractState::None)
            .await?;
        if !self
            .uploads
            .cas_state(upload_id, IngestState::Done, IngestState::Parsing)
            .await?
        {
            return Err(AppError::conflict("upload state changed concurrently"));
        }
        self.publish_parsing_snapshot(upload_id, upload.total_pages)
            .await;

        let _guard = guard;
        self.do_parse_and_extract(workspace_id, upload_id).await
    }

    /// Runs `do_parse_and_extract` detached, carrying `guard` into the
    /// spawned task so the upload stays locked for the task's lifetime
    /// rather than releasing as soon as the caller's stack frame returns.
    fn spawn_parse_and_extract(
        &self,
        guard: tokio::sync::OwnedMutexGuard<()>,
        workspace_id: String,
        upload_id: String,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.do_parse_and_extract(&workspace_id, &upload_id).await {
                error!(upload_id, error = %e, "ingest pipeline failed");
            }
        });
    }

    /// Marks `upload_id` cancelled in-process; active workers observe this
    /// at their next page boundary and exit without mutating state (§4.4
    /// "Cancellation"). The caller (the `DELETE /uploads/{id}` handler) is
    /// responsible for the durable tombstone and the cascading purge.
    pub fn cancel(&self, upload_id: &str) {
        self.cancels.cancel(upload_id);
    }

    async fn publish_parsing_snapshot(&self, upload_id: &str, total_pages: i32) {
        let current_page = self.pages.terminal_count(upload_id).await.unwrap_or(0);
        let _ = self
            .uploads
            .set_progress(upload_id, IngestState::Parsing, current_page, None)
            .await;
        self.progress.publish(
            upload_id,
            ProgressRecord {
                state: IngestState::Parsing,
                current_page,
                total_pages,
                message: None,
                extract_state: ExtractState::None,
            },
        );
    }

    /// Step 1 (§4.4): fetch the original bytes, render every page, persist
    /// one `Page(pending)` per page idempotently, transition to `parsing`.
    async fn do_render(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        if !self
            .uploads
            .cas_state(upload_id, IngestState::Queued, IngestState::Rendering)
            .await?
        {
            return Err(AppError::conflict("upload is not queued"));
        }
        self.progress.publish(
            upload_id,
            ProgressRecord {
                state: IngestState::Rendering,
                current_page: 0,
                total_pages: 0,
                message: None,
                extract_state: ExtractState::None,
            },
        );

        let key = original_key(upload_id, upload.doc_type);
        let bytes = match self.store.get(store::BUCKET_PDFS, &key).await {
            Ok(b) => b,
            Err(e) => {
                self.fail_render(upload_id, &e.to_string()).await;
                return Err(e);
            }
        };

        let render_result = match upload.doc_type {
            DocType::Pdf => render::render_pdf(bytes, self.render_options).await,
            DocType::Image => render::render_image(bytes),
        };

        let pages = match render_result {
            Ok(p) => p,
            Err(e) => {
                self.fail_render(upload_id, &e.to_string()).await;
                return Err(e);
            }
        };

        for (i, png) in pages.iter().enumerate() {
            let page_num = (i + 1) as i32;
            let page_key = store::upload_prefixed(upload_id, &store::page_key(page_num));
            self.store
                .put(store::BUCKET_PAGES, &page_key, png, "image/png")
                .await?;
        }

        let total_pages = pages.len() as i32;
        self.uploads.set_total_pages(upload_id, total_pages).await?;
        self.pages
            .ensure_pending_pages(upload_id, total_pages)
            .await?;

        if !self
            .uploads
            .cas_state(upload_id, IngestState::Rendering, IngestState::Parsing)
            .await?
        {
            return Err(AppError::internal(
                "upload state changed unexpectedly during rendering",
            ));
        }
        self.progress.publish(
            upload_id,
            ProgressRecord {
                state: IngestState::Parsing,
                current_page: 0,
                total_pages,
                message: None,
                extract_state: ExtractState::None,
            },
        );
        Ok(())
    }

    async fn fail_render(&self, upload_id: &str, message: &str) {
        let _ = self
            .uploads
            .cas_state(upload_id, IngestState::Rendering, IngestState::Error)
            .await;
        let _ = self
            .uploads
            .set_progress(upload_id, IngestState::Error, 0, Some(message))
            .await;
        self.progress.publish(
            upload_id,
            ProgressRecord {
                state: IngestState::Error,
                current_page: 0,
                total_pages: 0,
                message: Some(message.to_string()),
                extract_state: ExtractState::None,
            },
        );
    }

    /// Step 2-4 (§4.4): dispatch the OCR worker pool over every claimable
    /// page, wait for it to drain, then run the auto-extraction before
    /// flipping the Upload to its terminal state, so the terminal progress
    /// record already carries the final `extract_state`.
    async fn do_parse_and_extract(&self, workspace_id: &str, upload_id: &str) -> AppResult<()> {
        let upload = self
            .uploads
            .get(workspace_id, upload_id)
            .await?
            .ok_or_else(|| AppError::not_found("upload not found"))?;

        let claimable = self.pages.claimable(upload_id).await?;
        let cancelled = self.cancels.handle_for(upload_id);
        let queue = worker::queue_from(claimable);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut handles = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            let worker_upload_id = upload_id.to_string();
            let queue = queue.clone();
            let pages = self.pages.clone();
            let store = self.store.clone();
            let chat = self.chat.clone();
            let cancelled = cancelled.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                worker::run(worker_upload_id, queue, pages, store, chat, cancelled, move || {
                    let _ = tx.send(());
                })
                .await;
            }));
        }
        drop(tx);

        while rx.recv().await.is_some() {
            let count = self.pages.terminal_count(upload_id).await.unwrap_or(0);
            let _ = self
                .uploads
                .set_progress(upload_id, IngestState::Parsing, count, None)
                .await;
            self.progress.publish(
                upload_id,
                ProgressRecord {
                    state: IngestState::Parsing,
                    current_page: count,
                    total_pages: upload.total_pages,
                    message: None,
                    extract_state: ExtractState::None,
                },
            );
        }

        for handle in handles {
            let _ = handle.await;
        }

        if cancelled.load(Ordering::Relaxed) {
            info!(upload_id, "ingest cancelled; leaving state untouched");
            return Ok(());
        }

        let all_pages = self.pages.list_for_upload(upload_id).await?;
        let any_done = all_pages.iter().any(|p| p.state == PageState::Done);
        let (next_state, message) = if any_done {
            (IngestState::Done, None)
        } else {
            (IngestState::Error, Some("every page failed OCR".to_string()))
        };

        let extract_state = if next_state == IngestState::Done {
            self.run_auto_extraction(workspace_id, upload_id, &upload, &all_pages)
                .await
        } else {
            ExtractState::None
        };

        if !self
            .uploads
            .cas_state(upload_id, IngestState::Parsing, next_state)
            .await?
        {
            warn!(upload_id, "upload state changed concurrently while finishing ingest");
        }
        self.uploads
            .set_progress(upload_id, next_state, upload.total_pages, message.as_deref())
            .await?;
        self.uploads.set_extract_state(upload_id, extract_state).await?;

        self.progress.publish(
            upload_id,
            ProgressRecord {
                state: next_state,
                current_page: upload.total_pages,
                total_pages: upload.total_pages,
                message,
                extract_state,
            },
        );

        Ok(())
    }

    /// Step 4 (§4.4): if a workspace-default Schema exists for this
    /// upload's company, run C6+C7 and persist the CSV.
    async fn run_auto_extraction(
        &self,
        workspace_id: &str,
        upload_id: &str,
        upload: &Upload,
        pages: &[Page],
    ) -> ExtractState {
        let schema = match self
            .schemas
            .default_for_company(workspace_id, &upload.company)
            .await
        {
            Ok(Some(schema)) => schema,
            Ok(None) => return ExtractState::NoConfig,
            Err(e) => {
                error!(upload_id, error = %e, "failed to look up default schema");
                return ExtractState::Error;
            }
        };

        let _ = self
            .uploads
            .set_extract_state(upload_id, ExtractState::Running)
            .await;

        let page_data: Vec<(i32, String)> = pages
            .iter()
            .filter_map(|p| p.markdown.clone().map(|md| (p.page_num, md)))
            .collect();

        let result = match extract::run(&page_data, &schema.config) {
            Ok(r) => r,
            Err(e) => {
                error!(upload_id, error = %e, "auto-extraction failed");
                return ExtractState::Error;
            }
        };
        self.extraction_cache
            .put(upload_id, schema.config.clone(), result.clone());

        let csv = match extract::to_csv(&result) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(upload_id, error = %e, "csv rendering failed");
                return ExtractState::Error;
            }
        };

        let key = format!("{upload_id}.csv");
        match self.store.put(store::BUCKET_OUTPUT, &key, &csv, "text/csv").await {
            Ok(()) => ExtractState::Done,
            Err(e) => {
                error!(upload_id, error = %e, "failed to persist auto-extraction csv");
                ExtractState::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_key_uses_pdf_extension_for_pdf_uploads() {
        assert_eq!(original_key("u1", DocType::Pdf), "u1/original.pdf");
    }

    #[test]
    fn original_key_uses_png_extension_for_image_uploads() {
        assert_eq!(original_key("u1", DocType::Image), "u1/original.png");
    }
}
