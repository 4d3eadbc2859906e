//! OCR worker pool: each worker pulls pages from a shared in-process queue
//! until it is empty, OCRing one page at a time (§4.4 step 2, §5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::llm::ChatClient;
use crate::models::Page;
use crate::repository::PageRepository;
use crate::store::{self, ObjectStore};

pub type PageQueue = Arc<AsyncMutex<VecDeque<Page>>>;

pub fn queue_from(pages: Vec<Page>) -> PageQueue {
    Arc::new(AsyncMutex::new(pages.into_iter().collect()))
}

/// Runs until the shared queue is drained or `cancelled` flips true,
/// OCRing claimed pages and persisting their result. Page write order
/// across workers is unspecified (§5: "Page writes may complete out of
/// order").
pub async fn run(
    upload_id: String,
    queue: PageQueue,
    pages: PageRepository,
    store: Arc<dyn ObjectStore>,
    chat: ChatClient,
    cancelled: Arc<AtomicBool>,
    mut on_page_done: impl FnMut() + Send,
) {
    loop {
        if cancelled.load(Ordering::Relaxed) {
            debug!(upload_id, "worker exiting: upload cancelled");
            return;
        }

        let page = {
            let mut q = queue.lock().await;
            q.pop_front()
        };
        let Some(page) = page else { return };

        if let Err(e) = pages.mark_running(&page.id).await {
            warn!(upload_id, page_num = page.page_num, error = %e, "failed to mark page running");
            continue;
        }

        let key = store::upload_prefixed(&upload_id, &store::page_key(page.page_num));
        let result = match store.get(store::BUCKET_PAGES, &key).await {
            Ok(bytes) => chat.ocr(&bytes, "image/png").await,
            Err(e) => Err(e),
        };

        match result {
            Ok(markdown) => {
                if let Err(e) = pages.mark_done(&page.id, &markdown).await {
                    warn!(upload_id, page_num = page.page_num, error = %e, "failed to persist page markdown");
                }
            }
            Err(e) => {
                if let Err(persist_err) = pages.mark_error(&page.id, &e.to_string()).await {
                    warn!(upload_id, page_num = page.page_num, error = %persist_err, "failed to persist page error");
                }
            }
        }

        on_page_done();
    }
}
