//! `GET /uploads/{id}/status`: Server-Sent Events view of the Progress
//! Channel (§4.10). Falls back to a single fetch-and-close snapshot from
//! the repository when no live channel exists (upload already terminal,
//! or the process restarted since the upload last ran).

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::future;
use futures::stream::{self, Stream};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::errors::{AppError, AppResult};
use crate::progress::ProgressRecord;

use super::super::auth::AuthContext;
use super::super::AppState;

fn to_event(record: &ProgressRecord) -> Event {
    Event::default()
        .json_data(record)
        .unwrap_or_else(|_| Event::default().data("encoding error"))
}

/// `GET /uploads/{id}/status`. EventSource clients cannot set headers, so
/// `AuthContext` accepts the token via `?token=` here (see `auth.rs`).
pub async fn upload_status(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(upload_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let upload = state
        .uploads
        .get(&ctx.workspace_id, &upload_id)
        .await?
        .ok_or_else(|| AppError::not_found("upload not found"))?;

    if let Some(rx) = state.progress.subscribe(&upload_id) {
        let live = WatchStream::new(rx)
            .filter_map(|opt| opt)
            .scan(false, |done, record| {
                if *done {
                    return future::ready(None);
                }
                if record.is_terminal() {
                    *done = true;
                }
                future::ready(Some(Ok(to_event(&record))))
            });
        Ok(Sse::new(Box::pin(live) as BoxedStream).keep_alive(KeepAlive::default()))
    } else {
        let snapshot = ProgressRecord {
            state: upload.state,
            current_page: upload.current_page,
            total_pages: upload.total_pages,
            message: upload.last_message,
            extract_state: upload.extract_state,
        };
        let once = stream::once(future::ready(Ok(to_event(&snapshot))));
        Ok(Sse::new(Box::pin(once) as BoxedStream).keep_alive(KeepAlive::default()))
    }
}

type BoxedStream = std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::server::{auth::test_support::sign, create_router, tests_support::test_state};

    #[tokio::test]
    async fn status_for_missing_upload_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path()).await;
        let token = sign(&state.jwt_secret, "jti-sse");
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/uploads/missing/status?token={token}"))
                    .header("x-workspace-id", "ws-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
