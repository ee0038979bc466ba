use crate::handler::LinkHandler;
use link_queue_core::{AttemptOutcome, Request};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Runs one linking attempt, turning errors, timeouts and panics into a
/// failed [`AttemptOutcome`]
pub struct AttemptExecutor {
    handler: Arc<dyn LinkHandler>,
    attempt_timeout: Duration,
}

impl AttemptExecutor {
    pub fn new(handler: Arc<dyn LinkHandler>, attempt_timeout: Duration) -> Self {
        AttemptExecutor {
            handler,
            attempt_timeout,
        }
    }

    pub async fn execute(&self, request: &Request) -> AttemptOutcome {
        let request_id = request.id();
        let handler = self.handler.clone();
        let owned = request.clone();
        let limit = self.attempt_timeout;

        info!(%request_id, subject = %request.subject_label(), retry_count = request.retry_count(), "Attempting link");

        // Spawned so a panicking handler only takes down this task.
        let mut attempt = AbortOnDrop(tokio::spawn(async move {
            timeout(limit, handler.link(&owned)).await
        }));

        match (&mut attempt.0).await {
            Ok(Ok(Ok(detail))) => {
                info!(%request_id, "Link attempt succeeded");
                AttemptOutcome::succeeded(detail)
            }
            Ok(Ok(Err(reason))) => {
                warn!(%request_id, "Link attempt failed: {}", reason);
                AttemptOutcome::failed(reason)
            }
            Ok(Err(_)) => {
                warn!(%request_id, "Link attempt timed out after {:?}", limit);
                AttemptOutcome::failed(format!("Link attempt timed out after {:?}", limit))
            }
            Err(e) if e.is_panic() => {
                error!(%request_id, "Link attempt panicked: {:?}", e);
                AttemptOutcome::failed("Link attempt panicked")
            }
            Err(_) => {
                error!(%request_id, "Link attempt was cancelled");
                AttemptOutcome::failed("Link attempt was cancelled")
            }
        }
    }
}

/// Aborts the attempt task if the caller stops waiting for it
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
