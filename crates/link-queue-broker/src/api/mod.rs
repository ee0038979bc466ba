//! HTTP surface used by the external linking worker.
//!
//! Every route is served both at the root and under `/api`. All routes
//! except `/health` require `Authorization: Bearer <secret>`.
//! `POST /queue/enqueue` is the producer ingress for out-of-process callers.

mod auth;
mod rest;

pub use auth::extract_bearer_token;
pub use rest::ApiError;

use crate::{Broker, ProcessorHandle};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// State shared by every handler
#[derive(Clone)]
pub struct ApiState {
    broker: Arc<Broker>,
    secret: Arc<str>,
}

impl ApiState {
    pub fn new(broker: Arc<Broker>, secret: impl Into<Arc<str>>) -> Self {
        ApiState {
            broker,
            secret: secret.into(),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

/// Queue API routes
pub fn create_router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/queue/pending", get(rest::list_pending))
        .route("/queue/enqueue", post(rest::enqueue_request))
        .route("/queue/result", post(rest::report_result))
        .route("/queue/stats", get(rest::get_stats))
        .route("/health", get(rest::health_check));

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(CatchPanicLayer::custom(rest::handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` until `shutdown` fires. Cancellation starts the HTTP drain
/// and the processor shutdown together; returns once both are done.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    processor: Option<ProcessorHandle>,
    grace: Duration,
) -> std::io::Result<()> {
    let stop_processor = {
        let shutdown = shutdown.clone();
        async move {
            if let Some(handle) = processor {
                shutdown.cancelled().await;
                handle.shutdown(grace).await;
            }
        }
    };

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned());
    let (served, ()) = tokio::join!(async { server.await }, stop_processor);
    served
}
