use super::auth::Authorized;
use super::ApiState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use link_queue_core::{parse_request_id, AttemptOutcome, Outcome, Request, RequestId, SourceRef};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PendingItem {
    #[serde(flatten)]
    request: Request,
    image_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct PendingResponse {
    success: bool,
    count: usize,
    requests: Vec<PendingItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewRequest {
    #[serde(flatten)]
    source: SourceRef,
    subject_id: String,
    subject_label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EnqueueResponse {
    success: bool,
    request_id: RequestId,
    queue_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultReport {
    request_id: String,
    success: bool,
    #[serde(default, alias = "playerTag")]
    external_account: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ResultResponse {
    success: bool,
    action: Outcome,
    message: String,
    retry_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatsResponse {
    success: bool,
    queue_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    oldest_request_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    newest_request_timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HealthResponse {
    status: &'static str,
    queue_size: usize,
    timestamp: i64,
}

/// List queued requests without removing them
pub(super) async fn list_pending(
    _auth: Authorized,
    State(state): State<ApiState>,
) -> Result<Json<PendingResponse>, ApiError> {
    let broker = state.broker();
    let snapshot = broker.queue().list_all();

    let mut requests = Vec::with_capacity(snapshot.len());
    for request in snapshot {
        let image_urls = match broker.enricher().image_urls(&request).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(request_id = %request.id(), "Failed to load image URLs: {}", e);
                Vec::new()
            }
        };
        requests.push(PendingItem { request, image_urls });
    }

    Ok(Json(PendingResponse {
        success: true,
        count: requests.len(),
        requests,
    }))
}

/// Accept a new request from a producer
pub(super) async fn enqueue_request(
    _auth: Authorized,
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let new: NewRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;
    let request = Request::new(new.source, new.subject_id, new.subject_label)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request_id = request.id();
    let broker = state.broker();
    broker.submit(request);

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            success: true,
            request_id,
            queue_size: broker.queue().len(),
        }),
    ))
}

/// Settle a request the external worker finished with
pub(super) async fn report_result(
    _auth: Authorized,
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<ResultResponse>, ApiError> {
    let report: ResultReport = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;

    let broker = state.broker();
    let request = parse_request_id(&report.request_id)
        .ok()
        .and_then(|id| broker.queue().remove_by_id(&id))
        .ok_or_else(|| {
            info!(request_id = %report.request_id, "Result reported for unknown request");
            ApiError::NotFound("Request not found".to_string())
        })?;

    let outcome = if report.success {
        AttemptOutcome::succeeded(report.external_account)
    } else {
        AttemptOutcome::Failed {
            error: report.error_message,
        }
    };

    let transition = broker.settle(request, &outcome).await;
    let retry_count = transition.request().retry_count();
    let message = match transition.outcome() {
        Outcome::Completed => "Request completed successfully".to_string(),
        Outcome::Requeued => format!(
            "Request re-queued for retry (attempt {}/{})",
            retry_count,
            broker.policy().max_retries()
        ),
        Outcome::Failed => "Request failed after max retries".to_string(),
    };

    Ok(Json(ResultResponse {
        success: true,
        action: transition.outcome(),
        message,
        retry_count,
    }))
}

/// Queue depth and age bounds
pub(super) async fn get_stats(
    _auth: Authorized,
    State(state): State<ApiState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let snapshot = state.broker().queue().list_all();

    Ok(Json(StatsResponse {
        success: true,
        queue_size: snapshot.len(),
        oldest_request_timestamp: snapshot.iter().map(Request::created_at).min(),
        newest_request_timestamp: snapshot.iter().map(Request::created_at).max(),
    }))
}

/// Health check endpoint, no auth
pub(super) async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    health_response(catch_unwind(AssertUnwindSafe(|| state.broker().queue().len())))
}

fn health_response(queue_size: std::thread::Result<usize>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label, queue_size) = match queue_size {
        Ok(size) => (StatusCode::OK, "healthy", size),
        Err(_) => {
            error!("Failed to read queue size for health check");
            (StatusCode::INTERNAL_SERVER_ERROR, "unhealthy", 0)
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            queue_size,
            timestamp: Utc::now().timestamp_millis(),
        }),
    )
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorBody {
            success: false,
            error: message,
        });

        (status, body).into_response()
    }
}

/// Turn a handler panic into the standard error envelope
pub(super) fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!("Request handler panicked: {}", detail);

    ApiError::Internal(format!("Internal server error: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::super::{create_router, ApiState};
    use super::*;
    use crate::broker::tests::{request, test_broker};
    use crate::handler::{EnrichError, Enricher};
    use crate::Broker;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request as HttpRequest, Router};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    struct FlakyEnricher;

    struct PanickingEnricher;

    #[async_trait]
    impl Enricher for PanickingEnricher {
        async fn image_urls(&self, _request: &Request) -> Result<Vec<String>, EnrichError> {
            panic!("attachment lookup exploded")
        }
    }

    #[async_trait]
    impl Enricher for FlakyEnricher {
        async fn image_urls(&self, request: &Request) -> Result<Vec<String>, EnrichError> {
            if request.subject_id() == "broken" {
                Err(EnrichError::SourceUnavailable("message deleted".to_string()))
            } else {
                Ok(vec![format!("https://cdn.example/{}.png", request.subject_id())])
            }
        }
    }

    fn app(broker: Broker) -> (Router, Arc<Broker>) {
        let broker = Arc::new(broker);
        (create_router(ApiState::new(broker.clone(), SECRET)), broker)
    }

    fn get(uri: &str, token: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_result(body: impl Into<Body>) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/queue/result")
            .header("Authorization", format!("Bearer {SECRET}"))
            .header("Content-Type", "application/json")
            .body(body.into())
            .unwrap()
    }

    fn post_enqueue(body: Value, token: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method("POST").uri("/queue/enqueue");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_and_queue_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let queued = request("1");
        broker.submit(queued.clone());

        let unauthenticated = HttpRequest::builder()
            .method("POST")
            .uri("/queue/result")
            .body(Body::from(json!({"requestId": queued.id(), "success": true}).to_string()))
            .unwrap();
        let (status, body) = send(&app, unauthenticated).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"success": false, "error": "Unauthorized"}));
        assert_eq!(broker.queue().len(), 1);

        let (status, _) = send(&app, get("/queue/pending", Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, get("/queue/stats", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pending_lists_without_removing() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3).with_enricher(Arc::new(FlakyEnricher)));
        let first = request("1");
        broker.submit(first.clone());
        broker.submit(request("broken"));

        let (status, body) = send(&app, get("/queue/pending", Some(SECRET))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        let item = &body["requests"][0];
        assert_eq!(item["id"], first.id().to_string());
        assert_eq!(item["channelId"], "channel");
        assert_eq!(item["subjectLabel"], "user-1");
        assert_eq!(item["retryCount"], 0);
        assert_eq!(item["imageUrls"], json!(["https://cdn.example/1.png"]));
        assert_eq!(body["requests"][1]["imageUrls"], json!([]));
        assert_eq!(broker.queue().len(), 2);
    }

    #[tokio::test]
    async fn test_success_report_completes_request() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let queued = request("1");
        broker.submit(queued.clone());

        let body = json!({"requestId": queued.id(), "success": true, "playerTag": "#ABC"});
        let (status, body) = send(&app, post_result(body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["action"], "completed");
        assert!(broker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_failure_report_requeues_at_tail() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let queued = request("1");
        broker.submit(queued.clone());
        broker.submit(request("2"));

        let body = json!({"requestId": queued.id(), "success": false, "errorMessage": "no tag"});
        let (status, body) = send(&app, post_result(body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "requeued");
        assert_eq!(body["retryCount"], 1);
        assert_eq!(body["message"], "Request re-queued for retry (attempt 1/3)");

        let ids: Vec<_> = broker.queue().list_all().iter().map(|r| r.subject_id().to_string()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_failure_report_at_ceiling_drops_request() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 0));
        let queued = request("1");
        broker.submit(queued.clone());

        let body = json!({"requestId": queued.id(), "success": false});
        let (status, body) = send(&app, post_result(body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "failed");
        assert_eq!(body["message"], "Request failed after max retries");
        assert!(broker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_report_is_bad_request() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let queued = request("1");
        broker.submit(queued.clone());

        let (status, body) = send(&app, post_result("{ not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let missing_success = json!({"requestId": queued.id()});
        let (status, _) = send(&app, post_result(missing_success.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing_id = json!({"success": true});
        let (status, _) = send(&app, post_result(missing_id.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(broker.queue().list_all(), vec![queued]);
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        broker.submit(request("1"));

        let unknown = json!({"requestId": uuid::Uuid::new_v4(), "success": true});
        let (status, body) = send(&app, post_result(unknown.to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"success": false, "error": "Request not found"}));

        let garbage = json!({"requestId": "not-a-uuid", "success": true});
        let (status, _) = send(&app, post_result(garbage.to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(broker.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_second_report_for_same_request_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let queued = request("1");
        broker.submit(queued.clone());

        let body = json!({"requestId": queued.id(), "success": true}).to_string();
        let (status, _) = send(&app, post_result(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, post_result(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_report_size_and_age_bounds() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));

        let (status, body) = send(&app, get("/queue/stats", Some(SECRET))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "queueSize": 0}));

        let first = request("1");
        let second = request("2");
        broker.submit(first.clone());
        broker.submit(second.clone());

        let (_, body) = send(&app, get("/queue/stats", Some(SECRET))).await;
        assert_eq!(body["queueSize"], 2);
        assert_eq!(body["oldestRequestTimestamp"], first.created_at());
        assert_eq!(body["newestRequestTimestamp"], second.created_at());
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        broker.submit(request("1"));

        let (status, body) = send(&app, get("/health", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["queueSize"], broker.queue().len());
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_health_reports_unhealthy_when_size_unreadable() {
        let (status, Json(body)) = health_response(Err(Box::new("lock lost")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, "unhealthy");

        let (status, Json(body)) = health_response(Ok(4));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.queue_size, 4);
    }

    #[tokio::test]
    async fn test_enqueue_adds_request_at_tail() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        broker.submit(request("1"));

        let new = json!({"channelId": "c", "messageId": "m", "subjectId": "2", "subjectLabel": "user-2"});
        let (status, body) = send(&app, post_enqueue(new, Some(SECRET))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["queueSize"], 2);
        let tail = broker.queue().list_all()[1].clone();
        assert_eq!(body["requestId"], tail.id().to_string());
        assert_eq!(tail.subject_label(), "user-2");
        assert_eq!(tail.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_input_and_missing_token() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3));
        let new = json!({"channelId": "c", "messageId": "m", "subjectId": "2", "subjectLabel": "user-2"});

        let (status, _) = send(&app, post_enqueue(new, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let empty_subject = json!({"channelId": "c", "messageId": "m", "subjectId": "", "subjectLabel": "x"});
        let (status, body) = send(&app, post_enqueue(empty_subject, Some(SECRET))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let missing_label = json!({"channelId": "c", "messageId": "m", "subjectId": "2"});
        let (status, _) = send(&app, post_enqueue(missing_label, Some(SECRET))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(broker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_enricher_panic_returns_error_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let (app, broker) = app(test_broker(&temp_dir, 3).with_enricher(Arc::new(PanickingEnricher)));
        broker.submit(request("1"));

        let (status, body) = send(&app, get("/queue/pending", Some(SECRET))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error: attachment lookup exploded");
        assert_eq!(broker.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_routes_are_also_served_under_api_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let (app, _broker) = app(test_broker(&temp_dir, 3));

        let (status, _) = send(&app, get("/api/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, get("/api/queue/stats", Some(SECRET))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queueSize"], 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_envelope() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Internal server error: boom");
    }
}
