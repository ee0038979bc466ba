use async_trait::async_trait;
use link_queue_core::{Outcome, Request};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Result of one linking attempt: detail on success, reason on failure
pub type LinkResult = Result<Option<String>, String>;

/// Performs the actual account linking for a request
#[async_trait]
pub trait LinkHandler: Send + Sync {
    async fn link(&self, request: &Request) -> LinkResult;
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Tells the requester how their request ended up
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        request: &Request,
        outcome: Outcome,
        detail: Option<&str>,
    ) -> Result<(), NotifyError>;
}

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Source message unavailable: {0}")]
    SourceUnavailable(String),
}

/// Supplies image URLs attached to the request's source message
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn image_urls(&self, request: &Request) -> Result<Vec<String>, EnrichError>;
}

/// Links by POSTing the request to a remote linking service
pub struct HttpLinkHandler {
    client: Client,
    url: String,
    bearer_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkReply {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    player_name: Option<String>,
    #[serde(default)]
    data: Option<Box<LinkReply>>,
}

impl LinkReply {
    fn message(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.message.clone())
            .or_else(|| self.message.clone())
    }

    fn player_name(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.player_name.clone())
            .or_else(|| self.player_name.clone())
    }
}

impl HttpLinkHandler {
    pub fn new(
        url: impl Into<String>,
        bearer_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpLinkHandler {
            client,
            url: url.into(),
            bearer_secret,
        })
    }
}

#[async_trait]
impl LinkHandler for HttpLinkHandler {
    async fn link(&self, request: &Request) -> LinkResult {
        let body = json!({
            "requestId": request.id(),
            "subjectId": request.subject_id(),
            "subjectLabel": request.subject_label(),
            "channelId": request.source().channel_id,
            "messageId": request.source().message_id,
        });

        let mut call = self.client.post(&self.url).json(&body);
        if let Some(secret) = &self.bearer_secret {
            call = call.bearer_auth(secret);
        }

        let response = call.send().await.map_err(|e| format!("Linker unreachable: {}", e))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let reply: LinkReply = serde_json::from_str(&text).unwrap_or_default();

        if status.is_success() {
            Ok(reply.player_name().or_else(|| reply.message()))
        } else {
            let reason = reply
                .message()
                .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
                .unwrap_or_else(|| format!("Linker returned {}", status));
            Err(reason)
        }
    }
}

/// Notifier that only emits a structured log event
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        request: &Request,
        outcome: Outcome,
        detail: Option<&str>,
    ) -> Result<(), NotifyError> {
        info!(
            request_id = %request.id(),
            subject = %request.subject_label(),
            source = %request.source(),
            retry_count = request.retry_count(),
            outcome = outcome.as_str(),
            detail = detail.unwrap_or(""),
            "Request settled"
        );
        Ok(())
    }
}

pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn image_urls(&self, _request: &Request) -> Result<Vec<String>, EnrichError> {
        Ok(Vec::new())
    }
}

/// Deliver a notification, logging instead of propagating a failure
pub async fn notify_logged(
    notifier: &dyn Notifier,
    request: &Request,
    outcome: Outcome,
    detail: Option<&str>,
) {
    if let Err(e) = notifier.notify(request, outcome, detail).await {
        warn!(request_id = %request.id(), outcome = outcome.as_str(), "Failed to notify: {}", e);
    }
}
