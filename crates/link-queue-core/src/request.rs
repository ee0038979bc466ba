use crate::{CoreError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Unique identifier for a linking request
pub type RequestId = Uuid;

/// Highest `created_at` handed out so far in this process
static LAST_CREATED_AT: AtomicI64 = AtomicI64::new(0);

/// Locator of the message a request originated from.
///
/// The queue never interprets these values; they are handed back to the
/// notification and enrichment collaborators as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub channel_id: String,
    pub message_id: String,
}

impl SourceRef {
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        SourceRef {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

/// One unit of pending linking work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Unique request identifier, the only key used to correlate results
    id: RequestId,

    /// Where the request came from
    #[serde(flatten)]
    source: SourceRef,

    /// Identity of the user to be linked
    subject_id: String,

    /// Human-readable label for logs and messages
    subject_label: String,

    /// Creation time in epoch milliseconds
    created_at: i64,

    /// Number of failed processing attempts so far
    retry_count: u32,
}

impl Request {
    /// Create a new request with a fresh id and a creation timestamp that
    /// never goes backwards within this process
    pub fn new(
        source: SourceRef,
        subject_id: impl Into<String>,
        subject_label: impl Into<String>,
    ) -> Result<Self> {
        let subject_id = subject_id.into();
        if subject_id.is_empty() {
            return Err(CoreError::EmptyField("subject_id"));
        }
        if source.channel_id.is_empty() {
            return Err(CoreError::EmptyField("channel_id"));
        }
        if source.message_id.is_empty() {
            return Err(CoreError::EmptyField("message_id"));
        }

        Ok(Request {
            id: Uuid::new_v4(),
            source,
            subject_id,
            subject_label: subject_label.into(),
            created_at: next_created_at(),
            retry_count: 0,
        })
    }

    /// Rebuild a request from previously stored field values
    pub fn restore(
        id: RequestId,
        source: SourceRef,
        subject_id: String,
        subject_label: String,
        created_at: i64,
        retry_count: u32,
    ) -> Self {
        observe_created_at(created_at);
        Request {
            id,
            source,
            subject_id,
            subject_label,
            created_at,
            retry_count,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn subject_label(&self) -> &str {
        &self.subject_label
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Count one more failed attempt
    pub(crate) fn record_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}

/// Parse an externally supplied request id
pub fn parse_request_id(raw: &str) -> Result<RequestId> {
    Uuid::parse_str(raw.trim()).map_err(|_| CoreError::InvalidRequestId(raw.to_string()))
}

/// Raise the creation-time floor so requests created later in this process
/// never get an older `created_at` than one already seen (e.g. loaded from disk)
pub fn observe_created_at(created_at: i64) {
    LAST_CREATED_AT.fetch_max(created_at, Ordering::SeqCst);
}

fn next_created_at() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_CREATED_AT.fetch_max(now, Ordering::SeqCst);
    previous.max(now)
}
