//! Retry policy applied to every finished processing attempt.
//!
//! Both consumers (the in-process processor and the external worker
//! reporting through the API) settle attempts through [`RetryPolicy::apply`],
//! so the rule lives in one place and can be tested without a queue.

use crate::{Request, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};

/// Result of one attempt at linking a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The account was linked; `detail` is whatever the linker reported
    /// (e.g. the external account handle)
    Succeeded { detail: Option<String> },
    /// The attempt failed with an optional human-readable reason
    Failed { error: Option<String> },
}

impl AttemptOutcome {
    pub fn succeeded(detail: Option<String>) -> Self {
        AttemptOutcome::Succeeded { detail }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        AttemptOutcome::Failed {
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded { .. })
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Succeeded { detail } => detail.as_deref(),
            AttemptOutcome::Failed { error } => error.as_deref(),
        }
    }
}

/// What happened to a request after an attempt was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Linked; the request never re-enters the queue
    Completed,
    /// Failed below the ceiling; back at the tail of the queue
    Requeued,
    /// Failed at the ceiling; dropped for good
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Requeued => "requeued",
            Outcome::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Requeued)
    }
}

/// A settled request together with where it goes next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Completed(Request),
    /// Carries the request with its retry count already incremented
    Requeued(Request),
    Failed(Request),
}

impl Transition {
    pub fn outcome(&self) -> Outcome {
        match self {
            Transition::Completed(_) => Outcome::Completed,
            Transition::Requeued(_) => Outcome::Requeued,
            Transition::Failed(_) => Outcome::Failed,
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            Transition::Completed(r) | Transition::Requeued(r) | Transition::Failed(r) => r,
        }
    }

    pub fn into_request(self) -> Request {
        match self {
            Transition::Completed(r) | Transition::Requeued(r) | Transition::Failed(r) => r,
        }
    }
}

/// Retry ceiling shared by every consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        RetryPolicy { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Check if a failed attempt on this request may be retried
    pub fn can_retry(&self, request: &Request) -> bool {
        request.retry_count() < self.max_retries
    }

    /// Decide the fate of a request after one attempt
    pub fn apply(&self, mut request: Request, outcome: &AttemptOutcome) -> Transition {
        if outcome.is_success() {
            return Transition::Completed(request);
        }

        if self.can_retry(&request) {
            request.record_failure();
            Transition::Requeued(request)
        } else {
            Transition::Failed(request)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(DEFAULT_MAX_RETRIES)
    }
}
