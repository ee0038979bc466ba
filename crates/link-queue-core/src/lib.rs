mod request;
mod policy;
mod error;

pub use request::{observe_created_at, parse_request_id, Request, RequestId, SourceRef};
pub use policy::{AttemptOutcome, Outcome, RetryPolicy, Transition};
pub use error::{CoreError, Result};

/// Retry ceiling used when nothing else is configured
pub const DEFAULT_MAX_RETRIES: u32 = 3;
