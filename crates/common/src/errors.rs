use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure kinds for the messaging core.
///
/// Every failure that crosses a module boundary carries one of these kinds
/// so that the dispatcher and ingestor can decide mechanically whether to
/// retry, requeue, or mark the message terminal. Free-form detail lives next
/// to the kind in [`LastError`], never inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Command failed schema validation before any upstream call.
    InvalidCommand,
    /// Upstream 429 or a local bucket rejection; transparent to callers.
    RateLimited,
    /// Upstream 5xx, timeout, or connection failure; retried with backoff.
    TransientUpstream,
    /// Upstream 4xx other than 429; the message is terminal.
    PermanentUpstream,
    /// Upstream 401/403; terminal for the message, raises a refresh signal.
    AuthExpired,
    /// The owning campaign was cancelled before the upstream call.
    Cancelled,
    /// Webhook event already processed; dropped silently.
    DedupeSkip,
    /// Webhook signature mismatch; rejected at intake.
    BadSignature,
    /// Webhook body failed JSON parse or schema checks.
    BadPayload,
}

impl ErrorKind {
    /// Whether the dispatcher may requeue a message failing with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::TransientUpstream)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidCommand => "invalid_command",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransientUpstream => "transient_upstream",
            ErrorKind::PermanentUpstream => "permanent_upstream",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DedupeSkip => "dedupe_skip",
            ErrorKind::BadSignature => "bad_signature",
            ErrorKind::BadPayload => "bad_payload",
        };
        f.write_str(s)
    }
}

/// Terminal error recorded on a message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Upstream numeric error code, when one was returned.
    pub upstream_code: Option<u32>,
}

impl LastError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            upstream_code: None,
        }
    }

    pub fn with_code(kind: ErrorKind, detail: impl Into<String>, code: u32) -> Self {
        Self {
            kind,
            detail: detail.into(),
            upstream_code: Some(code),
        }
    }
}

/// Errors raised by the row stores.
#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("compare-and-swap conflict: expected {expected}, found {actual}")]
    Conflict { expected: String, actual: String },

    #[error("duplicate key: {0}")]
    Duplicate(String),
}

/// Errors raised when submitting a command onto the outbound queue.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("command validation failed: {0}")]
    Invalid(#[from] crate::validate::ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
