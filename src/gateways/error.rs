use crate::ratelimit::limiter::RateLimitTimeout;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Unavailable,
    Other,
}

/// The request never produced a usable answer. Safe to retry later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gateway transport error ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

/// A well-formed rejection from the gateway. Authoritative, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("gateway rejected request [{code}]: {description}")]
pub struct GatewayError {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayCallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    RateLimitTimeout(#[from] RateLimitTimeout),
    #[error("unreadable gateway response: {0}")]
    Decode(String),
    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),
    /// The history did not end within the page cap; a partial list is never returned.
    #[error("transaction history exceeds {pages} pages of {page_size}")]
    HistoryTruncated { pages: u32, page_size: u32 },
}

impl GatewayCallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayCallError::Transport(_))
    }
}
