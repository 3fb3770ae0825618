use thiserror::Error;

/// Failures surfaced by the remote message store.
///
/// Only `RateLimited` is retried (by the batch fetcher, per group). The other
/// two variants abort the run as soon as they reach the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limited by message store (HTTP {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("request failed ({}): {message}", status_label(.status))]
    RequestFailed { status: Option<u16>, message: String },

    #[error("transport failure: {0}")]
    TransportFailed(String),
}

impl StoreError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StoreError::RateLimited { .. })
    }

    /// Whether an error seen on a single item must fail its whole group.
    ///
    /// Throttling and transport errors apply to the composite request as a whole,
    /// and a 401 means the credentials are gone for every item.
    pub fn fails_group(&self) -> bool {
        match self {
            StoreError::RateLimited { .. } | StoreError::TransportFailed(_) => true,
            StoreError::RequestFailed { status, .. } => *status == Some(401),
        }
    }

    /// Classify an HTTP failure by status code and the error reasons reported by the API.
    pub fn from_http_status(status: u16, reasons: &[&str], message: impl Into<String>) -> Self {
        let message = message.into();
        let throttled = status == 429
            || (status == 403
                && reasons
                    .iter()
                    .any(|r| *r == "rateLimitExceeded" || *r == "userRateLimitExceeded"));

        if throttled {
            StoreError::RateLimited { status, message }
        } else {
            StoreError::RequestFailed { status: Some(status), message }
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "no status".to_string(),
    }
}

/// A single message that could not be fetched inside an otherwise successful group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
