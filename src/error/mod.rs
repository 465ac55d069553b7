// src/error/mod.rs
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the request governor and the upstream client.
///
/// The type is `Clone` because a single upstream outcome is fanned out to
/// every caller that was coalesced onto the same request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GovernorError {
    /// Upstream answered 429, or reported a rate limit inside its `errors` map
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The call did not settle before the configured request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx status other than 429, or a logical `errors` payload on a 200.
    /// `status` is `None` for the latter.
    #[error("Upstream error (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    /// Connection-level failure before any HTTP status was received
    #[error("Network error: {0}")]
    Network(String),

    /// Response body was not valid JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// No API key configured; nothing was queued
    #[error("No API credential configured")]
    NoCredential,

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<GovernorError>,
    },

    /// Caller bug, e.g. an empty endpoint
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The dispatcher task is gone
    #[error("Request governor has shut down")]
    Shutdown,
}

impl GovernorError {
    /// Whether a failed attempt may be requeued.
    pub fn is_retryable(&self) -> bool {
        match self {
            GovernorError::RateLimited { .. } => true,
            GovernorError::Timeout(_) => true,
            GovernorError::Network(_) => true,
            // Only transient server-side failures; 4xx means the request shape was rejected
            GovernorError::Upstream { status, .. } => {
                matches!(status, Some(code) if (500..=599).contains(code))
            }
            GovernorError::Decode(_) => false,
            GovernorError::NoCredential => false,
            GovernorError::RetriesExhausted { .. } => false,
            GovernorError::InvalidRequest(_) => false,
            GovernorError::Config(_) => false,
            GovernorError::Shutdown => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GovernorError::RateLimited { .. })
    }

    /// The innermost error, unwrapping `RetriesExhausted`.
    pub fn root_cause(&self) -> &GovernorError {
        match self {
            GovernorError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Maps an HTTP status into the taxonomy. Returns `None` for success codes.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(GovernorError::RateLimited { retry_after }),
            _ => Some(GovernorError::Upstream {
                status: Some(status),
                message: truncate_body(body),
            }),
        }
    }
}

impl From<serde_json::Error> for GovernorError {
    fn from(err: serde_json::Error) -> Self {
        GovernorError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for GovernorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GovernorError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            GovernorError::from_status(status.as_u16(), &err.to_string(), None).unwrap_or_else(
                || GovernorError::Network(err.to_string()),
            )
        } else {
            GovernorError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for GovernorError {
    fn from(err: url::ParseError) -> Self {
        GovernorError::InvalidRequest(format!("bad url: {}", err))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 256;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

pub type GovernorResult<T> = Result<T, GovernorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(GovernorError::RateLimited { retry_after: None }.is_retryable());
        assert!(GovernorError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(GovernorError::Network("reset".into()).is_retryable());
        assert!(GovernorError::Upstream { status: Some(503), message: String::new() }.is_retryable());
        assert!(!GovernorError::Upstream { status: Some(400), message: String::new() }.is_retryable());
        assert!(!GovernorError::Upstream { status: None, message: "bad param".into() }.is_retryable());
        assert!(!GovernorError::NoCredential.is_retryable());
        assert!(!GovernorError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(GovernorError::from_status(204, "", None), None);
        assert_eq!(
            GovernorError::from_status(429, "slow down", Some(Duration::from_secs(2))),
            Some(GovernorError::RateLimited { retry_after: Some(Duration::from_secs(2)) })
        );
        match GovernorError::from_status(502, " bad gateway ", None) {
            Some(GovernorError::Upstream { status, message }) => {
                assert_eq!(status, Some(502));
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_root_cause_unwraps_exhaustion() {
        let err = GovernorError::RetriesExhausted {
            attempts: 3,
            last: Box::new(GovernorError::Timeout(Duration::from_millis(50))),
        };
        assert_eq!(err.root_cause(), &GovernorError::Timeout(Duration::from_millis(50)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(300);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= 256 + '…'.len_utf8());
    }
}
