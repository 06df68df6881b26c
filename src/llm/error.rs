//! Errors of a single inference call

use thiserror::Error;

/// Failure of one call to the inference service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Timeout, connection failure or 5xx; retried with the default backoff
    #[error("Transient network error: {message}")]
    Transient {
        message: String,
        status_code: Option<u16>,
    },

    /// HTTP 429; retried with a longer backoff
    #[error("Rate limit exceeded (retry after: {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// Any other 4xx or an unusable response body; never retried
    #[error("Fatal call error: {message}")]
    Fatal {
        message: String,
        status_code: Option<u16>,
    },

    /// The run deadline passed before the call could be issued or retried
    #[error("Call cancelled: run deadline exceeded")]
    Cancelled,
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        CallError::Transient {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        CallError::Fatal {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        CallError::transient(format!("Request timed out after {} seconds", seconds))
    }

    /// Maps a non-success HTTP status to the error taxonomy
    pub fn from_status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        match status {
            429 => CallError::RateLimited { retry_after },
            500..=599 => CallError::Transient {
                message: format!("HTTP {}: {}", status, body),
                status_code: Some(status),
            },
            _ => CallError::Fatal {
                message: format!("HTTP {}: {}", status, body),
                status_code: Some(status),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::Transient { .. } | CallError::RateLimited { .. }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Transient { status_code, .. } | CallError::Fatal { status_code, .. } => {
                *status_code
            }
            CallError::RateLimited { .. } => Some(429),
            CallError::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        too_many_requests = { 429, false, true },
        internal_error = { 500, false, true },
        bad_gateway = { 502, false, true },
        unavailable = { 503, false, true },
        bad_request = { 400, true, false },
        unauthorized = { 401, true, false },
        not_found = { 404, true, false },
        unprocessable = { 422, true, false },
    )]
    fn test_status_mapping(status: u16, fatal: bool, retryable: bool) {
        let error = CallError::from_status(status, "body", None);
        assert_eq!(matches!(error, CallError::Fatal { .. }), fatal);
        assert_eq!(error.is_retryable(), retryable);
        assert_eq!(error.status_code(), Some(status));
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let error = CallError::from_status(429, "", Some(30));
        assert_eq!(
            error,
            CallError::RateLimited {
                retry_after: Some(30)
            }
        );
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = CallError::timeout(120);
        assert!(error.is_retryable());
        assert!(error.to_string().contains("120 seconds"));
    }

    #[test]
    fn test_cancelled_is_terminal() {
        assert!(!CallError::Cancelled.is_retryable());
        assert_eq!(CallError::Cancelled.status_code(), None);
    }
}
