// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

/// Classification of provider failures.  Closed set; the retry policy keys
/// off this, so new failure modes must be mapped here rather than invented
/// at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; retrying cannot help.
    InvalidRequest,
    /// HTTP 429; prefer the provider's retry_after hint.
    RateLimitExceeded,
    /// HTTP 529 or an open circuit breaker.
    Overloaded,
    /// Transient server error (5xx).
    Internal,
    /// The request or stream timed out.
    Timeout,
    /// The caller cancelled the request.
    Canceled,
    /// Anything unclassifiable.
    Unknown,
}

impl ErrorKind {
    /// Map an HTTP status code into the closed kind set.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimitExceeded,
            529 => Self::Overloaded,
            400..=499 => Self::InvalidRequest,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::Overloaded | Self::Internal | Self::Timeout
        )
    }

    /// Transient server-side kinds.  Used by the retry policy to decide when
    /// a previously honoured provider hint has stopped being trustworthy.
    pub fn is_transient_server(&self) -> bool {
        matches!(self, Self::Overloaded | Self::Internal | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::RateLimitExceeded => "rate_limit",
            Self::Overloaded => "overloaded",
            Self::Internal => "internal",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed provider failure, optionally carrying the server's retry hint.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// Parsed `Retry-After`, when the server sent one.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after: None }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message)
    }

    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        self.retry_after = Some(hint);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if let Some(status) = e.status() {
            ErrorKind::from_status(status.as_u16())
        } else {
            // Connection-level failures are worth retrying.
            ErrorKind::Internal
        };
        Self::new(kind, e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_table() {
        assert_eq!(ErrorKind::from_status(400), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_status(401), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimitExceeded);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::Internal);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Internal);
        assert_eq!(ErrorKind::from_status(529), ErrorKind::Overloaded);
        assert_eq!(ErrorKind::from_status(200), ErrorKind::Unknown);
    }

    #[test]
    fn retryability_per_kind() {
        assert!(!ErrorKind::InvalidRequest.is_retryable());
        assert!(ErrorKind::RateLimitExceeded.is_retryable());
        assert!(ErrorKind::Overloaded.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Canceled.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn retry_after_is_attached() {
        let e = ProviderError::from_status(429, "slow down")
            .with_retry_after(Duration::from_secs(2));
        assert_eq!(e.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(e.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn display_includes_kind_and_message() {
        let e = ProviderError::from_status(529, "busy");
        assert_eq!(e.to_string(), "overloaded: busy");
    }
}
