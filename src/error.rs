//! Error taxonomy for MailSafePro operations.

use std::time::Duration;

/// Errors returned by the MailSafePro client.
///
/// Variants are tagged by cause so callers can branch on the kind of failure
/// (back off on [`Error::RateLimit`], re-login on [`Error::Authentication`])
/// without inspecting messages. [`Error::Request`], [`Error::Json`],
/// [`Error::ResponseParse`], [`Error::Server`], [`Error::Timeout`] and
/// [`Error::Config`] form the generic bucket of transport and payload failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The email address is malformed; no request was sent.
    #[error("invalid email address {email:?}: {reason}")]
    Validation {
        /// The offending input.
        email: String,
        /// Why the address was rejected.
        reason: String,
    },

    /// Credentials or tokens were rejected, or no session is active.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human-readable reason.
        message: String,
        /// HTTP status when the rejection came from the server.
        status: Option<u16>,
    },

    /// The service is rate limiting this client.
    ///
    /// Nothing is retried automatically; wait `retry_after` seconds before trying again.
    #[error("rate limit exceeded, retry after {retry_after} seconds")]
    RateLimit {
        /// Seconds to wait before retrying.
        retry_after: u64,
    },

    /// The account quota for the current period is used up.
    #[error("quota exceeded (HTTP {status}): {detail}")]
    QuotaExceeded {
        /// HTTP status (402 or 403).
        status: u16,
        /// Server-provided explanation.
        detail: String,
    },

    /// The server rejected the request as malformed.
    #[error("request rejected (HTTP {status}): {detail}")]
    BadRequest {
        /// HTTP status.
        status: u16,
        /// Server-provided explanation.
        detail: String,
    },

    /// The server failed or answered with an unexpected status.
    #[error("server error (HTTP {status}): {detail}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Server-provided explanation.
        detail: String,
    },

    /// Network-level failure from the HTTP client.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response JSON did not have the expected shape.
    #[error("failed to parse response: {0}")]
    ResponseParse(String),

    /// A top-level call exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The client was configured incorrectly.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn authentication(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Authentication {
            message: message.into(),
            status,
        }
    }

    pub(crate) fn invalid_email(email: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            email: email.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } => *status,
            Self::RateLimit { .. } => Some(429),
            Self::QuotaExceeded { status, .. }
            | Self::BadRequest { status, .. }
            | Self::Server { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Seconds the caller should wait before retrying, for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => Some(Duration::from_secs(*retry_after)),
            _ => None,
        }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// Rate limits, server failures, network failures and timeouts are
    /// retryable; rejected input, credentials and exhausted quota are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Server { .. } | Self::Request(_) | Self::Timeout(_)
        )
    }
}
