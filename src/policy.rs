//! Request policy: what to do when an authenticated call fails.
//!
//! | failure            | action                                          |
//! |--------------------|-------------------------------------------------|
//! | malformed email    | `Error::Validation`, nothing sent               |
//! | 401, JWT session   | one refresh, one retry, then `Authentication`   |
//! | 401, API key       | `Authentication`                                |
//! | 429                | `RateLimit { retry_after }`, no retry           |
//! | quota (402/403)    | `QuotaExceeded`                                 |
//! | 5xx / network      | up to `max_retries` retries, exponential backoff|

use crate::session::{Authorization, Session};
use crate::transport::{Transport, TransportError};
use crate::{Error, Result};
use rand::Rng;
use regex::Regex;
use reqwest::Method;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+$").expect("email shape pattern is valid")
});

/// Cheap syntactic guard run before any network call.
///
/// Only checks shape (one `@`, non-empty local part and domain, no
/// whitespace). Deliverability is the service's job.
pub(crate) fn check_email(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(Error::invalid_email(email, "email is empty"));
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return Err(Error::invalid_email(email, "missing '@'"));
    };
    if local.is_empty() {
        return Err(Error::invalid_email(email, "empty local part"));
    }
    if domain.is_empty() {
        return Err(Error::invalid_email(email, "empty domain"));
    }
    if !EMAIL_SHAPE.is_match(email) {
        return Err(Error::invalid_email(
            email,
            "unexpected whitespace or extra '@'",
        ));
    }
    Ok(())
}

/// Retry and refresh behavior shared by every authenticated call.
#[derive(Debug, Clone)]
pub(crate) struct RequestPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RequestPolicy {
    pub(crate) fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// POST `body` to `path` with the session's auth, applying the failure table above.
    pub(crate) async fn execute(
        &self,
        session: &Session,
        transport: &Transport,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        let auth = session.authorization(transport).await?;
        match self.send_with_backoff(transport, path, body, &auth).await {
            Err(TransportError::Unauthorized { detail }) if auth.is_refreshable() => {
                tracing::info!(%detail, "access token rejected, refreshing once");
                let renewed = session.refresh_rejected(transport, &auth).await?;
                match self.send_with_backoff(transport, path, body, &renewed).await {
                    Err(TransportError::Unauthorized { detail }) => Err(Error::authentication(
                        format!("rejected after token refresh: {detail}"),
                        Some(401),
                    )),
                    other => other.map_err(Into::into),
                }
            }
            other => other.map_err(Into::into),
        }
    }

    async fn send_with_backoff(
        &self,
        transport: &Transport,
        path: &str,
        body: &Value,
        auth: &Authorization,
    ) -> std::result::Result<Value, TransportError> {
        let mut attempt = 0;
        loop {
            match transport
                .send(Method::POST, path, Some(body), &auth.header)
                .await
            {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        ?delay,
                        error = ?err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// `base * 2^attempt` plus up to half of `base` in jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let jitter = if base >= 2 {
            rand::rng().random_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_mul(factor).saturating_add(jitter))
    }
}
