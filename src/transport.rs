//! HTTP transport: sends a single request and classifies the response.
//!
//! Nothing here retries. Every non-2xx status is sorted into a
//! [`TransportError`] variant and left to the request policy to act on.

use crate::Error;
use crate::models::detail_text;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

/// Fallback wait when a 429 carries no usable retry hint.
pub(crate) const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Authentication attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthHeader {
    None,
    ApiKey(String),
    Bearer(String),
}

/// Classified failure of a single HTTP exchange.
#[derive(Debug)]
pub(crate) enum TransportError {
    /// 401: credential rejected or token expired.
    Unauthorized { detail: String },
    /// 403 without quota semantics.
    Forbidden { detail: String },
    RateLimited { retry_after: u64 },
    QuotaExceeded { status: u16, detail: String },
    BadRequest { status: u16, detail: String },
    /// 5xx, or any other status the service is not expected to send.
    Server { status: u16, detail: String },
    Network(reqwest::Error),
    Decode(serde_json::Error),
}

impl TransportError {
    /// Failures worth a bounded retry with backoff.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Server { status, .. } => *status >= 500,
            Self::Network(_) => true,
            _ => false,
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized { detail } => Error::authentication(detail, Some(401)),
            TransportError::Forbidden { detail } => Error::authentication(detail, Some(403)),
            TransportError::RateLimited { retry_after } => Error::RateLimit { retry_after },
            TransportError::QuotaExceeded { status, detail } => {
                Error::QuotaExceeded { status, detail }
            }
            TransportError::BadRequest { status, detail } => Error::BadRequest { status, detail },
            TransportError::Server { status, detail } => Error::Server { status, detail },
            TransportError::Network(e) => Error::Request(e),
            TransportError::Decode(e) => Error::Json(e),
        }
    }
}

/// Thin wrapper over a configured `reqwest::Client` and the service base URL.
#[derive(Debug)]
pub(crate) struct Transport {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl Transport {
    pub(crate) fn new(http: reqwest::Client, base_url: String, user_agent: String) -> Self {
        Self {
            http,
            base_url,
            user_agent,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and return the parsed JSON body of a 2xx response.
    ///
    /// An empty 2xx body yields `Value::Null`.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: &AuthHeader,
    ) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url).headers(self.headers());
        request = match auth {
            AuthHeader::None => request,
            AuthHeader::ApiKey(key) => request.header(API_KEY_HEADER, key),
            AuthHeader::Bearer(token) => request.bearer_auth(token),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, path, "sending request");
        let response = request.send().await.map_err(TransportError::Network)?;
        Self::classify(response).await
    }

    async fn classify(response: Response) -> Result<Value, TransportError> {
        let status = response.status();
        let retry_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(TransportError::Network)?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(TransportError::Decode);
        }

        let body: Option<Value> = serde_json::from_str(&text).ok();
        let detail = error_detail(status, body.as_ref(), &text);
        tracing::debug!(status = status.as_u16(), %detail, "request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED => TransportError::Unauthorized { detail },
            StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited {
                retry_after: retry_header
                    .or_else(|| body.as_ref().and_then(retry_after_from_body))
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            StatusCode::PAYMENT_REQUIRED => TransportError::QuotaExceeded {
                status: status.as_u16(),
                detail,
            },
            StatusCode::FORBIDDEN if mentions_quota(&detail) => TransportError::QuotaExceeded {
                status: status.as_u16(),
                detail,
            },
            StatusCode::FORBIDDEN => TransportError::Forbidden { detail },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                TransportError::BadRequest {
                    status: status.as_u16(),
                    detail,
                }
            }
            _ => TransportError::Server {
                status: status.as_u16(),
                detail,
            },
        })
    }

    /// Build headers for API requests.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }
}

/// Pull a human-readable message out of an error body.
fn error_detail(status: StatusCode, body: Option<&Value>, raw: &str) -> String {
    body.and_then(|b| b.get("detail").or_else(|| b.get("message")).or_else(|| b.get("error")))
        .map(detail_text)
        .or_else(|| {
            let raw = raw.trim();
            (!raw.is_empty() && body.is_none()).then(|| raw.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        })
}

fn retry_after_from_body(body: &Value) -> Option<u64> {
    ["retry_after", "retryafter", "retryAfter"]
        .iter()
        .find_map(|key| body.get(*key))
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.ceil() as u64)))
}

fn mentions_quota(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    ["quota", "limit", "plan", "credits"]
        .iter()
        .any(|word| detail.contains(word))
}
