//! Credential and session management.
//!
//! A client authenticates either with a static API key or with a JWT
//! access/refresh pair. In JWT mode the token state lives behind an async
//! `RwLock` and is only ever replaced wholesale, inside the single refresh
//! path guarded by `refresh_lock`. Readers work on cloned snapshots.

use crate::transport::{AuthHeader, Transport, TransportError};
use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use tokio::sync::{Mutex, RwLock};

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// JWT access/refresh pair issued by the authentication endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry of `access_token`.
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Whether the access token expires within `skew` from now (or already has).
    pub fn expires_within(&self, skew: TimeDelta) -> bool {
        Utc::now()
            .checked_add_signed(skew)
            .is_none_or(|edge| edge >= self.expires_at)
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The credentials a client currently authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Jwt(TokenPair),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Jwt(tokens) => f.debug_tuple("Jwt").field(tokens).finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn parse(payload: Value) -> Result<Self> {
        serde_json::from_value(payload)
            .map_err(|e| Error::ResponseParse(format!("token response: {e}")))
    }

    /// Build the new pair, keeping `previous_refresh` when the server did not rotate it.
    fn into_pair(self, previous_refresh: Option<&str>) -> Result<TokenPair> {
        let lifetime = TimeDelta::try_seconds(self.expires_in)
            .filter(|d| *d >= TimeDelta::zero())
            .ok_or_else(|| Error::ResponseParse(format!("invalid expires_in {}", self.expires_in)))?;
        let refresh_token = self
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))
            .ok_or_else(|| Error::ResponseParse("token response: missing refresh_token".into()))?;
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .ok_or_else(|| Error::ResponseParse(format!("expires_in {} is out of range", self.expires_in)))?;
        Ok(TokenPair {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Auth to attach to one request, tagged with the token generation it came from.
#[derive(Debug, Clone)]
pub(crate) struct Authorization {
    pub(crate) header: AuthHeader,
    generation: Option<u64>,
}

impl Authorization {
    /// Only JWT sessions can recover from a 401 by refreshing.
    pub(crate) fn is_refreshable(&self) -> bool {
        self.generation.is_some()
    }
}

#[derive(Debug, Clone)]
struct TokenState {
    tokens: TokenPair,
    generation: u64,
}

#[derive(Debug)]
struct JwtSession {
    state: RwLock<Option<TokenState>>,
    refresh_lock: Mutex<()>,
    skew: TimeDelta,
}

enum Mode {
    ApiKey(String),
    Jwt(JwtSession),
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Jwt(jwt) => f.debug_tuple("Jwt").field(jwt).finish(),
        }
    }
}

/// Per-client credential holder.
#[derive(Debug)]
pub(crate) struct Session {
    mode: Mode,
}

impl Session {
    pub(crate) fn api_key(key: String) -> Self {
        Self {
            mode: Mode::ApiKey(key),
        }
    }

    pub(crate) fn jwt(tokens: TokenPair, skew: TimeDelta) -> Self {
        Self {
            mode: Mode::Jwt(JwtSession {
                state: RwLock::new(Some(TokenState {
                    tokens,
                    generation: 0,
                })),
                refresh_lock: Mutex::new(()),
                skew,
            }),
        }
    }

    /// Exchange username and password for a fresh token pair.
    pub(crate) async fn login(
        transport: &Transport,
        username: &str,
        password: &str,
    ) -> Result<TokenPair> {
        let body = json!({ "username": username, "password": password });
        let payload = transport
            .send(Method::POST, LOGIN_PATH, Some(&body), &AuthHeader::None)
            .await
            .map_err(|err| match err {
                TransportError::Network(e) => Error::Request(e),
                TransportError::Decode(e) => Error::Json(e),
                TransportError::RateLimited { .. } => {
                    Error::authentication("login rejected: too many attempts", Some(429))
                }
                TransportError::Unauthorized { detail } => {
                    Error::authentication(format!("login rejected: {detail}"), Some(401))
                }
                TransportError::Forbidden { detail } => {
                    Error::authentication(format!("login rejected: {detail}"), Some(403))
                }
                TransportError::QuotaExceeded { status, detail }
                | TransportError::BadRequest { status, detail }
                | TransportError::Server { status, detail } => {
                    Error::authentication(format!("login rejected: {detail}"), Some(status))
                }
            })?;
        let tokens = TokenResponse::parse(payload)?.into_pair(None)?;
        tracing::info!(expires_at = %tokens.expires_at, "logged in");
        Ok(tokens)
    }

    /// Snapshot of the active credentials; `None` once a JWT session is cleared.
    pub(crate) async fn credentials(&self) -> Option<Credentials> {
        match &self.mode {
            Mode::ApiKey(key) => Some(Credentials::ApiKey(key.clone())),
            Mode::Jwt(jwt) => jwt
                .state
                .read()
                .await
                .as_ref()
                .map(|s| Credentials::Jwt(s.tokens.clone())),
        }
    }

    /// Auth for the next request, refreshing first if the token is inside the skew window.
    pub(crate) async fn authorization(&self, transport: &Transport) -> Result<Authorization> {
        let jwt = match &self.mode {
            Mode::ApiKey(key) => {
                return Ok(Authorization {
                    header: AuthHeader::ApiKey(key.clone()),
                    generation: None,
                });
            }
            Mode::Jwt(jwt) => jwt,
        };

        let snapshot = jwt.snapshot().await?;
        if snapshot.tokens.expires_within(jwt.skew) {
            tracing::debug!(expires_at = %snapshot.tokens.expires_at, "access token near expiry");
            return jwt.refresh_after(transport, snapshot.generation).await;
        }
        Ok(snapshot.authorization())
    }

    /// Refresh after the server rejected `rejected`, coalescing with any refresh
    /// that already replaced that token.
    pub(crate) async fn refresh_rejected(
        &self,
        transport: &Transport,
        rejected: &Authorization,
    ) -> Result<Authorization> {
        match (&self.mode, rejected.generation) {
            (Mode::Jwt(jwt), Some(generation)) => jwt.refresh_after(transport, generation).await,
            _ => Err(Error::authentication(
                "API key sessions cannot be refreshed",
                None,
            )),
        }
    }

    /// Force a refresh of the current token pair.
    pub(crate) async fn refresh(&self, transport: &Transport) -> Result<()> {
        match &self.mode {
            Mode::ApiKey(_) => Err(Error::authentication(
                "API key sessions cannot be refreshed",
                None,
            )),
            Mode::Jwt(jwt) => {
                let snapshot = jwt.snapshot().await?;
                jwt.refresh_after(transport, snapshot.generation).await.map(|_| ())
            }
        }
    }

    /// Invalidate the session server-side (best effort) and always clear local tokens.
    pub(crate) async fn logout(&self, transport: &Transport) {
        let Mode::Jwt(jwt) = &self.mode else {
            tracing::debug!("logout on an API key client is a no-op");
            return;
        };

        let _guard = jwt.refresh_lock.lock().await;
        let Some(current) = jwt.state.read().await.clone() else {
            return;
        };

        let auth = AuthHeader::Bearer(current.tokens.access_token.clone());
        match transport.send(Method::POST, LOGOUT_PATH, None, &auth).await {
            Ok(_) => tracing::info!("logged out"),
            Err(err) => tracing::warn!(error = %Error::from(err), "server-side logout failed"),
        }
        *jwt.state.write().await = None;
    }
}

impl TokenState {
    fn authorization(&self) -> Authorization {
        Authorization {
            header: AuthHeader::Bearer(self.tokens.access_token.clone()),
            generation: Some(self.generation),
        }
    }
}

impl JwtSession {
    async fn snapshot(&self) -> Result<TokenState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::authentication("no active session, log in again", None))
    }

    /// Refresh unless the token of generation `seen` was already replaced.
    ///
    /// Callers queue on `refresh_lock`; the first performs the network call and
    /// the rest observe the new generation and reuse it. New tokens are written
    /// only after a complete, parsed response, so a cancelled refresh leaves
    /// the previous state intact.
    async fn refresh_after(&self, transport: &Transport, seen: u64) -> Result<Authorization> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot().await?;
        if current.generation != seen {
            return Ok(current.authorization());
        }

        let body = json!({ "refresh_token": current.tokens.refresh_token });
        let outcome = match transport
            .send(Method::POST, REFRESH_PATH, Some(&body), &AuthHeader::None)
            .await
        {
            Ok(payload) => TokenResponse::parse(payload)
                .and_then(|r| r.into_pair(Some(&current.tokens.refresh_token))),
            Err(
                err @ (TransportError::Unauthorized { .. }
                | TransportError::Forbidden { .. }
                | TransportError::BadRequest { .. }),
            ) => {
                let err = Error::from(err);
                tracing::info!(error = %err, "refresh token rejected, clearing session");
                *self.state.write().await = None;
                return Err(Error::authentication(
                    format!("session refresh rejected: {err}"),
                    err.status(),
                ));
            }
            Err(err) => Err(err.into()),
        };

        let tokens = outcome?;
        tracing::info!(expires_at = %tokens.expires_at, "access token refreshed");
        let next = TokenState {
            tokens,
            generation: current.generation + 1,
        };
        let auth = next.authorization();
        *self.state.write().await = Some(next);
        Ok(auth)
    }
}
