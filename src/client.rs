//! MailSafePro async client implementation.

use crate::models::{map_batch, map_single};
use crate::policy::{RequestPolicy, check_email};
use crate::session::Session;
use crate::transport::Transport;
use crate::{BatchResult, Credentials, Error, Result, TokenPair, ValidationResult};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::try_join_all;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

const VALIDATE_PATH: &str = "/validate";

/// Async client for the MailSafePro email validation service.
///
/// Use [`Client::new`] for an API key with default settings, [`Client::login`]
/// for a username/password session, or [`Client::builder`] for anything else.
///
/// All methods take `&self`; share one client between tasks (e.g. behind an
/// `Arc`) and concurrent calls will coordinate token refreshes between them.
#[derive(Debug)]
pub struct Client {
    transport: Transport,
    session: Session,
    policy: RequestPolicy,
    proxy: Option<String>,
    batch_size: usize,
    batch_concurrency: usize,
    call_timeout: Option<Duration>,
    check_smtp: bool,
}

impl Client {
    /// Create a builder for configuring the client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client that authenticates with a static API key.
    ///
    /// # Examples
    /// ```no_run
    /// # use mailsafepro_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mailsafepro_client::Error> {
    /// let client = Client::new("key_your_api_key_here").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(api_key: impl Into<String>) -> Result<Self> {
        ClientBuilder::new().api_key(api_key).build().await
    }

    /// Log in with username and password and return a JWT-mode client.
    ///
    /// # Examples
    /// ```no_run
    /// # use mailsafepro_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mailsafepro_client::Error> {
    /// let client = Client::login("you@example.com", "password").await?;
    /// let result = client.validate("test@example.com").await?;
    /// println!("{}: {}", result.email, result.is_valid);
    /// client.logout().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn login(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        ClientBuilder::new()
            .credentials(username, password)
            .build()
            .await
    }

    /// Get the proxy URL if one was configured.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Validate a single email address.
    ///
    /// The address is checked for basic shape first; a malformed address
    /// fails with [`Error::Validation`] without contacting the service.
    ///
    /// # Examples
    /// ```no_run
    /// # use mailsafepro_client::{Client, Error};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Error> {
    /// let client = Client::new("key_your_api_key_here").await?;
    /// match client.validate("user@gmail.com").await {
    ///     Ok(result) => println!("{} -> {}", result.email, result.suggested_action),
    ///     Err(Error::RateLimit { retry_after }) => println!("retry in {retry_after}s"),
    ///     Err(e) => return Err(e),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn validate(&self, email: &str) -> Result<ValidationResult> {
        check_email(email)?;
        with_deadline(self.call_timeout, async {
            let body = json!({ "email": email, "check_smtp": self.check_smtp });
            let payload = self
                .policy
                .execute(&self.session, &self.transport, VALIDATE_PATH, &body)
                .await?;
            map_single(payload)
        })
        .await
    }

    /// Validate many addresses.
    ///
    /// Every address is shape-checked before anything is sent. The list is
    /// split into requests of `batch_size` addresses, at most
    /// `batch_concurrency` of which are in flight at once; results come back in
    /// input order regardless of which request finished first. A request whose
    /// response holds a different number of results than addresses sent fails
    /// the whole call with [`Error::ResponseParse`].
    ///
    /// # Examples
    /// ```no_run
    /// # use mailsafepro_client::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mailsafepro_client::Error> {
    /// let client = Client::new("key_your_api_key_here").await?;
    /// let batch = client
    ///     .validate_batch(&["user1@gmail.com", "sales@company.com"])
    ///     .await?;
    /// println!("{}/{} valid", batch.valid_count(), batch.total_count());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn validate_batch<S: AsRef<str>>(&self, emails: &[S]) -> Result<BatchResult> {
        if emails.is_empty() {
            return Err(Error::invalid_email("", "batch contains no emails"));
        }
        let emails: Vec<&str> = emails.iter().map(AsRef::as_ref).collect();
        for email in &emails {
            check_email(email)?;
        }

        let limit = Semaphore::new(self.batch_concurrency);
        with_deadline(self.call_timeout, async {
            let requests = emails
                .chunks(self.batch_size)
                .enumerate()
                .map(|(index, chunk)| {
                    let limit = &limit;
                    async move {
                        let _permit = limit
                            .acquire()
                            .await
                            .map_err(|_| Error::Config("batch limiter closed".into()))?;
                        tracing::debug!(chunk = index, size = chunk.len(), "dispatching batch");
                        let body = json!({ "emails": chunk, "check_smtp": self.check_smtp });
                        let payload = self
                            .policy
                            .execute(&self.session, &self.transport, VALIDATE_PATH, &body)
                            .await?;
                        let part = map_batch(payload)?;
                        if part.total_count() != chunk.len() {
                            return Err(Error::ResponseParse(format!(
                                "batch chunk {index}: sent {} addresses, received {} results",
                                chunk.len(),
                                part.total_count()
                            )));
                        }
                        Ok::<_, Error>(part)
                    }
                });
            let parts = try_join_all(requests).await?;
            Ok(BatchResult::merge(parts))
        })
        .await
    }

    /// Refresh the JWT access token now instead of waiting for it to near expiry.
    ///
    /// Fails with [`Error::Authentication`] for API-key clients and when the
    /// refresh token is rejected (the session is cleared in that case).
    pub async fn refresh(&self) -> Result<()> {
        with_deadline(
            self.call_timeout,
            self.session.refresh(&self.transport),
        )
        .await
    }

    /// End the session.
    ///
    /// Asks the service to invalidate the token, then clears local token
    /// state whatever the outcome. Server or network failures are logged, not
    /// returned. Authenticated calls made afterwards fail with
    /// [`Error::Authentication`]. A no-op for API-key clients.
    pub async fn logout(&self) {
        self.session.logout(&self.transport).await;
    }

    /// Snapshot of the credentials in use, or `None` after logout.
    pub async fn credentials(&self) -> Option<Credentials> {
        self.session.credentials().await
    }

    /// Whether the client still holds usable credentials.
    pub async fn is_authenticated(&self) -> bool {
        self.credentials().await.is_some()
    }

    /// Expiry of the current access token, for JWT sessions.
    pub async fn session_expires_at(&self) -> Option<DateTime<Utc>> {
        match self.credentials().await? {
            Credentials::Jwt(tokens) => Some(tokens.expires_at),
            Credentials::ApiKey(_) => None,
        }
    }
}

/// Run `fut`, failing with [`Error::Timeout`] if `limit` elapses first.
///
/// Dropping the inner future aborts any request in flight.
async fn with_deadline<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

const BASE_URL: &str = "https://api.mailsafepro.com";
const USER_AGENT_VALUE: &str = concat!("mailsafepro-client-rs/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(30);
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_CONCURRENCY: usize = 5;

#[derive(Clone)]
enum AuthConfig {
    ApiKey(String),
    Password { username: String, password: String },
    Tokens(TokenPair),
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Tokens(tokens) => f.debug_tuple("Tokens").field(tokens).finish(),
        }
    }
}

/// Builder for configuring a MailSafePro client.
///
/// Start with [`Client::builder`] and pick exactly one auth mode:
/// [`api_key`](Self::api_key), [`credentials`](Self::credentials) or
/// [`tokens`](Self::tokens). The last one set wins.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    auth: Option<AuthConfig>,
    base_url: String,
    timeout: Duration,
    call_timeout: Option<Duration>,
    max_retries: u32,
    retry_base_delay: Duration,
    refresh_skew: Duration,
    batch_size: usize,
    batch_concurrency: usize,
    proxy: Option<String>,
    user_agent: String,
    check_smtp: bool,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    ///
    /// Defaults:
    /// - No credentials
    /// - Base URL `https://api.mailsafepro.com`
    /// - 30 s per-request timeout, no overall call deadline
    /// - 2 retries on server/network failures, 500 ms base backoff
    /// - Refresh tokens 30 s before expiry
    /// - Batches of 100 addresses, 5 requests in flight
    /// - No SMTP mailbox check
    pub fn new() -> Self {
        Self {
            auth: None,
            base_url: BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            call_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            refresh_skew: DEFAULT_REFRESH_SKEW,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            proxy: None,
            user_agent: USER_AGENT_VALUE.to_string(),
            check_smtp: false,
        }
    }

    /// Seed a builder from the environment.
    ///
    /// Reads `MAILSAFEPRO_API_KEY`, `MAILSAFEPRO_BASE_URL` and
    /// `MAILSAFEPRO_TIMEOUT_SECS`; unset or unparsable values keep the defaults.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        if let Ok(key) = std::env::var("MAILSAFEPRO_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Ok(url) = std::env::var("MAILSAFEPRO_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(secs) = std::env::var("MAILSAFEPRO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder
    }

    /// Authenticate every request with a static API key (`X-API-Key` header).
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::ApiKey(api_key.into()));
        self
    }

    /// Log in with username and password when the client is built.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::Password {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Resume a JWT session from previously issued tokens, skipping login.
    pub fn tokens(mut self, tokens: TokenPair) -> Self {
        self.auth = Some(AuthConfig::Tokens(tokens));
        self
    }

    /// Override the service base URL.
    ///
    /// Useful for testing or self-hosted deployments.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Timeout applied to each individual HTTP request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline for each top-level call, retries and refreshes included.
    ///
    /// Exceeding it fails the call with [`Error::Timeout`].
    pub fn call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = Some(limit);
        self
    }

    /// Retries after a 5xx or network failure (default: 2).
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// First retry delay; each further retry doubles it.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// How long before expiry a JWT access token is refreshed proactively.
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Addresses per batch request. Clamped to at least 1.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Batch requests in flight at once. Clamped to at least 1.
    pub fn batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }

    /// Set a proxy URL (e.g., "socks5://127.0.0.1:1080").
    ///
    /// This uses reqwest's proxy support for all requests.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Ask the service to probe the recipient's mail server for each address.
    ///
    /// Slower, and counted against plans that meter SMTP checks.
    pub fn check_smtp(mut self, enabled: bool) -> Self {
        self.check_smtp = enabled;
        self
    }

    /// Override the default user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client.
    ///
    /// With [`credentials`](Self::credentials) this performs the login request;
    /// otherwise no network call is made.
    ///
    /// # Examples
    /// ```no_run
    /// # use mailsafepro_client::Client;
    /// # use std::time::Duration;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mailsafepro_client::Error> {
    /// let client = Client::builder()
    ///     .api_key("key_your_api_key_here")
    ///     .timeout(Duration::from_secs(60))
    ///     .batch_concurrency(8)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn build(self) -> Result<Client> {
        let skew = TimeDelta::from_std(self.refresh_skew)
            .map_err(|_| Error::Config("refresh skew is out of range".into()))?;

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        let http = builder.build()?;
        let transport = Transport::new(
            http,
            self.base_url.trim_end_matches('/').to_string(),
            self.user_agent,
        );

        let session = match self.auth {
            None => {
                return Err(Error::Config(
                    "no credentials configured; set an API key or username and password".into(),
                ));
            }
            Some(AuthConfig::ApiKey(key)) if key.trim().is_empty() => {
                return Err(Error::Config("API key is empty".into()));
            }
            Some(AuthConfig::ApiKey(key)) => Session::api_key(key),
            Some(AuthConfig::Tokens(tokens)) => Session::jwt(tokens, skew),
            Some(AuthConfig::Password { username, password }) => {
                let tokens = with_deadline(
                    self.call_timeout,
                    Session::login(&transport, &username, &password),
                )
                .await?;
                Session::jwt(tokens, skew)
            }
        };

        Ok(Client {
            transport,
            session,
            policy: RequestPolicy::new(self.max_retries, self.retry_base_delay),
            proxy: self.proxy,
            batch_size: self.batch_size,
            batch_concurrency: self.batch_concurrency,
            call_timeout: self.call_timeout,
            check_smtp: self.check_smtp,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
