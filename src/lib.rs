//! # MailSafePro Client
//! Asynchronous client for the MailSafePro email validation HTTP API. It handles authentication (static API key, or a username/password login that yields an auto-refreshing JWT session), sends single and batch validation requests through [`Client`], and returns typed [`ValidationResult`] and [`BatchResult`] values.
//!
//! ## Audience and uses
//! For Rust services that need to screen addresses at sign-up, clean mailing lists, or gate outbound mail on deliverability: configure with [`ClientBuilder`], call [`Client::validate`] or [`Client::validate_batch`], and branch on the result's [`SuggestedAction`].
//!
//! ## Runtime requirements
//! Async-only; run inside a Tokio (v1) runtime. HTTP calls use `reqwest`. One [`Client`] can be shared between tasks: JWT refreshes are coalesced so concurrent callers never issue duplicate refresh requests.
//!
//! ## Out of scope
//! The crate performs no validation of its own beyond a cheap shape check (an `@` with something on both sides). Disposable-domain detection, SMTP probing and spam-trap scoring all happen on the service; the client only deserializes their verdicts.
//!
//! ## Errors
//! Every call returns [`Result`]. Failures are tagged by cause: [`Error::Validation`] for malformed input (nothing sent), [`Error::Authentication`] for rejected credentials, [`Error::RateLimit`] with the server's retry-after hint (never slept on internally), [`Error::QuotaExceeded`], and transport or payload failures such as [`Error::Request`] and [`Error::ResponseParse`].
//!
//! ## Logging
//! Requests, retries, and session changes are reported through `tracing`; install a subscriber to see them. Tokens and passwords are never logged.
//!
//! ## Example
//! ```no_run
//! use mailsafepro_client::{Client, SuggestedAction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mailsafepro_client::Error> {
//!     let client = Client::new("key_your_api_key_here").await?;
//!     let result = client.validate("user@gmail.com").await?;
//!     if result.suggested_action == SuggestedAction::Accept {
//!         println!("{} looks good (risk {:?})", result.email, result.risk_score);
//!     }
//!
//!     let batch = client
//!         .validate_batch(&["admin@example.com", "temp@10minutemail.com"])
//!         .await?;
//!     for r in batch.results() {
//!         println!("{}: valid={} disposable={}", r.email, r.is_valid, r.is_disposable);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod models;
mod policy;
mod session;
mod transport;

pub use client::{Client, ClientBuilder};
pub use error::Error;
pub use models::{
    BatchResult, DeliveryStatus, ProviderAnalysis, RoleEmail, SecurityInfo, SmtpValidation,
    SpamTrap, SuggestedAction, ValidationResult,
};
pub use session::{Credentials, TokenPair};

/// Result type alias for MailSafePro operations.
///
/// This is equivalent to `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
