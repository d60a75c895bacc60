//! Typed validation results and the mapping from the service's JSON payloads.
//!
//! The service answers with flat-case field names (`riskscore`,
//! `suggestedaction`, ...). The private `Wire*` structs mirror that shape and
//! are converted into the public types, so absent optional data stays `None`
//! instead of turning into a zero that looks like a real score.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Recommended handling of an address, as judged by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    /// Safe to accept.
    Accept,
    /// Should be rejected.
    Reject,
    /// Needs a human decision.
    Review,
}

impl SuggestedAction {
    /// Parse the service's action string. Unknown values map to `Review`.
    fn from_wire(value: Option<&str>) -> Self {
        match value.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("accept") => Self::Accept,
            Some("reject") => Self::Reject,
            _ => Self::Review,
        }
    }

    /// Lowercase wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deliverability verdict reported in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Deliverable,
    Undeliverable,
    Risky,
    Unknown,
}

impl DeliveryStatus {
    fn from_wire(value: Option<&str>) -> Self {
        match value.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("deliverable") => Self::Deliverable,
            Some("undeliverable") => Self::Undeliverable,
            Some("risky") => Self::Risky,
            _ => Self::Unknown,
        }
    }
}

/// Mailbox provider assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAnalysis {
    pub provider: String,
    pub is_popular: bool,
    pub reputation: Option<f64>,
}

/// Spam trap probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpamTrap {
    pub checked: bool,
    pub is_spam_trap: bool,
    pub confidence: Option<f64>,
}

/// Role account classification (`admin@`, `sales@`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleEmail {
    pub role_type: String,
}

/// Security-related findings. Each probe is absent when the service did not run it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityInfo {
    pub spam_trap: Option<SpamTrap>,
    pub role_email: Option<RoleEmail>,
}

/// SMTP mailbox probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmtpValidation {
    pub checked: bool,
    pub mailbox_exists: Option<bool>,
    pub detail: Option<String>,
}

/// Validation verdict for a single address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub email: String,
    pub is_valid: bool,
    pub deliverable: bool,
    pub format_valid: bool,
    pub dns_valid: bool,
    pub is_disposable: bool,
    pub is_free_email: bool,
    pub is_role_email: bool,
    /// Risk in `[0, 1]`, when the service tier reports one.
    pub risk_score: Option<f64>,
    /// Quality in `[0, 1]`, when the service tier reports one.
    pub quality_score: Option<f64>,
    pub suggested_action: SuggestedAction,
    pub status: DeliveryStatus,
    pub detail: Option<String>,
    /// Server-side processing time in seconds.
    pub processing_time: Option<f64>,
    pub validation_tier: Option<String>,
    pub provider_analysis: Option<ProviderAnalysis>,
    pub security_info: Option<SecurityInfo>,
    pub smtp_validation: Option<SmtpValidation>,
}

impl ValidationResult {
    /// Valid but not confirmed deliverable.
    pub fn is_risky(&self) -> bool {
        self.status == DeliveryStatus::Risky || (self.is_valid && !self.deliverable)
    }
}

/// Aggregated outcome of a batch validation.
///
/// Counts are always derived from `results`, never taken from the server's
/// own aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    total_count: usize,
    valid_count: usize,
    invalid_count: usize,
    deliverable_count: usize,
    risky_count: usize,
    unknown_count: usize,
    results: Vec<ValidationResult>,
    processing_time: f64,
    average_time: f64,
}

impl BatchResult {
    fn from_results(results: Vec<ValidationResult>, processing_time: f64, average_time: f64) -> Self {
        Self {
            total_count: results.len(),
            valid_count: count_where(&results, |r| r.is_valid),
            invalid_count: count_where(&results, |r| !r.is_valid),
            deliverable_count: count_where(&results, |r| r.deliverable),
            risky_count: count_where(&results, ValidationResult::is_risky),
            unknown_count: count_where(&results, |r| r.status == DeliveryStatus::Unknown),
            results,
            processing_time,
            average_time,
        }
    }

    /// Concatenate chunk results in order.
    ///
    /// A single part is returned untouched; otherwise processing times are
    /// summed and the average is recomputed over the merged total.
    pub(crate) fn merge(mut parts: Vec<BatchResult>) -> Self {
        if parts.len() == 1 {
            if let Some(only) = parts.pop() {
                return only;
            }
        }
        let processing_time: f64 = parts.iter().map(|p| p.processing_time).sum();
        let results: Vec<ValidationResult> = parts.into_iter().flat_map(|p| p.results).collect();
        let average_time = if results.is_empty() {
            0.0
        } else {
            processing_time / results.len() as f64
        };
        Self::from_results(results, processing_time, average_time)
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_count
    }

    pub fn deliverable_count(&self) -> usize {
        self.deliverable_count
    }

    pub fn risky_count(&self) -> usize {
        self.risky_count
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown_count
    }

    /// Per-address results, in input order.
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    /// Server-reported processing time in seconds.
    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    /// Server-reported average time per address in seconds.
    pub fn average_time(&self) -> f64 {
        self.average_time
    }

    pub fn valid(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_valid)
    }

    pub fn invalid(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.is_valid)
    }

    pub fn risky(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_risky())
    }

    pub fn into_results(self) -> Vec<ValidationResult> {
        self.results
    }
}

fn count_where(results: &[ValidationResult], pred: impl Fn(&ValidationResult) -> bool) -> usize {
    results.iter().filter(|r| pred(r)).count()
}

#[derive(Debug, Deserialize)]
struct WireResult {
    email: String,
    #[serde(alias = "is_valid", alias = "isvalid")]
    valid: bool,
    deliverable: Option<bool>,
    #[serde(alias = "format_valid")]
    formatvalid: Option<bool>,
    #[serde(alias = "dns_valid")]
    dnsvalid: Option<bool>,
    #[serde(alias = "is_disposable", alias = "disposable")]
    isdisposable: Option<bool>,
    #[serde(alias = "is_free_email", alias = "freeemail")]
    isfreeemail: Option<bool>,
    #[serde(alias = "is_role_email", alias = "roleemail")]
    isroleemail: Option<bool>,
    #[serde(alias = "risk_score")]
    riskscore: Option<f64>,
    #[serde(alias = "quality_score")]
    qualityscore: Option<f64>,
    #[serde(alias = "suggested_action")]
    suggestedaction: Option<String>,
    status: Option<String>,
    detail: Option<Value>,
    #[serde(alias = "processing_time")]
    processingtime: Option<f64>,
    #[serde(alias = "validation_tier")]
    validationtier: Option<String>,
    #[serde(alias = "provider_analysis")]
    provideranalysis: Option<WireProvider>,
    #[serde(alias = "security_info")]
    securityinfo: Option<WireSecurity>,
    #[serde(alias = "smtp_validation")]
    smtpvalidation: Option<WireSmtp>,
}

#[derive(Debug, Deserialize)]
struct WireProvider {
    provider: Option<String>,
    #[serde(alias = "is_popular")]
    ispopular: Option<bool>,
    reputation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireSecurity {
    #[serde(alias = "spam_trap")]
    spamtrap: Option<WireSpamTrap>,
    #[serde(alias = "role_email")]
    roleemail: Option<WireRole>,
}

#[derive(Debug, Deserialize)]
struct WireSpamTrap {
    checked: Option<bool>,
    #[serde(alias = "is_spam_trap")]
    isspamtrap: Option<bool>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    #[serde(alias = "role_type")]
    roletype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSmtp {
    checked: Option<bool>,
    #[serde(alias = "mailbox_exists")]
    mailboxexists: Option<bool>,
    detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireBatch {
    #[serde(alias = "valid_count")]
    validcount: Option<u64>,
    #[serde(alias = "processing_time")]
    processingtime: Option<f64>,
    #[serde(alias = "average_time")]
    averagetime: Option<f64>,
    results: Vec<Value>,
}

/// Render a `detail` value that may be a string or structured JSON.
pub(crate) fn detail_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a single-address payload into a [`ValidationResult`].
pub(crate) fn map_single(payload: Value) -> Result<ValidationResult> {
    let wire: WireResult = serde_json::from_value(payload)
        .map_err(|e| Error::ResponseParse(format!("validation result: {e}")))?;

    let status = DeliveryStatus::from_wire(wire.status.as_deref());
    let security_info = wire.securityinfo.map(|s| SecurityInfo {
        spam_trap: s.spamtrap.map(|t| SpamTrap {
            checked: t.checked.unwrap_or(false),
            is_spam_trap: t.isspamtrap.unwrap_or(false),
            confidence: t.confidence,
        }),
        role_email: s.roleemail.map(|r| RoleEmail {
            role_type: r.roletype.unwrap_or_else(|| "unknown".to_string()),
        }),
    });
    let is_role_email = wire
        .isroleemail
        .unwrap_or_else(|| matches!(&security_info, Some(SecurityInfo { role_email: Some(_), .. })));

    Ok(ValidationResult {
        is_valid: wire.valid,
        deliverable: wire
            .deliverable
            .unwrap_or(status == DeliveryStatus::Deliverable),
        format_valid: wire.formatvalid.unwrap_or(wire.valid),
        dns_valid: wire.dnsvalid.unwrap_or(wire.valid),
        is_disposable: wire.isdisposable.unwrap_or(false),
        is_free_email: wire.isfreeemail.unwrap_or(false),
        is_role_email,
        risk_score: wire.riskscore,
        quality_score: wire.qualityscore,
        suggested_action: SuggestedAction::from_wire(wire.suggestedaction.as_deref()),
        status,
        detail: wire.detail.as_ref().map(detail_text),
        processing_time: wire.processingtime,
        validation_tier: wire.validationtier,
        provider_analysis: wire.provideranalysis.map(|p| ProviderAnalysis {
            provider: p.provider.unwrap_or_else(|| "unknown".to_string()),
            is_popular: p.ispopular.unwrap_or(false),
            reputation: p.reputation,
        }),
        security_info,
        smtp_validation: wire.smtpvalidation.map(|s| SmtpValidation {
            checked: s.checked.unwrap_or(false),
            mailbox_exists: s.mailboxexists,
            detail: s.detail.as_ref().map(detail_text),
        }),
        email: wire.email,
    })
}

/// Map a batch payload into a [`BatchResult`].
pub(crate) fn map_batch(payload: Value) -> Result<BatchResult> {
    let wire: WireBatch = serde_json::from_value(payload)
        .map_err(|e| Error::ResponseParse(format!("batch result: {e}")))?;

    let results = wire
        .results
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            map_single(item).map_err(|e| Error::ResponseParse(format!("results[{index}]: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch = BatchResult::from_results(
        results,
        wire.processingtime.unwrap_or(0.0),
        wire.averagetime.unwrap_or(0.0),
    );
    if let Some(reported) = wire.validcount {
        if reported as usize != batch.valid_count {
            tracing::warn!(
                reported,
                computed = batch.valid_count,
                "server valid count disagrees with results"
            );
        }
    }
    Ok(batch)
}
