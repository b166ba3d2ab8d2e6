//! Error taxonomy for migration failures
//!
//! Every failure is reduced to one of seven kinds. The kind fixes the severity
//! and whether the retry executor may try again. Classification is a pure
//! function of the HTTP status (when known) and the error message, so the same
//! failure is always classified the same way.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Auth,
    Validation,
    Duplicate,
    Permission,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::RateLimit,
        ErrorKind::Auth,
        ErrorKind::Validation,
        ErrorKind::Duplicate,
        ErrorKind::Permission,
        ErrorKind::Unknown,
    ];

    /// Stable name stored as `error_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Permission => "permission",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::Network => Severity::Medium,
            ErrorKind::RateLimit => Severity::Low,
            ErrorKind::Auth => Severity::High,
            ErrorKind::Validation => Severity::Medium,
            ErrorKind::Duplicate => Severity::Low,
            ErrorKind::Permission => Severity::High,
            ErrorKind::Unknown => Severity::Medium,
        }
    }

    /// Transient kinds; everything else fails fast
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Unknown
        )
    }

    /// Text suitable for showing to the person running the migration
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "Connection problem while talking to the CRM. The operation will be retried automatically."
            }
            ErrorKind::RateLimit => {
                "The CRM API rate limit was reached. Requests are being slowed down and retried."
            }
            ErrorKind::Auth => {
                "Authentication with the CRM failed. Reconnect the account and run the migration again."
            }
            ErrorKind::Validation => {
                "Some records were rejected because of invalid or missing field values. Review the field mapping."
            }
            ErrorKind::Duplicate => {
                "The record already exists in the destination. Consider an upsert with an external ID field."
            }
            ErrorKind::Permission => {
                "The connected user lacks permission for this object or field. Check the profile and permission sets."
            }
            ErrorKind::Unknown => {
                "An unexpected error occurred. It has been recorded for review."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown error kind: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(name)
    }
}

/// Kind plus the policy derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
}

impl Classification {
    pub fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            retryable: kind.is_retryable(),
        }
    }
}

impl From<ErrorKind> for Classification {
    fn from(kind: ErrorKind) -> Self {
        Classification::of(kind)
    }
}

// Checked in order; the first match wins.
static MESSAGE_PATTERNS: Lazy<Vec<(ErrorKind, Regex)>> = Lazy::new(|| {
    let table: [(ErrorKind, &str); 6] = [
        (
            ErrorKind::RateLimit,
            r"rate[ _-]?limit|too many requests|request_limit_exceeded|throttl|\b429\b",
        ),
        (
            ErrorKind::Auth,
            r"unauthori[sz]ed|invalid_session_id|session (has )?expired|invalid_grant|authenticat|invalid (access )?token|token (has )?expired|\b401\b",
        ),
        (
            ErrorKind::Permission,
            r"forbidden|insufficient[_ ]access|permission|access denied|not allowed|\b403\b",
        ),
        (
            ErrorKind::Duplicate,
            r"duplicate|already exists|\b409\b",
        ),
        (
            ErrorKind::Network,
            r"network|timed? ?out|econnreset|econnrefused|enotfound|connection (reset|refused|closed|aborted)|socket hang up|fetch failed|dns|service unavailable|bad gateway|server error|\b5\d\d\b",
        ),
        (
            ErrorKind::Validation,
            r"validation|invalid|required|malformed|bad request|field_integrity|\b400\b|\b422\b",
        ),
    ];

    table
        .into_iter()
        .filter_map(|(kind, pattern)| {
            // Patterns are static; a bad one is skipped rather than aborting classification.
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|regex| (kind, regex))
        })
        .collect()
});

/// Classify a free-form error message
pub fn classify_message(message: &str) -> ErrorKind {
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(message))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Classify an HTTP status; `None` when the status says nothing useful
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimit),
        401 => Some(ErrorKind::Auth),
        403 => Some(ErrorKind::Permission),
        409 => Some(ErrorKind::Duplicate),
        400 | 422 => Some(ErrorKind::Validation),
        408 | 500..=599 => Some(ErrorKind::Network),
        _ => None,
    }
}

/// Errors the retry executor knows how to classify
pub trait RetryableError {
    fn error_message(&self) -> String;

    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Status code first, then the message
    fn classification(&self) -> Classification {
        let kind = self
            .status_code()
            .and_then(classify_status)
            .unwrap_or_else(|| classify_message(&self.error_message()));
        Classification::of(kind)
    }

    fn is_retryable(&self) -> bool {
        self.classification().retryable
    }

    fn error_type(&self) -> String {
        self.classification().kind.as_str().to_string()
    }
}

/// Generic error for call sites without a richer error type
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl RetryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_message(&message), message)
    }

    /// Kind from the status; falls back to the message for unmapped codes
    pub fn from_status_code(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_status(status_code).unwrap_or_else(|| classify_message(&message));
        Self {
            kind,
            message,
            status_code: Some(status_code),
        }
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (status {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RetryError {}

impl RetryableError for RetryError {
    fn error_message(&self) -> String {
        self.message.clone()
    }

    fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    fn classification(&self) -> Classification {
        Classification::of(self.kind)
    }
}

impl RetryableError for reqwest::Error {
    fn error_message(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }

    fn classification(&self) -> Classification {
        if self.is_timeout() || self.is_connect() {
            return Classification::of(ErrorKind::Network);
        }
        let kind = self
            .status_code()
            .and_then(classify_status)
            .unwrap_or_else(|| classify_message(&self.error_message()));
        Classification::of(kind)
    }
}

impl RetryableError for anyhow::Error {
    fn error_message(&self) -> String {
        format!("{:#}", self)
    }

    fn status_code(&self) -> Option<u16> {
        self.chain()
            .find_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .and_then(|e| e.status())
            .map(|s| s.as_u16())
    }

    fn classification(&self) -> Classification {
        if let Some(retry_error) = self.downcast_ref::<RetryError>() {
            return retry_error.classification();
        }
        if let Some(http_error) = self
            .chain()
            .find_map(|cause| cause.downcast_ref::<reqwest::Error>())
        {
            if http_error.is_timeout() || http_error.is_connect() {
                return Classification::of(ErrorKind::Network);
            }
        }
        let kind = self
            .status_code()
            .and_then(classify_status)
            .unwrap_or_else(|| classify_message(&self.error_message()));
        Classification::of(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_classification() {
        assert_eq!(classify_message("Rate limit exceeded"), ErrorKind::RateLimit);
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(
            classify_message("INVALID_SESSION_ID: Session expired or invalid"),
            ErrorKind::Auth
        );
        assert_eq!(
            classify_message("INSUFFICIENT_ACCESS_OR_READONLY: insufficient access rights"),
            ErrorKind::Permission
        );
        assert_eq!(
            classify_message("DUPLICATE_VALUE: duplicate value found: Email"),
            ErrorKind::Duplicate
        );
        assert_eq!(classify_message("request timed out"), ErrorKind::Network);
        assert_eq!(classify_message("ECONNRESET"), ErrorKind::Network);
        assert_eq!(
            classify_message("REQUIRED_FIELD_MISSING: Required fields are missing: [LastName]"),
            ErrorKind::Validation
        );
        assert_eq!(classify_message("something odd happened"), ErrorKind::Unknown);
    }

    #[test]
    fn test_numeric_codes_need_word_boundaries() {
        assert_eq!(classify_message("processed 1500 records"), ErrorKind::Unknown);
        assert_eq!(classify_message("status 500"), ErrorKind::Network);
        assert_eq!(classify_message("HTTP 507 Insufficient Storage"), ErrorKind::Network);
        assert_eq!(classify_message("upstream answered 599"), ErrorKind::Network);
        assert_eq!(classify_message("order 5000 shipped"), ErrorKind::Unknown);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(429), Some(ErrorKind::RateLimit));
        assert_eq!(classify_status(401), Some(ErrorKind::Auth));
        assert_eq!(classify_status(403), Some(ErrorKind::Permission));
        assert_eq!(classify_status(409), Some(ErrorKind::Duplicate));
        assert_eq!(classify_status(400), Some(ErrorKind::Validation));
        assert_eq!(classify_status(503), Some(ErrorKind::Network));
        assert_eq!(classify_status(404), None);
        assert_eq!(classify_status(200), None);
    }

    #[test]
    fn test_policy_table() {
        let fail_fast = [ErrorKind::Auth, ErrorKind::Validation, ErrorKind::Permission];
        for kind in fail_fast {
            assert!(!kind.is_retryable(), "{} must not be retried", kind);
        }
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Duplicate.is_retryable());
        assert_eq!(ErrorKind::Auth.severity(), Severity::High);
        assert_eq!(ErrorKind::RateLimit.severity(), Severity::Low);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
        assert!("timeout".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_retry_error_from_status_code() {
        let error = RetryError::from_status_code(429, "Rate limited");
        assert!(error.is_retryable());
        assert_eq!(error.error_type(), "rate_limit");

        let error = RetryError::from_status_code(400, "Bad request");
        assert!(!error.is_retryable());
        assert_eq!(error.error_type(), "validation");

        // unmapped status falls back to the message
        let error = RetryError::from_status_code(404, "duplicate external id");
        assert_eq!(error.kind, ErrorKind::Duplicate);
    }

    #[test]
    fn test_anyhow_classification() {
        let error = anyhow::anyhow!("socket hang up").context("pushing Contact batch");
        assert_eq!(error.classification().kind, ErrorKind::Network);

        let error = anyhow::Error::new(RetryError::new(ErrorKind::Permission, "nope"));
        assert_eq!(error.classification().kind, ErrorKind::Permission);
    }
}
