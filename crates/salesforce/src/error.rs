use resilience::{classify_message, classify_status, Classification, ErrorKind, RetryableError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One entry of a Salesforce error body (`[{message, errorCode, fields}]`)
///
/// Collection save results use `statusCode` for the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "errorCode", alias = "statusCode", default)]
    pub error_code: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ApiErrorDetail {
    pub fn kind(&self) -> ErrorKind {
        classify_error_code(&self.error_code).unwrap_or_else(|| classify_message(&self.message))
    }
}

impl fmt::Display for ApiErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)?;
        if !self.fields.is_empty() {
            write!(f, " [{}]", self.fields.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Salesforce API error (HTTP {status}): {}", join_details(.errors))]
    Api {
        status: u16,
        errors: Vec<ApiErrorDetail>,
    },

    #[error("OAuth token refresh failed: {message}")]
    TokenRefresh {
        status: Option<u16>,
        message: String,
    },

    #[error("Salesforce connection is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response from Salesforce: {0}")]
    InvalidResponse(String),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SalesforceError>;

fn join_details(errors: &[ApiErrorDetail]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Salesforce `errorCode`/`statusCode` values with a known kind
pub fn classify_error_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "REQUEST_LIMIT_EXCEEDED" | "TXN_SECURITY_METERING_ERROR" => ErrorKind::RateLimit,
        "INVALID_SESSION_ID" | "INVALID_AUTH_HEADER" | "INVALID_GRANT" => ErrorKind::Auth,
        "INSUFFICIENT_ACCESS"
        | "INSUFFICIENT_ACCESS_OR_READONLY"
        | "INSUFFICIENT_ACCESS_ON_CROSS_REFERENCE_ENTITY"
        | "API_DISABLED_FOR_ORG"
        | "FUNCTIONALITY_NOT_ENABLED"
        | "NOT_FOUND_OR_NO_ACCESS" => ErrorKind::Permission,
        "DUPLICATE_VALUE" | "DUPLICATES_DETECTED" | "DUPLICATE_EXTERNAL_ID" => {
            ErrorKind::Duplicate
        }
        "REQUIRED_FIELD_MISSING"
        | "FIELD_INTEGRITY_EXCEPTION"
        | "FIELD_CUSTOM_VALIDATION_EXCEPTION"
        | "INVALID_EMAIL_ADDRESS"
        | "INVALID_FIELD"
        | "INVALID_FIELD_FOR_INSERT_UPDATE"
        | "INVALID_TYPE_ON_FIELD_IN_RECORD"
        | "INVALID_OR_NULL_FOR_RESTRICTED_PICKLIST"
        | "MALFORMED_ID"
        | "MALFORMED_QUERY"
        | "NUMBER_OUTSIDE_VALID_RANGE"
        | "STRING_TOO_LONG"
        | "JSON_PARSER_ERROR"
        | "CANNOT_INSERT_UPDATE_ACTIVATE_ENTITY" => ErrorKind::Validation,
        "SERVER_UNAVAILABLE" | "UNABLE_TO_LOCK_ROW" | "REQUEST_RUNNING_TOO_LONG" => {
            ErrorKind::Network
        }
        _ => return None,
    };
    Some(kind)
}

impl RetryableError for SalesforceError {
    fn error_message(&self) -> String {
        self.to_string()
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            SalesforceError::Http(e) => e.status().map(|s| s.as_u16()),
            SalesforceError::Api { status, .. } => Some(*status),
            SalesforceError::TokenRefresh { status, .. } => *status,
            _ => None,
        }
    }

    fn classification(&self) -> Classification {
        let kind = match self {
            SalesforceError::Http(e) => return e.classification(),
            // error codes are more specific than the status
            SalesforceError::Api { status, errors } => errors
                .iter()
                .find_map(|e| classify_error_code(&e.error_code))
                .or_else(|| classify_status(*status))
                .unwrap_or_else(|| classify_message(&join_details(errors))),
            SalesforceError::TokenRefresh { status, .. } => match status.and_then(classify_status) {
                Some(kind @ (ErrorKind::Network | ErrorKind::RateLimit)) => kind,
                _ => ErrorKind::Auth,
            },
            SalesforceError::NotConfigured(_) => ErrorKind::Auth,
            SalesforceError::InvalidResponse(_) => ErrorKind::Unknown,
            SalesforceError::InvalidRequest(_)
            | SalesforceError::Csv(_)
            | SalesforceError::Json(_) => ErrorKind::Validation,
        };
        Classification::of(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_uses_error_code() {
        let error = SalesforceError::Api {
            status: 400,
            errors: vec![ApiErrorDetail {
                message: "Record locked".into(),
                error_code: "UNABLE_TO_LOCK_ROW".into(),
                fields: vec![],
            }],
        };
        // 400 alone would be validation
        assert_eq!(error.classification().kind, ErrorKind::Network);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_api_error_falls_back_to_status() {
        let error = SalesforceError::Api {
            status: 429,
            errors: vec![],
        };
        assert_eq!(error.classification().kind, ErrorKind::RateLimit);
        assert!(error.to_string().contains("no error details"));
    }

    #[test]
    fn test_token_refresh_classification() {
        let denied = SalesforceError::TokenRefresh {
            status: Some(400),
            message: "invalid_grant".into(),
        };
        assert_eq!(denied.classification().kind, ErrorKind::Auth);

        let outage = SalesforceError::TokenRefresh {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert!(outage.is_retryable());
    }

    #[test]
    fn test_detail_decoding_accepts_status_code() {
        let detail: ApiErrorDetail = serde_json::from_str(
            r#"{"statusCode":"DUPLICATE_VALUE","message":"duplicate value found","fields":["Email"]}"#,
        )
        .unwrap();
        assert_eq!(detail.kind(), ErrorKind::Duplicate);
        assert_eq!(detail.to_string(), "DUPLICATE_VALUE: duplicate value found [Email]");
    }
}
