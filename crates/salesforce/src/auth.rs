//! OAuth2 refresh-token grant against the Salesforce token endpoint

use chrono::{DateTime, Utc};
use common::SalesforceSettings;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{Result, SalesforceError};

#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl OAuthCredentials {
    /// `None` unless client id, secret and refresh token are all set
    pub fn from_settings(settings: &SalesforceSettings) -> Option<Self> {
        Some(Self {
            client_id: settings.client_id.clone()?,
            client_secret: settings.client_secret.clone()?,
            refresh_token: settings.refresh_token.clone()?,
            token_url: settings.token_url.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub instance_url: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    /// Milliseconds since the epoch, as a string
    #[serde(default)]
    issued_at: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub async fn refresh_access_token(
    http: &Client,
    credentials: &OAuthCredentials,
) -> Result<AccessToken> {
    debug!("Refreshing Salesforce access token via {}", credentials.token_url);

    let response = http
        .post(&credentials.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
        ])
        .send()
        .await
        .map_err(|e| SalesforceError::TokenRefresh {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| SalesforceError::TokenRefresh {
        status: Some(status.as_u16()),
        message: e.to_string(),
    })?;

    if !status.is_success() {
        let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => body,
        };
        error!("Token refresh rejected: HTTP {} {}", status, message);
        return Err(SalesforceError::TokenRefresh {
            status: Some(status.as_u16()),
            message,
        });
    }

    let token: TokenResponse =
        serde_json::from_str(&body).map_err(|e| SalesforceError::TokenRefresh {
            status: Some(status.as_u16()),
            message: format!("malformed token response: {}", e),
        })?;

    let issued_at = token
        .issued_at
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    info!("Salesforce access token refreshed for {}", token.instance_url);
    Ok(AccessToken {
        access_token: token.access_token,
        instance_url: token.instance_url,
        issued_at,
    })
}
