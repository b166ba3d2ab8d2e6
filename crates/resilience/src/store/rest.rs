use async_trait::async_trait;
use chrono::Utc;
use common::ErrorStoreSettings;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use super::{ErrorStore, StoreError};
use crate::record::{MigrationError, NewMigrationError, RecoveryEvent};

/// Ledger backed by a PostgREST endpoint (`{base}/rest/v1/{table}`)
#[derive(Debug, Clone)]
pub struct RestErrorStore {
    client: Client,
    base_url: String,
    api_key: String,
    errors_table: String,
    logs_table: String,
}

impl RestErrorStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            errors_table: "migration_errors".to_string(),
            logs_table: "migration_logs".to_string(),
        })
    }

    pub fn from_settings(settings: &ErrorStoreSettings) -> Result<Self, StoreError> {
        let url = settings
            .url
            .clone()
            .ok_or_else(|| StoreError::NotConfigured("error_store.url".to_string()))?;
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| StoreError::NotConfigured("error_store.api_key".to_string()))?;

        Ok(Self::new(url, api_key)?.with_tables(&settings.errors_table, &settings.logs_table))
    }

    pub fn with_tables(mut self, errors_table: &str, logs_table: &str) -> Self {
        self.errors_table = errors_table.to_string();
        self.logs_table = logs_table.to_string();
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!("Error store request failed: HTTP {} {}", status, message);
            return Err(StoreError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Vec<MigrationError>, StoreError> {
        let response = self
            .authorized(self.client.get(self.table_url(&self.errors_table)))
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }
}

/// Row posted for a new error; unresolved until someone closes it
fn insert_body(error: &NewMigrationError) -> Result<Value, StoreError> {
    let mut body = serde_json::to_value(error)?;
    body["resolved"] = json!(false);
    Ok(body)
}

#[async_trait]
impl ErrorStore for RestErrorStore {
    async fn record_error(&self, error: NewMigrationError) -> Result<MigrationError, StoreError> {
        let body = insert_body(&error)?;

        let response = self
            .authorized(self.client.post(self.table_url(&self.errors_table)))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let rows: Vec<MigrationError> = Self::decode(response).await?;
        let stored = rows.into_iter().next().ok_or(StoreError::EmptyResponse)?;
        debug!("Recorded migration error {} ({})", stored.id, stored.error_type);
        Ok(stored)
    }

    async fn record_recovery(&self, event: RecoveryEvent) -> Result<(), StoreError> {
        let message = format!(
            "{} recovered after {} attempts",
            event.operation, event.attempts
        );
        let body = json!({
            "project_id": &event.project_id,
            "object_type_id": &event.object_type_id,
            "record_id": &event.record_id,
            "level": "info",
            "message": message,
            "details": &event,
        });

        let response = self
            .authorized(self.client.post(self.table_url(&self.logs_table)))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn resolve_error(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<MigrationError, StoreError> {
        let body = json!({
            "resolved": true,
            "resolution_notes": notes,
            "resolved_at": Utc::now(),
        });

        // The resolved=eq.false filter makes the update a one-shot transition.
        let response = self
            .authorized(self.client.patch(self.table_url(&self.errors_table)))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id)), ("resolved", "eq.false".to_string())])
            .json(&body)
            .send()
            .await?;

        let rows: Vec<MigrationError> = Self::decode(response).await?;
        if let Some(updated) = rows.into_iter().next() {
            return Ok(updated);
        }

        let existing = self.fetch(&[("id", format!("eq.{}", id))]).await?;
        if existing.is_empty() {
            Err(StoreError::NotFound(id))
        } else {
            Err(StoreError::AlreadyResolved(id))
        }
    }

    async fn unresolved_errors(&self, project_id: &str) -> Result<Vec<MigrationError>, StoreError> {
        self.fetch(&[
            ("project_id", format!("eq.{}", project_id)),
            ("resolved", "eq.false".to_string()),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }

    async fn errors_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<MigrationError>, StoreError> {
        self.fetch(&[
            ("project_id", format!("eq.{}", project_id)),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_body_marks_row_unresolved() {
        let body = insert_body(&NewMigrationError {
            project_id: "p1".into(),
            object_type_id: "contacts".into(),
            record_id: None,
            error_type: "network".into(),
            error_message: "ECONNRESET".into(),
            error_details: json!({"attempts": 4}),
        })
        .unwrap();

        assert_eq!(body["project_id"], "p1");
        assert_eq!(body["error_details"]["attempts"], 4);
        assert_eq!(body["resolved"], false);
    }

    #[test]
    fn test_encode_failure_is_a_store_error() {
        let failure = serde_json::from_str::<Value>("{").unwrap_err();
        let error = StoreError::from(failure);

        assert!(matches!(error, StoreError::Encode(_)));
        assert!(error.to_string().starts_with("Failed to encode migration error"));
    }
}
