//! Salesforce REST API client
//!
//! Wraps the REST, composite and sobject-collection endpoints. The bearer token
//! lives behind an async lock: when a request comes back 401 and refresh
//! credentials are configured, the token is refreshed once and the request is
//! replayed.

use common::SalesforceSettings;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::auth::{refresh_access_token, OAuthCredentials};
use crate::error::{ApiErrorDetail, Result, SalesforceError};
use crate::transform::SObjectRecord;

/// Max records per sobject-collection call
pub const COLLECTION_BATCH_SIZE: usize = 200;
/// Max subrequests per composite call
pub const COMPOSITE_LIMIT: usize = 25;

enum Payload<'a> {
    Empty,
    Json(&'a Value),
    Text { content_type: &'a str, body: &'a str },
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    instance_url: String,
}

/// Per-record outcome of a collection create/update/upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveResult {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub created: Option<bool>,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

impl SaveResult {
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSubrequest {
    pub method: String,
    pub url: String,
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl CompositeSubrequest {
    pub fn new(method: &str, url: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            url: url.into(),
            reference_id: reference_id.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSubresponse {
    #[serde(default)]
    pub body: Value,
    pub http_status_code: u16,
    pub reference_id: String,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

impl CompositeSubresponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status_code)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeResponse {
    composite_response: Vec<CompositeSubresponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescribe {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub nillable: bool,
    #[serde(default)]
    pub createable: bool,
    #[serde(default)]
    pub updateable: bool,
    #[serde(default)]
    pub custom: bool,
    #[serde(rename = "externalId", default)]
    pub external_id: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
}

impl ObjectDescribe {
    pub fn field(&self, name: &str) -> Option<&FieldDescribe> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that must be supplied on insert
    pub fn required_on_create(&self) -> impl Iterator<Item = &FieldDescribe> {
        self.fields.iter().filter(|f| f.createable && !f.nillable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiLimit {
    pub max: i64,
    pub remaining: i64,
}

pub struct SalesforceClient {
    http: Client,
    session: RwLock<Session>,
    credentials: Option<OAuthCredentials>,
    api_version: String,
}

impl SalesforceClient {
    pub fn new(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_http(http, instance_url, access_token, api_version))
    }

    pub fn with_http(
        http: Client,
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            http,
            session: RwLock::new(Session {
                access_token: access_token.into(),
                instance_url: instance_url.into().trim_end_matches('/').to_string(),
            }),
            credentials: None,
            api_version: api_version.into(),
        }
    }

    pub fn with_credentials(mut self, credentials: OAuthCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Build from settings, refreshing up front when no access token is configured
    pub async fn connect(settings: &SalesforceSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let credentials = OAuthCredentials::from_settings(settings);

        let (instance_url, access_token) = match (&settings.instance_url, &settings.access_token) {
            (Some(url), Some(token)) => (url.clone(), token.clone()),
            _ => {
                let credentials = credentials.as_ref().ok_or_else(|| {
                    SalesforceError::NotConfigured(
                        "set an instance URL and access token, or a refresh token with client credentials"
                            .to_string(),
                    )
                })?;
                let token = refresh_access_token(&http, credentials).await?;
                (token.instance_url, token.access_token)
            }
        };

        let client = Self::with_http(http, instance_url, access_token, &settings.api_version);
        Ok(match credentials {
            Some(credentials) => client.with_credentials(credentials),
            None => client,
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub async fn instance_url(&self) -> String {
        self.session.read().await.instance_url.clone()
    }

    /// Fetch a fresh access token with the configured refresh credentials
    pub async fn refresh_token(&self) -> Result<()> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SalesforceError::NotConfigured("no refresh credentials".to_string())
        })?;
        let token = refresh_access_token(&self.http, credentials).await?;

        let mut session = self.session.write().await;
        session.access_token = token.access_token;
        session.instance_url = token.instance_url.trim_end_matches('/').to_string();
        Ok(())
    }

    fn resolve_url(&self, instance_url: &str, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with("/services/") {
            format!("{}{}", instance_url, path)
        } else {
            format!(
                "{}/services/data/v{}/{}",
                instance_url,
                self.api_version,
                path.trim_start_matches('/')
            )
        }
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        payload: &Payload<'_>,
    ) -> Result<reqwest::Response> {
        let session = self.session.read().await.clone();
        let url = self.resolve_url(&session.instance_url, path);
        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&session.access_token)
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(body),
            Payload::Text { content_type, body } => request
                .header("Content-Type", *content_type)
                .body(body.to_string()),
        };
        Ok(request.send().await?)
    }

    /// Send with one refresh-and-replay on 401; returns the success body
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload: Payload<'_>,
    ) -> Result<String> {
        let mut response = self.send(&method, path, query, &payload).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.credentials.is_some() {
            warn!("Salesforce session rejected, refreshing access token");
            self.refresh_token().await?;
            response = self.send(&method, path, query, &payload).await?;
        }

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let errors = parse_error_body(status, &text);
            error!(
                "Salesforce request {} {} failed: HTTP {} {:?}",
                method, path, status, errors
            );
            return Err(SalesforceError::Api {
                status: status.as_u16(),
                errors,
            });
        }
        Ok(text)
    }

    /// JSON request relative to `/services/data/vXX.X/`
    ///
    /// Paths starting with `/services/` are resolved against the instance URL.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        self.request_with_query(method, path, &[], body).await
    }

    async fn request_with_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T> {
        let payload = match body {
            Some(body) => Payload::Json(body),
            None => Payload::Empty,
        };
        let text = self.execute(method, path, query, payload).await?;

        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Non-JSON upload, e.g. CSV for bulk ingest
    pub async fn send_text(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: &str,
    ) -> Result<()> {
        self.execute(method, path, &[], Payload::Text { content_type, body })
            .await?;
        Ok(())
    }

    /// Run a SOQL query, following `nextRecordsUrl` until done
    pub async fn query(&self, soql: &str) -> Result<Vec<Value>> {
        let mut page: QueryResponse = self
            .request_with_query(Method::GET, "query", &[("q", soql)], None)
            .await?;
        let mut records = std::mem::take(&mut page.records);

        while !page.done {
            let Some(next) = page.next_records_url.take() else {
                break;
            };
            page = self.request(Method::GET, &next, None).await?;
            records.append(&mut page.records);
        }

        debug!("Query returned {} records", records.len());
        Ok(records)
    }

    pub async fn create_records(
        &self,
        object: &str,
        records: &[SObjectRecord],
    ) -> Result<Vec<SaveResult>> {
        self.save_collection(Method::POST, "composite/sobjects", object, records)
            .await
    }

    /// Records must carry their `Id`
    pub async fn update_records(
        &self,
        object: &str,
        records: &[SObjectRecord],
    ) -> Result<Vec<SaveResult>> {
        if let Some(position) = records.iter().position(|r| !r.contains_key("Id")) {
            return Err(SalesforceError::InvalidRequest(format!(
                "record {} has no Id to update",
                position
            )));
        }
        self.save_collection(Method::PATCH, "composite/sobjects", object, records)
            .await
    }

    pub async fn upsert_records(
        &self,
        object: &str,
        external_id_field: &str,
        records: &[SObjectRecord],
    ) -> Result<Vec<SaveResult>> {
        let path = format!("composite/sobjects/{}/{}", object, external_id_field);
        self.save_collection(Method::PATCH, &path, object, records)
            .await
    }

    async fn save_collection(
        &self,
        method: Method,
        path: &str,
        object: &str,
        records: &[SObjectRecord],
    ) -> Result<Vec<SaveResult>> {
        let mut results = Vec::with_capacity(records.len());

        for chunk in records.chunks(COLLECTION_BATCH_SIZE) {
            let payload: Vec<Value> = chunk
                .iter()
                .map(|record| {
                    let mut record = record.clone();
                    record.insert("attributes".to_string(), json!({ "type": object }));
                    Value::Object(record)
                })
                .collect();
            let body = json!({ "allOrNone": false, "records": payload });

            let mut chunk_results: Vec<SaveResult> =
                self.request(method.clone(), path, Some(&body)).await?;
            if chunk_results.len() != chunk.len() {
                return Err(SalesforceError::InvalidResponse(format!(
                    "expected {} save results, got {}",
                    chunk.len(),
                    chunk_results.len()
                )));
            }
            results.append(&mut chunk_results);
        }

        let saved = results.iter().filter(|r| r.success).count();
        info!(
            "{} {}: {}/{} records saved",
            method,
            object,
            saved,
            results.len()
        );
        Ok(results)
    }

    pub async fn composite(
        &self,
        subrequests: Vec<CompositeSubrequest>,
        all_or_none: bool,
    ) -> Result<Vec<CompositeSubresponse>> {
        if subrequests.len() > COMPOSITE_LIMIT {
            return Err(SalesforceError::InvalidRequest(format!(
                "composite accepts at most {} subrequests, got {}",
                COMPOSITE_LIMIT,
                subrequests.len()
            )));
        }

        let body = json!({
            "allOrNone": all_or_none,
            "compositeRequest": subrequests,
        });
        let response: CompositeResponse = self.request(Method::POST, "composite", Some(&body)).await?;
        Ok(response.composite_response)
    }

    pub async fn describe(&self, object: &str) -> Result<ObjectDescribe> {
        self.request(Method::GET, &format!("sobjects/{}/describe", object), None)
            .await
    }

    pub async fn limits(&self) -> Result<BTreeMap<String, ApiLimit>> {
        let raw: BTreeMap<String, Value> = self.request(Method::GET, "limits", None).await?;
        // nested per-app entries are skipped
        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| {
                serde_json::from_value::<ApiLimit>(value)
                    .ok()
                    .map(|limit| (name, limit))
            })
            .collect())
    }
}

fn parse_error_body(status: StatusCode, text: &str) -> Vec<ApiErrorDetail> {
    if let Ok(errors) = serde_json::from_str::<Vec<ApiErrorDetail>>(text) {
        return errors;
    }
    if let Ok(single) = serde_json::from_str::<ApiErrorDetail>(text) {
        if !single.message.is_empty() {
            return vec![single];
        }
    }
    vec![ApiErrorDetail {
        message: if text.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            text.to_string()
        },
        error_code: format!("HTTP_{}", status.as_u16()),
        fields: Vec::new(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_resolution() {
        let client = SalesforceClient::new("https://acme.my.salesforce.com/", "token", "58.0").unwrap();
        let base = "https://acme.my.salesforce.com";
        assert_eq!(
            client.resolve_url(base, "sobjects/Contact/describe"),
            "https://acme.my.salesforce.com/services/data/v58.0/sobjects/Contact/describe"
        );
        assert_eq!(
            client.resolve_url(base, "/services/data/v58.0/query/01gxx-2000"),
            "https://acme.my.salesforce.com/services/data/v58.0/query/01gxx-2000"
        );
    }

    #[test]
    fn test_error_body_parsing() {
        let errors = parse_error_body(
            StatusCode::BAD_REQUEST,
            r#"[{"message":"Required fields are missing: [LastName]","errorCode":"REQUIRED_FIELD_MISSING","fields":["LastName"]}]"#,
        );
        assert_eq!(errors[0].error_code, "REQUIRED_FIELD_MISSING");
        assert_eq!(errors[0].fields, vec!["LastName"]);

        let errors = parse_error_body(StatusCode::BAD_GATEWAY, "");
        assert_eq!(errors[0].error_code, "HTTP_502");
        assert_eq!(errors[0].message, "Bad Gateway");
    }

    #[test]
    fn test_save_result_decoding() {
        let result: SaveResult = serde_json::from_str(
            r#"{"success":false,"errors":[{"statusCode":"DUPLICATE_VALUE","message":"duplicate value found","fields":["Email"]}]}"#,
        )
        .unwrap();
        assert!(result.id.is_none());
        assert_eq!(result.error_message(), "DUPLICATE_VALUE: duplicate value found [Email]");
    }
}
