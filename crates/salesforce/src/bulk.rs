//! Bulk API 2.0 ingest jobs
//!
//! For loads too large for sobject collections: create a job, upload the
//! records as one CSV batch, close the job and poll it until Salesforce is done.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::client::SalesforceClient;
use crate::error::{Result, SalesforceError};
use crate::transform::SObjectRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    Insert,
    Update,
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Open,
    UploadComplete,
    InProgress,
    JobComplete,
    Failed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::JobComplete | JobState::Failed | JobState::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub state: JobState,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub operation: Option<BulkOperation>,
    #[serde(default)]
    pub number_records_processed: u64,
    #[serde(default)]
    pub number_records_failed: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

pub struct BulkIngest<'a> {
    client: &'a SalesforceClient,
}

impl SalesforceClient {
    pub fn bulk(&self) -> BulkIngest<'_> {
        BulkIngest::new(self)
    }
}

impl<'a> BulkIngest<'a> {
    pub fn new(client: &'a SalesforceClient) -> Self {
        Self { client }
    }

    pub async fn create_job(
        &self,
        object: &str,
        operation: BulkOperation,
        external_id_field: Option<&str>,
    ) -> Result<JobInfo> {
        if operation == BulkOperation::Upsert && external_id_field.is_none() {
            return Err(SalesforceError::InvalidRequest(
                "upsert jobs need an external id field".to_string(),
            ));
        }

        let mut body = json!({
            "object": object,
            "operation": operation,
            "contentType": "CSV",
            "lineEnding": "LF",
        });
        if let Some(field) = external_id_field {
            body["externalIdFieldName"] = Value::String(field.to_string());
        }

        let job: JobInfo = self
            .client
            .request(Method::POST, "jobs/ingest", Some(&body))
            .await?;
        info!("Created bulk {:?} job {} for {}", operation, job.id, object);
        Ok(job)
    }

    pub async fn upload_csv(&self, job_id: &str, records: &[SObjectRecord]) -> Result<()> {
        let csv = records_to_csv(records)?;
        debug!("Uploading {} records ({} bytes) to job {}", records.len(), csv.len(), job_id);
        self.client
            .send_text(
                Method::PUT,
                &format!("jobs/ingest/{}/batches", job_id),
                "text/csv",
                &csv,
            )
            .await
    }

    /// Mark the upload complete so Salesforce starts processing
    pub async fn close_job(&self, job_id: &str) -> Result<JobInfo> {
        self.set_state(job_id, "UploadComplete").await
    }

    pub async fn abort_job(&self, job_id: &str) -> Result<JobInfo> {
        self.set_state(job_id, "Aborted").await
    }

    async fn set_state(&self, job_id: &str, state: &str) -> Result<JobInfo> {
        self.client
            .request(
                Method::PATCH,
                &format!("jobs/ingest/{}", job_id),
                Some(&json!({ "state": state })),
            )
            .await
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobInfo> {
        self.client
            .request(Method::GET, &format!("jobs/ingest/{}", job_id), None)
            .await
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<JobInfo> {
        let started = Instant::now();
        loop {
            let job = self.job_status(job_id).await?;
            if job.state.is_terminal() {
                info!(
                    "Bulk job {} finished as {:?}: {} processed, {} failed",
                    job.id, job.state, job.number_records_processed, job.number_records_failed
                );
                return Ok(job);
            }
            if started.elapsed() >= timeout {
                return Err(SalesforceError::InvalidResponse(format!(
                    "bulk job {} still {:?} after {:?}",
                    job_id, job.state, timeout
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Header is the union of record keys in first-seen order
pub fn records_to_csv(records: &[SObjectRecord]) -> Result<String> {
    let mut seen = HashSet::new();
    let header: Vec<&str> = records
        .iter()
        .flat_map(|record| record.keys())
        .filter(|key| key.as_str() != "attributes" && seen.insert(key.as_str()))
        .map(String::as_str)
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&header)?;
    for record in records {
        let row: Vec<String> = header
            .iter()
            .map(|field| record.get(*field).map(csv_cell).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| SalesforceError::InvalidRequest(format!("CSV buffer error: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| SalesforceError::InvalidRequest(format!("CSV is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> SObjectRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test records must be objects"),
        }
    }

    #[test]
    fn test_csv_header_is_key_union() {
        let csv = records_to_csv(&[
            record(json!({"Email": "doe@example.com", "LastName": "Doe"})),
            record(json!({"HasOptedOutOfEmail": true, "LastName": "Roe, Jr.", "Phone": "(555) 010-0000"})),
        ])
        .unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Email,LastName,HasOptedOutOfEmail,Phone");
        assert_eq!(lines[1], "doe@example.com,Doe,,");
        assert_eq!(lines[2], ",\"Roe, Jr.\",true,(555) 010-0000");
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::JobComplete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(!JobState::UploadComplete.is_terminal());
    }

    #[test]
    fn test_job_info_decoding() {
        let job: JobInfo = serde_json::from_value(json!({
            "id": "750xx0000000001",
            "state": "JobComplete",
            "object": "Contact",
            "operation": "insert",
            "numberRecordsProcessed": 10,
            "numberRecordsFailed": 2
        }))
        .unwrap();
        assert_eq!(job.operation, Some(BulkOperation::Insert));
        assert_eq!(job.number_records_failed, 2);
    }
}
