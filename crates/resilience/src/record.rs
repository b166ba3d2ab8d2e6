use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::classify::{classify_message, ErrorKind};

/// A persisted terminal failure, resolved at most once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationError {
    pub id: Uuid,
    pub project_id: String,
    pub object_type_id: String,
    #[serde(default)]
    pub record_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub error_details: Value,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MigrationError {
    /// Stored type name, or the message when the name is not recognised
    pub fn kind(&self) -> ErrorKind {
        self.error_type
            .parse()
            .unwrap_or_else(|_| classify_message(&self.error_message))
    }
}

/// Insert shape for `MigrationError`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMigrationError {
    pub project_id: String,
    pub object_type_id: String,
    pub record_id: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub error_details: Value,
}

impl NewMigrationError {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> MigrationError {
        MigrationError {
            id,
            project_id: self.project_id,
            object_type_id: self.object_type_id,
            record_id: self.record_id,
            error_type: self.error_type,
            error_message: self.error_message,
            error_details: self.error_details,
            resolved: false,
            resolution_notes: None,
            created_at,
            resolved_at: None,
        }
    }
}

/// An operation that succeeded only after retrying
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryEvent {
    pub project_id: String,
    pub object_type_id: String,
    pub record_id: Option<String>,
    pub operation: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub recovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ErrorSummary {
    pub total: usize,
    pub unresolved: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
}

pub fn summarize(errors: &[MigrationError]) -> ErrorSummary {
    errors.iter().fold(ErrorSummary::default(), |mut summary, error| {
        summary.total += 1;
        if !error.resolved {
            summary.unresolved += 1;
        }
        *summary.by_kind.entry(error.kind()).or_insert(0) += 1;
        summary
    })
}
