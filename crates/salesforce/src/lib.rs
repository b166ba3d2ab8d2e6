//! Salesforce destination for CRM migrations
//!
//! Maps generic CRM records onto Contact, Account and Opportunity, validates
//! them, and loads them through the REST API (v58.0) or Bulk API 2.0.

pub mod auth;
pub mod bulk;
pub mod client;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod transform;
pub mod validate;

pub use auth::{refresh_access_token, AccessToken, OAuthCredentials};
pub use bulk::{records_to_csv, BulkIngest, BulkOperation, JobInfo, JobState};
pub use client::{
    ApiLimit, CompositeSubrequest, CompositeSubresponse, FieldDescribe, ObjectDescribe,
    SalesforceClient, SaveResult, COLLECTION_BATCH_SIZE,
};
pub use error::{classify_error_code, ApiErrorDetail, Result, SalesforceError};
pub use loader::{LoadMode, LoadSummary, RecordLoader};
pub use mapping::{FieldMapping, FieldTransform, SObjectType};
pub use transform::{SObjectRecord, SalesforceDataTransformer};
pub use validate::{
    validate_batch, validate_record, InvalidRecord, ValidRecord, ValidationIssue,
    ValidationReport,
};
