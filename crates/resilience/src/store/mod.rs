//! Migration-error ledger
//!
//! Terminal failures are written here for manual follow-up, and recoveries are
//! logged so operators can see which operations needed retries.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{MigrationError, NewMigrationError, RecoveryEvent};

pub mod memory;
pub mod rest;

pub use memory::InMemoryErrorStore;
pub use rest::RestErrorStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Migration error {0} not found")]
    NotFound(Uuid),

    #[error("Migration error {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Error store is not configured: {0}")]
    NotConfigured(String),

    #[error("Error store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Error store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Error store returned an empty response")]
    EmptyResponse,

    #[error("Failed to encode migration error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// Persist a terminal failure and return the stored row
    async fn record_error(&self, error: NewMigrationError) -> Result<MigrationError, StoreError>;

    async fn record_recovery(&self, event: RecoveryEvent) -> Result<(), StoreError>;

    /// Mark an error resolved; fails if it already is
    async fn resolve_error(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<MigrationError, StoreError>;

    /// Unresolved errors for a project, newest first
    async fn unresolved_errors(&self, project_id: &str) -> Result<Vec<MigrationError>, StoreError>;

    /// All errors for a project, newest first
    async fn errors_for_project(&self, project_id: &str)
        -> Result<Vec<MigrationError>, StoreError>;
}
