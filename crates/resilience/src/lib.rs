//! Error classification and bounded retry for migration operations
//!
//! ```rust,ignore
//! use resilience::{OperationContext, RetryConfig, RetryExecutor, InMemoryErrorStore};
//!
//! let executor = RetryExecutor::new(RetryConfig::default(), Arc::new(InMemoryErrorStore::new()));
//! let ctx = OperationContext::new(project_id, "contacts", "create_records");
//! let results = executor.execute(&ctx, || client.create_records("Contact", &batch)).await?;
//! ```

pub mod backoff;
pub mod classify;
pub mod executor;
pub mod record;
pub mod store;

pub use backoff::RetryConfig;
pub use classify::{
    classify_message, classify_status, Classification, ErrorKind, RetryError, RetryableError,
    Severity,
};
pub use executor::{OperationContext, OperationFailed, RetryExecutor};
pub use record::{summarize, ErrorSummary, MigrationError, NewMigrationError, RecoveryEvent};
pub use store::{ErrorStore, InMemoryErrorStore, RestErrorStore, StoreError};
