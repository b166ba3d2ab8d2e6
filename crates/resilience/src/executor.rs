//! Retry executor for migration operations
//!
//! Runs an async operation, retrying transient failures with exponential
//! backoff and jitter. Failures that are not retryable, or that are still
//! failing after the last retry, are written to the error store and returned
//! to the caller with the original error attached.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::RetryConfig;
use crate::classify::{Classification, RetryableError};
use crate::record::{NewMigrationError, RecoveryEvent};
use crate::store::ErrorStore;

/// What is being attempted, for logging and the error ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    pub project_id: String,
    pub object_type_id: String,
    pub record_id: Option<String>,
    pub operation: String,
}

impl OperationContext {
    pub fn new(
        project_id: impl Into<String>,
        object_type_id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            object_type_id: object_type_id.into(),
            record_id: None,
            operation: operation.into(),
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_operation(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..self.clone()
        }
    }
}

/// Terminal failure of an executed operation
#[derive(Debug)]
pub struct OperationFailed<E> {
    pub operation: String,
    pub attempts: u32,
    pub classification: Classification,
    /// Ledger id, `None` if persisting the failure also failed
    pub error_id: Option<Uuid>,
    pub source: E,
}

impl<E> OperationFailed<E> {
    pub fn into_source(self) -> E {
        self.source
    }

    pub fn user_message(&self) -> &'static str {
        self.classification.kind.user_message()
    }
}

impl<E: fmt::Display> fmt::Display for OperationFailed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s) [{}]: {}",
            self.operation, self.attempts, self.classification.kind, self.source
        )
    }
}

impl<E> std::error::Error for OperationFailed<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
    store: Arc<dyn ErrorStore>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, store: Arc<dyn ErrorStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ErrorStore> {
        &self.store
    }

    /// Execute `operation` with retries
    pub async fn execute<F, Fut, T, E>(
        &self,
        ctx: &OperationContext,
        operation: F,
    ) -> Result<T, OperationFailed<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + fmt::Display,
    {
        let start_time = Instant::now();
        let max_attempts = self.config.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            debug!(
                "{}: attempt {}/{} (elapsed: {:?})",
                ctx.operation,
                attempt + 1,
                max_attempts,
                start_time.elapsed()
            );

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.log_recovery(ctx, attempt + 1, start_time.elapsed())
                            .await;
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    let classification = failure.classification();
                    let attempts = attempt + 1;

                    if !classification.retryable || attempt >= self.config.max_retries {
                        error!(
                            operation = %ctx.operation,
                            project_id = %ctx.project_id,
                            error_type = %classification.kind,
                            severity = %classification.severity,
                            attempts = attempts,
                            "Operation failed permanently: {}",
                            failure
                        );

                        let error_id = self
                            .persist_failure(ctx, &failure, classification, attempts, start_time.elapsed())
                            .await;

                        return Err(OperationFailed {
                            operation: ctx.operation.clone(),
                            attempts,
                            classification,
                            error_id,
                            source: failure,
                        });
                    }

                    let delay = self.config.delay_for(attempt);
                    warn!(
                        operation = %ctx.operation,
                        error_type = %classification.kind,
                        attempts = attempts,
                        "Operation failed, retrying in {:?}: {}",
                        delay,
                        failure
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn log_recovery(&self, ctx: &OperationContext, attempts: u32, elapsed: Duration) {
        info!(
            operation = %ctx.operation,
            project_id = %ctx.project_id,
            attempts = attempts,
            duration_ms = elapsed.as_millis() as u64,
            "Operation recovered after {} retries",
            attempts - 1
        );

        let event = RecoveryEvent {
            project_id: ctx.project_id.clone(),
            object_type_id: ctx.object_type_id.clone(),
            record_id: ctx.record_id.clone(),
            operation: ctx.operation.clone(),
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
            recovered_at: Utc::now(),
        };

        if let Err(e) = self.store.record_recovery(event).await {
            warn!("Failed to record recovery for {}: {}", ctx.operation, e);
        }
    }

    async fn persist_failure<E: RetryableError>(
        &self,
        ctx: &OperationContext,
        failure: &E,
        classification: Classification,
        attempts: u32,
        elapsed: Duration,
    ) -> Option<Uuid> {
        let record = NewMigrationError {
            project_id: ctx.project_id.clone(),
            object_type_id: ctx.object_type_id.clone(),
            record_id: ctx.record_id.clone(),
            error_type: classification.kind.as_str().to_string(),
            error_message: failure.error_message(),
            error_details: json!({
                "operation": ctx.operation,
                "attempts": attempts,
                "severity": classification.severity,
                "retryable": classification.retryable,
                "status_code": failure.status_code(),
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
        };

        match self.store.record_error(record).await {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                warn!(
                    "Failed to persist migration error for {}: {}",
                    ctx.operation, e
                );
                None
            }
        }
    }
}
