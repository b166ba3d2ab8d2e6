//! Transform, validate and push a batch of source records
//!
//! Invalid records never reach Salesforce; each one is written to the error
//! ledger as a validation error. Valid records go out in collection-sized
//! batches through the retry executor, and per-record rejections in the save
//! results are classified by their Salesforce error code and recorded too.

use common::OperationTimer;
use resilience::{ErrorKind, NewMigrationError, OperationContext, RetryExecutor};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{SaveResult, SalesforceClient, COLLECTION_BATCH_SIZE};
use crate::mapping::SObjectType;
use crate::transform::{SObjectRecord, SalesforceDataTransformer};
use crate::validate::{validate_batch, InvalidRecord, ValidRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    Create,
    Upsert { external_id_field: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub attempted: usize,
    pub created: usize,
    /// Existing records matched by an upsert
    pub updated: usize,
    pub failed: usize,
    pub invalid: usize,
    /// Ledger ids of every error recorded during the load
    pub error_ids: Vec<Uuid>,
}

impl LoadSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.invalid == 0
    }
}

type ProgressFn = Box<dyn Fn(usize) + Send + Sync>;

pub struct RecordLoader<'a> {
    client: &'a SalesforceClient,
    executor: &'a RetryExecutor,
    transformer: SalesforceDataTransformer,
    mode: LoadMode,
    batch_size: usize,
    progress: Option<ProgressFn>,
}

impl<'a> RecordLoader<'a> {
    pub fn new(client: &'a SalesforceClient, executor: &'a RetryExecutor) -> Self {
        Self {
            client,
            executor,
            transformer: SalesforceDataTransformer::new(),
            mode: LoadMode::Create,
            batch_size: COLLECTION_BATCH_SIZE,
            progress: None,
        }
    }

    pub fn with_transformer(mut self, transformer: SalesforceDataTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Clamped to the collection limit
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, COLLECTION_BATCH_SIZE);
        self
    }

    /// Called with the number of records handled after each step
    pub fn with_progress(mut self, progress: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn report_progress(&self, handled: usize) {
        if let Some(progress) = &self.progress {
            progress(handled);
        }
    }

    pub async fn load(
        &self,
        object: SObjectType,
        ctx: &OperationContext,
        sources: &[Value],
    ) -> LoadSummary {
        let mut timer = OperationTimer::new(format!("load_{}", object.api_name().to_lowercase()));
        timer.add_field("records", sources.len());

        let mut summary = LoadSummary {
            attempted: sources.len(),
            ..LoadSummary::default()
        };

        let transformed = self.transformer.transform_batch(object, sources);
        let report = validate_batch(object, transformed);

        summary.invalid = report.invalid.len();
        for invalid in &report.invalid {
            if let Some(id) = self.record_invalid(ctx, sources, invalid).await {
                summary.error_ids.push(id);
            }
        }
        self.report_progress(report.invalid.len());

        for chunk in report.valid.chunks(self.batch_size) {
            self.push_chunk(object, ctx, sources, chunk, &mut summary)
                .await;
            self.report_progress(chunk.len());
        }

        timer.add_field("created", summary.created);
        timer.add_field("updated", summary.updated);
        timer.add_field("failed", summary.failed);
        timer.add_field("invalid", summary.invalid);
        timer.finish();

        info!(
            "Loaded {}: {} created, {} updated, {} failed, {} invalid of {}",
            object,
            summary.created,
            summary.updated,
            summary.failed,
            summary.invalid,
            summary.attempted
        );
        summary
    }

    async fn push_chunk(
        &self,
        object: SObjectType,
        ctx: &OperationContext,
        sources: &[Value],
        chunk: &[ValidRecord],
        summary: &mut LoadSummary,
    ) {
        let records: Vec<SObjectRecord> = chunk.iter().map(|v| v.record.clone()).collect();
        let client = self.client;
        let batch = &records;
        let api_name = object.api_name();

        let (operation, outcome) = match &self.mode {
            LoadMode::Create => {
                let op = ctx.with_operation(format!("create_{}", api_name.to_lowercase()));
                let outcome = self
                    .executor
                    .execute(&op, move || client.create_records(api_name, batch))
                    .await;
                (op, outcome)
            }
            LoadMode::Upsert { external_id_field } => {
                let op = ctx.with_operation(format!("upsert_{}", api_name.to_lowercase()));
                let field = external_id_field.as_str();
                let outcome = self
                    .executor
                    .execute(&op, move || client.upsert_records(api_name, field, batch))
                    .await;
                (op, outcome)
            }
        };

        match outcome {
            Ok(results) => {
                for (valid, result) in chunk.iter().zip(results.iter()) {
                    if result.success {
                        if result.created == Some(false) {
                            summary.updated += 1;
                        } else {
                            summary.created += 1;
                        }
                        continue;
                    }
                    summary.failed += 1;
                    if let Some(id) = self
                        .record_rejection(&operation, sources, valid, result)
                        .await
                    {
                        summary.error_ids.push(id);
                    }
                }
            }
            Err(failure) => {
                warn!(
                    "Batch of {} {} records failed: {}",
                    chunk.len(),
                    object,
                    failure
                );
                summary.failed += chunk.len();
                summary.error_ids.extend(failure.error_id);
            }
        }
    }

    async fn record_invalid(
        &self,
        ctx: &OperationContext,
        sources: &[Value],
        invalid: &InvalidRecord,
    ) -> Option<Uuid> {
        let error = NewMigrationError {
            project_id: ctx.project_id.clone(),
            object_type_id: ctx.object_type_id.clone(),
            record_id: Some(source_record_id(sources, invalid.index)),
            error_type: ErrorKind::Validation.as_str().to_string(),
            error_message: invalid.message(),
            error_details: json!({
                "index": invalid.index,
                "issues": invalid.issues,
                "record": invalid.record,
            }),
        };
        self.persist(error).await
    }

    async fn record_rejection(
        &self,
        operation: &OperationContext,
        sources: &[Value],
        valid: &ValidRecord,
        result: &SaveResult,
    ) -> Option<Uuid> {
        let kind = result
            .errors
            .first()
            .map(|e| e.kind())
            .unwrap_or(ErrorKind::Unknown);

        let error = NewMigrationError {
            project_id: operation.project_id.clone(),
            object_type_id: operation.object_type_id.clone(),
            record_id: Some(source_record_id(sources, valid.index)),
            error_type: kind.as_str().to_string(),
            error_message: result.error_message(),
            error_details: json!({
                "index": valid.index,
                "operation": operation.operation,
                "errors": result.errors,
                "severity": kind.severity(),
            }),
        };
        self.persist(error).await
    }

    async fn persist(&self, error: NewMigrationError) -> Option<Uuid> {
        match self.executor.store().record_error(error).await {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                warn!("Failed to record migration error: {}", e);
                None
            }
        }
    }
}

/// Source `id`, or the batch position when the record has none
fn source_record_id(sources: &[Value], index: usize) -> String {
    let id = sources.get(index).and_then(|source| source.get("id"));
    match id {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("#{}", index),
    }
}

