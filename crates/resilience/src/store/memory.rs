use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ErrorStore, StoreError};
use crate::record::{MigrationError, NewMigrationError, RecoveryEvent};

/// Process-local ledger for dry runs and tests
#[derive(Debug, Default)]
pub struct InMemoryErrorStore {
    errors: RwLock<Vec<MigrationError>>,
    recoveries: RwLock<Vec<RecoveryEvent>>,
}

impl InMemoryErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<MigrationError> {
        self.errors.read().clone()
    }

    pub fn recoveries(&self) -> Vec<RecoveryEvent> {
        self.recoveries.read().clone()
    }

    fn newest_first(&self, project_id: &str, only_unresolved: bool) -> Vec<MigrationError> {
        let mut matching: Vec<MigrationError> = self
            .errors
            .read()
            .iter()
            .filter(|e| e.project_id == project_id && !(only_unresolved && e.resolved))
            .cloned()
            .collect();
        // insertion order breaks created_at ties
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }
}

#[async_trait]
impl ErrorStore for InMemoryErrorStore {
    async fn record_error(&self, error: NewMigrationError) -> Result<MigrationError, StoreError> {
        let record = error.into_record(Uuid::new_v4(), Utc::now());
        self.errors.write().push(record.clone());
        Ok(record)
    }

    async fn record_recovery(&self, event: RecoveryEvent) -> Result<(), StoreError> {
        self.recoveries.write().push(event);
        Ok(())
    }

    async fn resolve_error(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<MigrationError, StoreError> {
        let mut errors = self.errors.write();
        let record = errors
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if record.resolved {
            return Err(StoreError::AlreadyResolved(id));
        }

        record.resolved = true;
        record.resolution_notes = notes;
        record.resolved_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn unresolved_errors(&self, project_id: &str) -> Result<Vec<MigrationError>, StoreError> {
        Ok(self.newest_first(project_id, true))
    }

    async fn errors_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<MigrationError>, StoreError> {
        Ok(self.newest_first(project_id, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_error(project_id: &str, message: &str) -> NewMigrationError {
        NewMigrationError {
            project_id: project_id.into(),
            object_type_id: "contacts".into(),
            record_id: Some("rec-1".into()),
            error_type: "validation".into(),
            error_message: message.into(),
            error_details: json!({"attempts": 1}),
        }
    }

    #[tokio::test]
    async fn test_record_and_resolve_once() {
        let store = InMemoryErrorStore::new();
        let stored = store
            .record_error(new_error("p1", "bad email"))
            .await
            .expect("record should be stored");
        assert!(!stored.resolved);

        let resolved = store
            .resolve_error(stored.id, Some("fixed source data".into()))
            .await
            .expect("first resolve succeeds");
        assert!(resolved.resolved);
        assert_eq!(resolved.resolution_notes.as_deref(), Some("fixed source data"));
        assert!(resolved.resolved_at.is_some());

        let again = store.resolve_error(stored.id, None).await;
        assert!(matches!(again, Err(StoreError::AlreadyResolved(id)) if id == stored.id));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let store = InMemoryErrorStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.resolve_error(id, None).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_unresolved_filtering_by_project() {
        let store = InMemoryErrorStore::new();
        let first = store.record_error(new_error("p1", "one")).await.unwrap();
        store.record_error(new_error("p1", "two")).await.unwrap();
        store.record_error(new_error("p2", "other")).await.unwrap();
        store.resolve_error(first.id, None).await.unwrap();

        let unresolved = store.unresolved_errors("p1").await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].error_message, "two");

        let all = store.errors_for_project("p1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].error_message, "two");
    }
}
