//! In-memory checkpoint store.
//!
//! Backed by a `DashMap`; the per-shard entry lock makes the version check and
//! the write a single atomic step. Cloning the store shares the same map,
//! which lets tests keep a handle while the runner owns another.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::error::RepositoryError;
use flowpoint_types::ids::FlowId;

use super::checkpoint::CheckpointStore;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<DashMap<FlowId, Checkpoint>>,
    /// Every version successfully written, per flow, in write order.
    #[cfg(test)]
    history: Arc<DashMap<FlowId, Vec<u64>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Versions written for a flow, oldest first.
    #[cfg(test)]
    pub fn versions_written(&self, flow_id: &FlowId) -> Vec<u64> {
        self.history
            .get(flow_id)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn read(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.checkpoints.get(flow_id).map(|c| c.value().clone()))
    }

    async fn write_if_version(&self, checkpoint: &Checkpoint) -> Result<u64, RepositoryError> {
        let expected = checkpoint.version;
        let new_version = match self.checkpoints.entry(checkpoint.flow_id.clone()) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().version;
                if actual != expected {
                    return Err(RepositoryError::Conflict {
                        flow_id: checkpoint.flow_id.clone(),
                        expected,
                        actual,
                    });
                }
                let mut stored = checkpoint.clone();
                stored.version = actual + 1;
                entry.insert(stored);
                actual + 1
            }
            Entry::Vacant(entry) => {
                if expected != 0 {
                    return Err(RepositoryError::Conflict {
                        flow_id: checkpoint.flow_id.clone(),
                        expected,
                        actual: 0,
                    });
                }
                let mut stored = checkpoint.clone();
                stored.version = 1;
                entry.insert(stored);
                1
            }
        };

        #[cfg(test)]
        self.history
            .entry(checkpoint.flow_id.clone())
            .or_default()
            .push(new_version);

        tracing::debug!(
            flow_id = %checkpoint.flow_id,
            version = new_version,
            "stored checkpoint in memory"
        );
        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowpoint_types::checkpoint::FlowStartContext;
    use flowpoint_types::context::ContextProperties;
    use flowpoint_types::ids::HoldingIdentity;

    fn sample_checkpoint(flow_id: &str) -> Checkpoint {
        Checkpoint::new(
            FlowId::from(flow_id),
            FlowStartContext {
                class_name: "com.example.Flow".to_string(),
                holding_identity: HoldingIdentity::new("O=Alice", "g"),
                args: serde_json::Value::Null,
                initiated_by: None,
                context_user: ContextProperties::new(),
                context_platform: ContextProperties::new(),
                started_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn first_write_creates_version_one() {
        let store = InMemoryCheckpointStore::new();
        let cp = sample_checkpoint("f-1");
        assert_eq!(store.write_if_version(&cp).await.unwrap(), 1);

        let loaded = store.read(&cp.flow_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn write_from_read_version_advances() {
        let store = InMemoryCheckpointStore::new();
        let cp = sample_checkpoint("f-1");
        store.write_if_version(&cp).await.unwrap();

        let loaded = store.read(&cp.flow_id).await.unwrap().unwrap();
        assert_eq!(store.write_if_version(&loaded).await.unwrap(), 2);
        assert_eq!(store.versions_written(&cp.flow_id), vec![1, 2]);
    }

    #[tokio::test]
    async fn stale_write_conflicts() {
        let store = InMemoryCheckpointStore::new();
        let cp = sample_checkpoint("f-1");
        store.write_if_version(&cp).await.unwrap();

        let first = store.read(&cp.flow_id).await.unwrap().unwrap();
        let second = first.clone();
        store.write_if_version(&first).await.unwrap();

        let err = store.write_if_version(&second).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Conflict { expected: 1, actual: 2, .. }
        ));
        assert_eq!(store.versions_written(&cp.flow_id), vec![1, 2]);
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let store = InMemoryCheckpointStore::new();
        let cp = sample_checkpoint("f-1");
        store.write_if_version(&cp).await.unwrap();
        let err = store.write_if_version(&cp).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn read_missing_returns_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.read(&FlowId::from("nope")).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
