//! Checkpoint store trait definition.

use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::error::RepositoryError;
use flowpoint_types::ids::FlowId;

/// Durable, versioned storage for flow checkpoints.
///
/// The store is the only shared mutable resource of the engine. Every write is
/// optimistic: it succeeds only if the stored version still equals the version
/// the checkpoint was read at, so a worker that lost exclusivity fails its
/// write instead of overwriting.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Read the current checkpoint for a flow, with `version` set to the stored version.
    fn read(
        &self,
        flow_id: &FlowId,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Store `checkpoint` if the stored version equals `checkpoint.version`
    /// (0 meaning "no checkpoint yet"). Returns the new version, which is
    /// always `checkpoint.version + 1`.
    ///
    /// Returns `RepositoryError::Conflict` when the versions differ.
    fn write_if_version(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
