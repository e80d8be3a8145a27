use thiserror::Error;

use crate::ids::{FlowId, SessionId};

/// Errors from checkpoint store operations (used by trait definitions in flowpoint-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    /// Optimistic version check failed: someone else wrote the checkpoint.
    #[error("version conflict for flow {flow_id}: expected {expected}, found {actual}")]
    Conflict {
        flow_id: FlowId,
        expected: u64,
        actual: u64,
    },
}

/// A flow-issued request that fails its preconditions.
///
/// Rejected before handler dispatch and surfaced to flow code; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("{operation}: no entities supplied")]
    NoEntities { operation: &'static str },

    #[error("{operation}: entity class is empty")]
    EmptyEntityClass { operation: &'static str },

    #[error("find: primary key is empty")]
    EmptyPrimaryKey,

    #[error("request id is empty")]
    EmptyRequestId,

    #[error("sign_bytes: {0}")]
    InvalidSignRequest(String),

    #[error("{operation}: no sessions supplied")]
    NoSessions { operation: &'static str },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {0} is not open")]
    SessionNotOpen(SessionId),

    #[error("session {0} already exists")]
    DuplicateSession(SessionId),

    #[error("initiate_flow: protocol is empty")]
    EmptyProtocol,

    #[error("sub_flow_start: flow name is empty")]
    EmptyFlowName,

    #[error("cannot leave the top-level flow frame")]
    StackUnderflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");

        let err = RepositoryError::Conflict {
            flow_id: FlowId::from("f-1"),
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "version conflict for flow f-1: expected 3, found 4"
        );
    }

    #[test]
    fn test_malformed_request_display() {
        assert_eq!(
            MalformedRequest::NoEntities { operation: "persist" }.to_string(),
            "persist: no entities supplied"
        );
        assert_eq!(
            MalformedRequest::UnknownSession(SessionId::from("s-9")).to_string(),
            "unknown session s-9"
        );
    }
}
