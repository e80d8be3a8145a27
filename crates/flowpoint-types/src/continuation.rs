//! Continuations fed back into a resumed flow computation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::payload::Payload;

/// The decision produced for one inbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Continuation {
    /// Resume the computation with a value.
    Run(ResumeValue),
    /// Keep waiting on the same condition; no value yet.
    Continue,
    /// Resume with (or terminate on) an error.
    Error(FlowError),
}

impl Continuation {
    pub fn unit() -> Self {
        Continuation::Run(ResumeValue::Unit)
    }

    pub fn error(kind: FlowErrorKind, message: impl Into<String>) -> Self {
        Continuation::Error(FlowError::new(kind, message))
    }
}

/// Decoded value handed to the computation on `Run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeValue {
    Unit,
    /// Result of a `Find`: the entity, if it exists.
    Entity { entity: Option<Payload> },
    /// Result of `FindAll` or `Merge`.
    Entities { entities: Vec<Payload> },
    /// Result of `SignBytes`.
    Signature { signature: Payload, key_ref: String },
    /// One in-order payload per session a `Receive` waited on.
    SessionPayloads { payloads: BTreeMap<SessionId, Payload> },
    /// A `Sleep` elapsed; the scheduler's wake time.
    WokeUp { at: DateTime<Utc> },
}

/// Classification of a flow-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowErrorKind {
    /// The flow issued a request that failed validation.
    Malformed,
    /// Business-level rejection from an external worker.
    User,
    /// A session the flow waited on was closed or errored by the counterparty.
    SessionClosed,
    /// A retryable failure exceeded the configured retry budget.
    RetriesExhausted,
    /// Platform-level or unclassified failure.
    Platform,
    /// Unrecoverable failure inside the engine or the execution host.
    Fatal,
    /// Flow code raised an error it did not handle.
    Unhandled,
}

impl FlowErrorKind {
    /// Terminal errors end the flow without resuming user code.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowErrorKind::RetriesExhausted
                | FlowErrorKind::Platform
                | FlowErrorKind::Fatal
                | FlowErrorKind::Unhandled
        )
    }
}

/// An error surfaced to flow code or persisted on a terminal checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct FlowError {
    pub kind: FlowErrorKind,
    pub message: String,
}

impl FlowError {
    pub fn new(kind: FlowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_engine_level_errors_are_terminal() {
        assert!(!FlowErrorKind::Malformed.is_terminal());
        assert!(!FlowErrorKind::User.is_terminal());
        assert!(!FlowErrorKind::SessionClosed.is_terminal());
        assert!(FlowErrorKind::RetriesExhausted.is_terminal());
        assert!(FlowErrorKind::Platform.is_terminal());
        assert!(FlowErrorKind::Fatal.is_terminal());
        assert!(FlowErrorKind::Unhandled.is_terminal());
    }

    #[test]
    fn flow_error_display() {
        let err = FlowError::new(FlowErrorKind::User, "duplicate key");
        assert_eq!(err.to_string(), "User: duplicate key");
    }

    #[test]
    fn continuation_serde_shape() {
        let c = Continuation::Run(ResumeValue::Entity {
            entity: Some(Payload::from("x")),
        });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "run");
        assert_eq!(json["value"]["type"], "entity");
        let back: Continuation = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
