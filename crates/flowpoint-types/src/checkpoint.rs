//! Durable state of one flow.
//!
//! A checkpoint is the single source of truth for a flow between processing
//! cycles. Frames and sessions are held by value and cross-reference each
//! other only through session ids, so a checkpoint serializes without cycles.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextProperties;
use crate::continuation::FlowError;
use crate::event::OutboundEvent;
use crate::ids::{FlowId, HoldingIdentity, RequestId, SessionId};
use crate::payload::Payload;
use crate::waiting::WaitingFor;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: FlowId,
    /// Version this checkpoint was read at. 0 means it was never written.
    pub version: u64,
    pub start_context: FlowStartContext,
    #[serde(default)]
    pub stack: Vec<StackFrame>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionId, SessionState>,
    #[serde(default)]
    pub waiting_for: WaitingFor,
    /// Outstanding storage or signing request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingRequest>,
    /// Number of suspensions the computation has yielded so far.
    #[serde(default)]
    pub suspend_count: u64,
    /// Opaque state owned by the execution host.
    #[serde(default)]
    pub fiber: serde_json::Value,
    pub status: FlowStatus,
}

impl Checkpoint {
    /// A brand-new, never-persisted checkpoint with the root frame pushed.
    pub fn new(flow_id: FlowId, start_context: FlowStartContext) -> Self {
        let root = StackFrame {
            flow_name: start_context.class_name.clone(),
            initiated: start_context.initiated_by.is_some(),
            session_ids: BTreeSet::new(),
        };
        Self {
            flow_id,
            version: 0,
            start_context,
            stack: vec![root],
            sessions: BTreeMap::new(),
            waiting_for: WaitingFor::None,
            pending: None,
            suspend_count: 0,
            fiber: serde_json::Value::Null,
            status: FlowStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn holding_identity(&self) -> &HoldingIdentity {
        &self.start_context.holding_identity
    }

    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack.last()
    }

    pub fn top_frame_mut(&mut self) -> Option<&mut StackFrame> {
        self.stack.last_mut()
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn session_mut(&mut self, session_id: &SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(session_id)
    }

    /// Move the checkpoint to a terminal status and clear any wait.
    pub fn terminate(&mut self, status: FlowStatus) {
        self.status = status;
        self.waiting_for = WaitingFor::None;
        self.pending = None;
    }
}

/// How a flow came to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStartContext {
    pub class_name: String,
    pub holding_identity: HoldingIdentity,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Set for flows started by a counterparty's SessionInit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<InitiatedBy>,
    #[serde(default)]
    pub context_user: ContextProperties,
    #[serde(default)]
    pub context_platform: ContextProperties,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatedBy {
    pub counterparty: HoldingIdentity,
    pub session_id: SessionId,
    pub protocol: String,
}

/// Lifecycle status of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowStatus {
    Running,
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Failed { error: FlowError },
    Killed { reason: String },
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Running)
    }

    /// Short label used in logs and the store's `status` column.
    pub fn label(&self) -> &'static str {
        match self {
            FlowStatus::Running => "running",
            FlowStatus::Completed { .. } => "completed",
            FlowStatus::Failed { .. } => "failed",
            FlowStatus::Killed { .. } => "killed",
        }
    }
}

// ---------------------------------------------------------------------------
// Stack frames
// ---------------------------------------------------------------------------

/// One sub-flow call frame. Index 0 is the top-level flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub flow_name: String,
    pub initiated: bool,
    /// Sessions opened while this frame was on top.
    #[serde(default)]
    pub session_ids: BTreeSet<SessionId>,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Init sent, no message from the counterparty yet.
    Created,
    Confirmed,
    Closed,
    Errored,
}

impl SessionStatus {
    pub fn is_open(self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub counterparty: HoldingIdentity,
    /// True when this side sent the SessionInit.
    pub initiated_by_us: bool,
    pub status: SessionStatus,
    /// Sequence number the next outbound message will carry.
    pub next_send_seq: u64,
    /// Sequence number of the next inbound message user code will consume.
    pub next_receive_seq: u64,
    /// Inbound messages not yet consumed, keyed by sequence number.
    #[serde(default)]
    pub received: BTreeMap<u64, Payload>,
    #[serde(default)]
    pub session_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionState {
    pub fn new(session_id: SessionId, counterparty: HoldingIdentity, initiated_by_us: bool) -> Self {
        Self {
            session_id,
            counterparty,
            initiated_by_us,
            status: SessionStatus::Created,
            next_send_seq: 1,
            next_receive_seq: 1,
            received: BTreeMap::new(),
            session_properties: BTreeMap::new(),
            error: None,
        }
    }

    /// The next in-order payload is buffered.
    pub fn has_next(&self) -> bool {
        self.received.contains_key(&self.next_receive_seq)
    }

    /// Consume the next in-order payload, if it has arrived.
    pub fn take_next(&mut self) -> Option<Payload> {
        let payload = self.received.remove(&self.next_receive_seq)?;
        self.next_receive_seq += 1;
        Some(payload)
    }

    /// Whether `sequence` was already consumed or is already buffered.
    pub fn is_duplicate(&self, sequence: u64) -> bool {
        sequence < self.next_receive_seq || self.received.contains_key(&sequence)
    }
}

// ---------------------------------------------------------------------------
// Pending external request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Sent and awaiting a reply.
    Sent,
    /// Last reply was a retryable error; resend on the next wake-up.
    Retrying,
}

/// State of the outstanding storage or signing request.
///
/// Keeps the exact outbound envelope so it can be resent verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub envelope: OutboundEvent,
    pub status: PendingStatus,
    pub retries: u32,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingRequest {
    pub fn new(request_id: RequestId, envelope: OutboundEvent, sent_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            envelope,
            status: PendingStatus::Sent,
            retries: 0,
            sent_at,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::FlowErrorKind;

    fn start_context() -> FlowStartContext {
        FlowStartContext {
            class_name: "com.example.IssueFlow".to_string(),
            holding_identity: HoldingIdentity::new("O=Alice", "group-a"),
            args: serde_json::json!({"amount": 10}),
            initiated_by: None,
            context_user: ContextProperties::new(),
            context_platform: ContextProperties::new(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn new_checkpoint_has_root_frame_and_no_wait() {
        let cp = Checkpoint::new(FlowId::from("f-1"), start_context());
        assert_eq!(cp.version, 0);
        assert_eq!(cp.stack.len(), 1);
        assert_eq!(cp.stack[0].flow_name, "com.example.IssueFlow");
        assert!(!cp.stack[0].initiated);
        assert!(cp.waiting_for.is_none());
        assert!(!cp.is_terminal());
    }

    #[test]
    fn terminate_clears_wait_and_pending() {
        let mut cp = Checkpoint::new(FlowId::from("f-1"), start_context());
        cp.waiting_for = WaitingFor::WakeUp { until: Utc::now() };
        cp.terminate(FlowStatus::Failed {
            error: FlowError::new(FlowErrorKind::Fatal, "boom"),
        });
        assert!(cp.is_terminal());
        assert!(cp.waiting_for.is_none());
        assert_eq!(cp.status.label(), "failed");
    }

    #[test]
    fn session_consumes_in_sequence_order() {
        let mut s = SessionState::new(
            SessionId::from("s-1"),
            HoldingIdentity::new("O=Bob", "group-a"),
            true,
        );
        s.received.insert(2, Payload::from("two"));
        assert!(!s.has_next());
        assert!(s.take_next().is_none());

        s.received.insert(1, Payload::from("one"));
        assert_eq!(s.take_next().unwrap().as_bytes(), b"one");
        assert_eq!(s.take_next().unwrap().as_bytes(), b"two");
        assert_eq!(s.next_receive_seq, 3);
        assert!(s.is_duplicate(1));
        assert!(!s.is_duplicate(3));
    }

    #[test]
    fn checkpoint_json_round_trip_keeps_sessions() {
        let mut cp = Checkpoint::new(FlowId::from("f-1"), start_context());
        let sid = SessionId::from("s-1");
        let mut session = SessionState::new(sid.clone(), HoldingIdentity::new("O=Bob", "g"), true);
        session.received.insert(1, Payload::from("hello"));
        cp.sessions.insert(sid.clone(), session);
        cp.stack[0].session_ids.insert(sid.clone());

        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }
}
