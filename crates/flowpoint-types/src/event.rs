//! Inbound and outbound event envelopes.
//!
//! Inbound events are addressed by flow id so every event for one flow is
//! processed in order by a single worker. Outbound events are produced by the
//! request handlers and published to the topic named by
//! [`OutboundEvent::topic`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextProperties;
use crate::ids::{FlowId, HoldingIdentity, RequestId, SessionId};
use crate::payload::Payload;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Storage worker request topic.
pub const ENTITY_REQUEST_TOPIC: &str = "flow.entity.request";

/// Signing worker request topic.
pub const SIGN_REQUEST_TOPIC: &str = "flow.crypto.request";

/// Counterparty mailbox topic, partitioned by destination identity.
pub const SESSION_OUT_TOPIC: &str = "flow.session.out";

/// External scheduler topic for delayed wake-ups.
pub const SCHEDULER_TOPIC: &str = "flow.scheduler";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// An event delivered to the flow runner for one flow id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub flow_id: FlowId,
    pub payload: InboundPayload,
}

impl InboundEvent {
    pub fn new(flow_id: FlowId, payload: InboundPayload) -> Self {
        Self { flow_id, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPayload {
    /// Start a brand-new flow.
    StartFlow {
        class_name: String,
        #[serde(default)]
        args: serde_json::Value,
        holding_identity: HoldingIdentity,
    },
    /// A message from a counterparty on a session.
    Session { event: SessionEvent },
    /// Reply from the storage worker.
    EntityResponse {
        request_id: RequestId,
        result: EntityResult,
    },
    /// Reply from the signing worker.
    SignResponse {
        request_id: RequestId,
        result: SignResult,
    },
    /// Emitted by the external scheduler.
    WakeUp { scheduled_time: DateTime<Utc> },
    /// Operator kill.
    Kill { reason: String },
}

impl InboundPayload {
    pub fn name(&self) -> &'static str {
        match self {
            InboundPayload::StartFlow { .. } => "start_flow",
            InboundPayload::Session { .. } => "session",
            InboundPayload::EntityResponse { .. } => "entity_response",
            InboundPayload::SignResponse { .. } => "sign_response",
            InboundPayload::WakeUp { .. } => "wake_up",
            InboundPayload::Kill { .. } => "kill",
        }
    }
}

// ---------------------------------------------------------------------------
// Replies from external workers
// ---------------------------------------------------------------------------

/// Error classification attached to a worker reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyErrorKind {
    /// Business-level rejection, raised to user code.
    User,
    /// Transient infrastructure failure.
    Retryable,
    /// Platform-level failure.
    Platform,
    /// Any error code this engine does not know.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub kind: ReplyErrorKind,
    pub message: String,
}

impl ReplyError {
    pub fn new(kind: ReplyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityResult {
    Ok { results: Vec<Payload> },
    Error { error: ReplyError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignResult {
    Ok { signature: Payload, key_ref: String },
    Error { error: ReplyError },
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDirection {
    Inbound,
    Outbound,
}

/// One message on a session, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub direction: SessionDirection,
    pub source: HoldingIdentity,
    pub destination: HoldingIdentity,
    /// Per-session, per-direction sequence number starting at 1. Init carries 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub body: SessionBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionBody {
    Init {
        protocol: String,
        #[serde(default)]
        context_user: ContextProperties,
        #[serde(default)]
        context_platform: ContextProperties,
    },
    Data { payload: Payload },
    Close,
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Storage operation carried by an [`EntityRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityOperation {
    Persist { entities: Vec<Payload> },
    Merge { entities: Vec<Payload> },
    FindEntity { entity_class: String, primary_key: Payload },
    FindAll { entity_class: String },
    Delete { entities: Vec<Payload> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRequest {
    pub request_id: RequestId,
    pub flow_id: FlowId,
    pub holding_identity: HoldingIdentity,
    pub timestamp: DateTime<Utc>,
    pub operation: EntityOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub request_id: RequestId,
    pub flow_id: FlowId,
    pub holding_identity: HoldingIdentity,
    pub timestamp: DateTime<Utc>,
    pub bytes: Payload,
    pub key_ref: String,
}

/// An event produced by a request handler for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    EntityRequest { request: EntityRequest },
    SignRequest { request: SignRequest },
    Session { event: SessionEvent },
    ScheduleWakeUp { flow_id: FlowId, at: DateTime<Utc> },
}

impl OutboundEvent {
    /// Topic the event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundEvent::EntityRequest { .. } => ENTITY_REQUEST_TOPIC,
            OutboundEvent::SignRequest { .. } => SIGN_REQUEST_TOPIC,
            OutboundEvent::Session { .. } => SESSION_OUT_TOPIC,
            OutboundEvent::ScheduleWakeUp { .. } => SCHEDULER_TOPIC,
        }
    }

    /// Partition key: the destination identity for session traffic, the flow
    /// id for everything else.
    pub fn partition_key(&self) -> String {
        match self {
            OutboundEvent::EntityRequest { request } => request.flow_id.to_string(),
            OutboundEvent::SignRequest { request } => request.flow_id.to_string(),
            OutboundEvent::Session { event } => event.destination.to_string(),
            OutboundEvent::ScheduleWakeUp { flow_id, .. } => flow_id.to_string(),
        }
    }

    /// Correlation id when the event is an external request.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            OutboundEvent::EntityRequest { request } => Some(&request.request_id),
            OutboundEvent::SignRequest { request } => Some(&request.request_id),
            _ => None,
        }
    }
}
