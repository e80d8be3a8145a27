//! Request handlers: one per suspend reason.
//!
//! Each handler turns a validated `IoRequest` into a [`HandlerOutcome`]: the
//! condition the flow now waits on (if any) and the outbound events to
//! publish. Handlers mutate only the checkpoint they are given.

pub mod finish;
pub mod persistence;
pub mod session;
pub mod signing;
pub mod sleep;
pub mod sub_flow;
pub mod validate;

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::continuation::Continuation;
use flowpoint_types::event::{EntityOperation, OutboundEvent};
use flowpoint_types::request::IoRequest;
use flowpoint_types::waiting::WaitingFor;

/// What the runner does after a handler ran.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Persist and stop until an inbound event satisfies `waiting_for`.
    Suspend {
        waiting_for: WaitingFor,
        outbound: Vec<OutboundEvent>,
    },
    /// Non-blocking request: resume the computation in the same cycle.
    Resume {
        continuation: Continuation,
        outbound: Vec<OutboundEvent>,
    },
    /// The top-level flow finished.
    Terminate {
        result: Option<String>,
        outbound: Vec<OutboundEvent>,
    },
}

impl HandlerOutcome {
    pub fn outbound(&self) -> &[OutboundEvent] {
        match self {
            HandlerOutcome::Suspend { outbound, .. }
            | HandlerOutcome::Resume { outbound, .. }
            | HandlerOutcome::Terminate { outbound, .. } => outbound,
        }
    }
}

/// Route a request to its handler. `request` must already have passed
/// [`validate::validate`].
pub fn dispatch(checkpoint: &mut Checkpoint, request: IoRequest, now: DateTime<Utc>) -> HandlerOutcome {
    match request {
        IoRequest::InitiateFlow {
            session_id,
            counterparty,
            protocol,
        } => session::initiate(checkpoint, session_id, counterparty, protocol, now),
        IoRequest::Send { payloads } => session::send(checkpoint, payloads, now),
        IoRequest::Receive { session_ids } => session::receive(checkpoint, session_ids),
        IoRequest::CloseSessions { session_ids } => session::close(checkpoint, &session_ids, now),
        IoRequest::Persist { request_id, entities } => {
            persistence::handle(checkpoint, request_id, EntityOperation::Persist { entities }, now)
        }
        IoRequest::Merge { request_id, entities } => {
            persistence::handle(checkpoint, request_id, EntityOperation::Merge { entities }, now)
        }
        IoRequest::Find {
            request_id,
            entity_class,
            primary_key,
        } => persistence::handle(
            checkpoint,
            request_id,
            EntityOperation::FindEntity {
                entity_class,
                primary_key,
            },
            now,
        ),
        IoRequest::FindAll {
            request_id,
            entity_class,
        } => persistence::handle(checkpoint, request_id, EntityOperation::FindAll { entity_class }, now),
        IoRequest::Delete { request_id, entities } => {
            persistence::handle(checkpoint, request_id, EntityOperation::Delete { entities }, now)
        }
        IoRequest::SignBytes {
            request_id,
            bytes,
            key_ref,
        } => signing::handle(checkpoint, request_id, bytes, key_ref, now),
        IoRequest::Sleep { until } => sleep::handle(checkpoint, until),
        IoRequest::SubFlowStart { flow_name } => sub_flow::start(checkpoint, flow_name),
        IoRequest::SubFlowFinish => sub_flow::finish(checkpoint, now),
        IoRequest::SubFlowFailed { error } => sub_flow::failed(checkpoint, &error, now),
        IoRequest::Finish { result } => finish::handle(checkpoint, result, now),
    }
}
