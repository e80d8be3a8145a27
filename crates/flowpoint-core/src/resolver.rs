//! Continuation resolution: decide what an inbound reply means for a
//! suspended flow.
//!
//! `resolve` returns `None` when the event does not correlate with what the
//! flow is waiting on (stale or duplicate replies, traffic on unknown
//! sessions). The caller must then discard the event without writing.
//! `Some(Continue)` means the checkpoint changed but the wait is not over.

use flowpoint_types::checkpoint::{Checkpoint, PendingRequest, PendingStatus, SessionStatus};
use flowpoint_types::config::FlowPolicy;
use flowpoint_types::continuation::{Continuation, FlowErrorKind, ResumeValue};
use flowpoint_types::event::{
    EntityOperation, EntityResult, InboundPayload, OutboundEvent, ReplyError, ReplyErrorKind,
    SessionBody, SessionDirection, SessionEvent, SignResult,
};
use flowpoint_types::ids::RequestId;
use flowpoint_types::payload::Payload;
use flowpoint_types::waiting::WaitingFor;

use crate::handler::session::try_receive;

pub fn resolve(
    checkpoint: &mut Checkpoint,
    payload: &InboundPayload,
    policy: &FlowPolicy,
) -> Option<Continuation> {
    match payload {
        InboundPayload::EntityResponse { request_id, result } => {
            if !awaits_entity(checkpoint, request_id) {
                return uncorrelated(checkpoint, payload);
            }
            match result {
                EntityResult::Ok { results } => {
                    let value = checkpoint
                        .pending
                        .take()
                        .map(|pending| decode_entity_results(&pending, results.clone()))
                        .unwrap_or(ResumeValue::Unit);
                    Some(Continuation::Run(value))
                }
                EntityResult::Error { error } => Some(classify_error(checkpoint, error, policy)),
            }
        }
        InboundPayload::SignResponse { request_id, result } => {
            if !awaits_signature(checkpoint, request_id) {
                return uncorrelated(checkpoint, payload);
            }
            match result {
                SignResult::Ok { signature, key_ref } => {
                    checkpoint.pending = None;
                    Some(Continuation::Run(ResumeValue::Signature {
                        signature: signature.clone(),
                        key_ref: key_ref.clone(),
                    }))
                }
                SignResult::Error { error } => Some(classify_error(checkpoint, error, policy)),
            }
        }
        InboundPayload::Session { event } => resolve_session(checkpoint, event),
        InboundPayload::WakeUp { scheduled_time } => match &checkpoint.waiting_for {
            WaitingFor::WakeUp { until } if scheduled_time >= until => {
                Some(Continuation::Run(ResumeValue::WokeUp { at: *scheduled_time }))
            }
            _ => uncorrelated(checkpoint, payload),
        },
        InboundPayload::StartFlow { .. } | InboundPayload::Kill { .. } => None,
    }
}

/// Map a worker error reply onto a continuation, updating retry state.
///
/// Retryable errors keep the flow waiting until `policy.max_retries` replies
/// have been retryable, then fail it. Any other kind resolves at once.
pub fn classify_error(
    checkpoint: &mut Checkpoint,
    error: &ReplyError,
    policy: &FlowPolicy,
) -> Continuation {
    match error.kind {
        ReplyErrorKind::User => {
            checkpoint.pending = None;
            Continuation::error(FlowErrorKind::User, error.message.clone())
        }
        ReplyErrorKind::Retryable => {
            let Some(pending) = checkpoint.pending.as_mut() else {
                return Continuation::error(FlowErrorKind::Platform, error.message.clone());
            };
            pending.retries += 1;
            pending.last_error = Some(error.message.clone());

            if pending.retries < policy.max_retries {
                pending.status = PendingStatus::Retrying;
                tracing::warn!(
                    flow_id = %checkpoint.flow_id,
                    request_id = %pending.request_id,
                    retries = pending.retries,
                    max_retries = policy.max_retries,
                    error = %error.message,
                    "retryable error, will resend on next wake-up"
                );
                return Continuation::Continue;
            }

            let message = format!(
                "request {} failed after {} attempts: {}",
                pending.request_id, pending.retries, error.message
            );
            checkpoint.pending = None;
            Continuation::error(FlowErrorKind::RetriesExhausted, message)
        }
        ReplyErrorKind::Platform | ReplyErrorKind::Unrecognized => {
            checkpoint.pending = None;
            Continuation::error(FlowErrorKind::Platform, error.message.clone())
        }
    }
}

fn awaits_entity(checkpoint: &Checkpoint, request_id: &RequestId) -> bool {
    matches!(&checkpoint.waiting_for, WaitingFor::EntityResponse { request_id: id } if id == request_id)
        && pending_matches(checkpoint, request_id)
}

fn awaits_signature(checkpoint: &Checkpoint, request_id: &RequestId) -> bool {
    matches!(&checkpoint.waiting_for, WaitingFor::SignedBytes { request_id: id } if id == request_id)
        && pending_matches(checkpoint, request_id)
}

fn pending_matches(checkpoint: &Checkpoint, request_id: &RequestId) -> bool {
    checkpoint
        .pending
        .as_ref()
        .is_some_and(|p| &p.request_id == request_id)
}

fn decode_entity_results(pending: &PendingRequest, results: Vec<Payload>) -> ResumeValue {
    let OutboundEvent::EntityRequest { request } = &pending.envelope else {
        return ResumeValue::Unit;
    };
    match request.operation {
        EntityOperation::FindEntity { .. } => ResumeValue::Entity {
            entity: results.into_iter().next(),
        },
        EntityOperation::FindAll { .. } | EntityOperation::Merge { .. } => {
            ResumeValue::Entities { entities: results }
        }
        EntityOperation::Persist { .. } | EntityOperation::Delete { .. } => ResumeValue::Unit,
    }
}

fn resolve_session(checkpoint: &mut Checkpoint, event: &SessionEvent) -> Option<Continuation> {
    if event.direction != SessionDirection::Inbound {
        return None;
    }
    let flow_id = checkpoint.flow_id.clone();
    let Some(session) = checkpoint.session_mut(&event.session_id) else {
        tracing::debug!(flow_id = %flow_id, session_id = %event.session_id, "event for unknown session");
        return None;
    };
    if event.source != session.counterparty || !session.status.is_open() {
        tracing::debug!(
            flow_id = %flow_id,
            session_id = %event.session_id,
            status = ?session.status,
            "ignoring session event"
        );
        return None;
    }

    match &event.body {
        SessionBody::Init { .. } => return None,
        SessionBody::Data { payload } => {
            if event.sequence == 0 || session.is_duplicate(event.sequence) {
                tracing::debug!(
                    flow_id = %flow_id,
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    "duplicate session data discarded"
                );
                return None;
            }
            session.received.insert(event.sequence, payload.clone());
            if session.status == SessionStatus::Created {
                session.status = SessionStatus::Confirmed;
            }
        }
        SessionBody::Close => session.status = SessionStatus::Closed,
        SessionBody::Error { message } => {
            session.status = SessionStatus::Errored;
            session.error = Some(message.clone());
        }
    }

    let waited = match &checkpoint.waiting_for {
        WaitingFor::SessionData { session_ids } if session_ids.contains(&event.session_id) => {
            session_ids.clone()
        }
        _ => return Some(Continuation::Continue),
    };
    Some(try_receive(checkpoint, &waited).unwrap_or(Continuation::Continue))
}

fn uncorrelated(checkpoint: &Checkpoint, payload: &InboundPayload) -> Option<Continuation> {
    tracing::debug!(
        flow_id = %checkpoint.flow_id,
        event = payload.name(),
        waiting_for = checkpoint.waiting_for.label(),
        "event does not match current wait, discarding"
    );
    None
}
