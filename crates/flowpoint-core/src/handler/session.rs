//! Session requests: initiate, send, receive and close.
//!
//! Sends and closes are non-blocking; the flow resumes in the same cycle.
//! A receive suspends only when some waited session has nothing in order yet.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::{Checkpoint, SessionState, SessionStatus};
use flowpoint_types::continuation::{Continuation, FlowErrorKind, ResumeValue};
use flowpoint_types::event::{OutboundEvent, SessionBody, SessionDirection, SessionEvent};
use flowpoint_types::ids::{HoldingIdentity, SessionId};
use flowpoint_types::payload::Payload;
use flowpoint_types::waiting::WaitingFor;

use super::HandlerOutcome;

/// Open a session and send its SessionInit carrying the flow's context.
pub fn initiate(
    checkpoint: &mut Checkpoint,
    session_id: SessionId,
    counterparty: HoldingIdentity,
    protocol: String,
    now: DateTime<Utc>,
) -> HandlerOutcome {
    let session = SessionState::new(session_id.clone(), counterparty, true);
    let init = SessionBody::Init {
        protocol,
        context_user: checkpoint.start_context.context_user.clone(),
        context_platform: checkpoint.start_context.context_platform.clone(),
    };
    let event = session_event(checkpoint.holding_identity(), &session, 0, init, now);

    tracing::debug!(
        flow_id = %checkpoint.flow_id,
        session_id = %session_id,
        counterparty = %session.counterparty,
        "initiating session"
    );

    checkpoint.sessions.insert(session_id.clone(), session);
    if let Some(frame) = checkpoint.top_frame_mut() {
        frame.session_ids.insert(session_id);
    }

    HandlerOutcome::Resume {
        continuation: Continuation::unit(),
        outbound: vec![event],
    }
}

pub fn send(
    checkpoint: &mut Checkpoint,
    payloads: BTreeMap<SessionId, Payload>,
    now: DateTime<Utc>,
) -> HandlerOutcome {
    let source = checkpoint.holding_identity().clone();
    let mut outbound = Vec::with_capacity(payloads.len());

    for (session_id, payload) in payloads {
        let Some(session) = checkpoint.session_mut(&session_id) else {
            continue;
        };
        let sequence = session.next_send_seq;
        session.next_send_seq += 1;
        outbound.push(session_event(&source, session, sequence, SessionBody::Data { payload }, now));
    }

    HandlerOutcome::Resume {
        continuation: Continuation::unit(),
        outbound,
    }
}

pub fn receive(checkpoint: &mut Checkpoint, session_ids: BTreeSet<SessionId>) -> HandlerOutcome {
    match try_receive(checkpoint, &session_ids) {
        Some(continuation) => HandlerOutcome::Resume {
            continuation,
            outbound: Vec::new(),
        },
        None => HandlerOutcome::Suspend {
            waiting_for: WaitingFor::SessionData { session_ids },
            outbound: Vec::new(),
        },
    }
}

pub fn close(
    checkpoint: &mut Checkpoint,
    session_ids: &BTreeSet<SessionId>,
    now: DateTime<Utc>,
) -> HandlerOutcome {
    let outbound = close_sessions(checkpoint, session_ids.iter().cloned(), now);
    HandlerOutcome::Resume {
        continuation: Continuation::unit(),
        outbound,
    }
}

/// Complete a receive over `session_ids` from buffered data.
///
/// Returns `None` while any waited session is still open with nothing in
/// order. A waited session that is closed or errored with nothing left to
/// read fails the whole receive. On success, one payload is consumed from
/// every session.
pub fn try_receive(
    checkpoint: &mut Checkpoint,
    session_ids: &BTreeSet<SessionId>,
) -> Option<Continuation> {
    for id in session_ids {
        let Some(session) = checkpoint.session(id) else {
            return Some(Continuation::error(
                FlowErrorKind::SessionClosed,
                format!("session {id} does not exist"),
            ));
        };
        if !session.has_next() && !session.status.is_open() {
            return Some(Continuation::error(FlowErrorKind::SessionClosed, ended_message(session)));
        }
    }

    let all_ready = session_ids
        .iter()
        .all(|id| checkpoint.session(id).is_some_and(SessionState::has_next));
    if !all_ready {
        return None;
    }

    let payloads = session_ids
        .iter()
        .filter_map(|id| {
            let payload = checkpoint.session_mut(id)?.take_next()?;
            Some((id.clone(), payload))
        })
        .collect();
    Some(Continuation::Run(ResumeValue::SessionPayloads { payloads }))
}

/// Close every listed session that is still open, emitting a Close for each.
pub fn close_sessions(
    checkpoint: &mut Checkpoint,
    session_ids: impl IntoIterator<Item = SessionId>,
    now: DateTime<Utc>,
) -> Vec<OutboundEvent> {
    end_sessions(checkpoint, session_ids, SessionStatus::Closed, || SessionBody::Close, now)
}

/// Error every listed session that is still open, emitting an Error for each.
pub fn error_sessions(
    checkpoint: &mut Checkpoint,
    session_ids: impl IntoIterator<Item = SessionId>,
    message: &str,
    now: DateTime<Utc>,
) -> Vec<OutboundEvent> {
    end_sessions(
        checkpoint,
        session_ids,
        SessionStatus::Errored,
        || SessionBody::Error {
            message: message.to_string(),
        },
        now,
    )
}

fn end_sessions(
    checkpoint: &mut Checkpoint,
    session_ids: impl IntoIterator<Item = SessionId>,
    status: SessionStatus,
    body: impl Fn() -> SessionBody,
    now: DateTime<Utc>,
) -> Vec<OutboundEvent> {
    let source = checkpoint.holding_identity().clone();
    let mut outbound = Vec::new();

    for id in session_ids {
        let Some(session) = checkpoint.session_mut(&id) else {
            continue;
        };
        if !session.status.is_open() {
            continue;
        }
        let sequence = session.next_send_seq;
        session.next_send_seq += 1;
        session.status = status;
        outbound.push(session_event(&source, session, sequence, body(), now));
    }
    outbound
}

/// Build an outbound session message from `source` to the session's counterparty.
pub fn session_event(
    source: &HoldingIdentity,
    session: &SessionState,
    sequence: u64,
    body: SessionBody,
    now: DateTime<Utc>,
) -> OutboundEvent {
    OutboundEvent::Session {
        event: SessionEvent {
            session_id: session.session_id.clone(),
            direction: SessionDirection::Outbound,
            source: source.clone(),
            destination: session.counterparty.clone(),
            sequence,
            timestamp: now,
            body,
        },
    }
}

fn ended_message(session: &SessionState) -> String {
    match (&session.status, &session.error) {
        (SessionStatus::Errored, Some(err)) => {
            format!("session {} errored: {err}", session.session_id)
        }
        _ => format!(
            "session {} was closed by {}",
            session.session_id, session.counterparty
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{bob, checkpoint, checkpoint_with_session};
    use flowpoint_types::event::SESSION_OUT_TOPIC;

    fn ids(list: &[&str]) -> BTreeSet<SessionId> {
        list.iter().map(|s| SessionId::from(*s)).collect()
    }

    #[test]
    fn initiate_records_session_and_sends_init() {
        let mut cp = checkpoint();
        cp.start_context.context_platform.insert("corda.account", "acct-1");

        let outcome = initiate(
            &mut cp,
            SessionId::from("s-1"),
            bob(),
            "ping".to_string(),
            Utc::now(),
        );

        let HandlerOutcome::Resume { continuation, outbound } = outcome else {
            panic!("expected resume");
        };
        assert_eq!(continuation, Continuation::unit());
        let OutboundEvent::Session { event } = &outbound[0] else {
            panic!("expected session event");
        };
        assert_eq!(event.sequence, 0);
        assert_eq!(event.destination, bob());
        assert!(matches!(
            &event.body,
            SessionBody::Init { protocol, context_platform, .. }
                if protocol == "ping" && context_platform.get("corda.account") == Some("acct-1")
        ));
        assert_eq!(outbound[0].topic(), SESSION_OUT_TOPIC);
        assert_eq!(outbound[0].partition_key(), bob().to_string());

        let session = cp.session(&SessionId::from("s-1")).unwrap();
        assert_eq!(session.status, SessionStatus::Created);
        assert!(cp.top_frame().unwrap().session_ids.contains(&SessionId::from("s-1")));
    }

    #[test]
    fn send_assigns_increasing_sequences() {
        let mut cp = checkpoint_with_session("s-1");
        let payloads: BTreeMap<_, _> = [(SessionId::from("s-1"), Payload::from("a"))].into();
        let first = send(&mut cp, payloads.clone(), Utc::now());
        let second = send(&mut cp, payloads, Utc::now());

        let seq = |o: &HandlerOutcome| match &o.outbound()[0] {
            OutboundEvent::Session { event } => event.sequence,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(seq(&first), 1);
        assert_eq!(seq(&second), 2);
    }

    #[test]
    fn receive_suspends_until_data_arrives() {
        let mut cp = checkpoint_with_session("s-1");
        let outcome = receive(&mut cp, ids(&["s-1"]));
        assert!(matches!(
            outcome,
            HandlerOutcome::Suspend { waiting_for: WaitingFor::SessionData { .. }, .. }
        ));
    }

    #[test]
    fn receive_completes_from_buffer() {
        let mut cp = checkpoint_with_session("s-1");
        cp.session_mut(&SessionId::from("s-1"))
            .unwrap()
            .received
            .insert(1, Payload::from("hello"));

        let outcome = receive(&mut cp, ids(&["s-1"]));
        let HandlerOutcome::Resume {
            continuation: Continuation::Run(ResumeValue::SessionPayloads { payloads }),
            ..
        } = outcome
        else {
            panic!("expected payloads");
        };
        assert_eq!(payloads[&SessionId::from("s-1")], Payload::from("hello"));
        assert_eq!(cp.session(&SessionId::from("s-1")).unwrap().next_receive_seq, 2);
    }

    #[test]
    fn receive_on_closed_empty_session_errors() {
        let mut cp = checkpoint_with_session("s-1");
        cp.session_mut(&SessionId::from("s-1")).unwrap().status = SessionStatus::Closed;
        let result = try_receive(&mut cp, &ids(&["s-1"]));
        assert!(matches!(
            result,
            Some(Continuation::Error(e)) if e.kind == FlowErrorKind::SessionClosed
        ));
    }

    #[test]
    fn close_skips_already_closed_sessions() {
        let mut cp = checkpoint_with_session("s-1");
        let first = close(&mut cp, &ids(&["s-1"]), Utc::now());
        let second = close(&mut cp, &ids(&["s-1"]), Utc::now());
        assert_eq!(first.outbound().len(), 1);
        assert!(second.outbound().is_empty());
        assert_eq!(
            cp.session(&SessionId::from("s-1")).unwrap().status,
            SessionStatus::Closed
        );
    }

    #[test]
    fn error_sessions_marks_errored() {
        let mut cp = checkpoint_with_session("s-1");
        let out = error_sessions(&mut cp, ids(&["s-1"]), "boom", Utc::now());
        assert!(matches!(
            &out[0],
            OutboundEvent::Session { event } if event.body == SessionBody::Error { message: "boom".to_string() }
        ));
        assert_eq!(
            cp.session(&SessionId::from("s-1")).unwrap().status,
            SessionStatus::Errored
        );
    }
}
