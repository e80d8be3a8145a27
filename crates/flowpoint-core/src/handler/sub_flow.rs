//! Sub-flow frames.
//!
//! Leaving a frame ends the sessions that frame opened: a normal finish
//! closes them, a failure errors them so counterparties learn the sub-flow
//! died.

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::{Checkpoint, StackFrame};
use flowpoint_types::continuation::Continuation;
use flowpoint_types::event::OutboundEvent;
use flowpoint_types::ids::SessionId;

use super::HandlerOutcome;
use super::session::{close_sessions, error_sessions};

pub fn start(checkpoint: &mut Checkpoint, flow_name: String) -> HandlerOutcome {
    checkpoint.stack.push(StackFrame {
        flow_name,
        initiated: false,
        session_ids: Default::default(),
    });
    resume_unit(Vec::new())
}

pub fn finish(checkpoint: &mut Checkpoint, now: DateTime<Utc>) -> HandlerOutcome {
    let Some(frame) = pop_frame(checkpoint) else {
        return resume_unit(Vec::new());
    };
    let owned = owned_sessions(checkpoint, &frame);
    let outbound = close_sessions(checkpoint, owned, now);
    resume_unit(outbound)
}

pub fn failed(checkpoint: &mut Checkpoint, error: &str, now: DateTime<Utc>) -> HandlerOutcome {
    let Some(frame) = pop_frame(checkpoint) else {
        return resume_unit(Vec::new());
    };
    tracing::debug!(
        flow_id = %checkpoint.flow_id,
        sub_flow = %frame.flow_name,
        error,
        "sub-flow failed"
    );
    let owned = owned_sessions(checkpoint, &frame);
    let outbound = error_sessions(checkpoint, owned, error, now);
    resume_unit(outbound)
}

/// Pop the top frame unless it is the root frame.
fn pop_frame(checkpoint: &mut Checkpoint) -> Option<StackFrame> {
    if checkpoint.stack.len() <= 1 {
        return None;
    }
    checkpoint.stack.pop()
}

/// Sessions the frame opened itself; sessions handed to it stay open.
fn owned_sessions(checkpoint: &Checkpoint, frame: &StackFrame) -> Vec<SessionId> {
    frame
        .session_ids
        .iter()
        .filter(|id| checkpoint.session(id).is_some_and(|s| s.initiated_by_us))
        .cloned()
        .collect()
}

fn resume_unit(outbound: Vec<OutboundEvent>) -> HandlerOutcome {
    HandlerOutcome::Resume {
        continuation: Continuation::unit(),
        outbound,
    }
}
