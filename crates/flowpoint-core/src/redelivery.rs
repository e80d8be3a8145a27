//! Resending the outstanding storage or signing request.
//!
//! A flow waiting on an external reply gets wake-ups from the scheduler. On a
//! wake-up, the stored envelope is resent unchanged when the last reply asked
//! for a retry or when nothing has been heard within the resend window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::{Checkpoint, PendingRequest, PendingStatus};
use flowpoint_types::event::OutboundEvent;

/// Whether `pending` should be resent at `now`.
pub fn due_for_resend(pending: &PendingRequest, now: DateTime<Utc>, window: Duration) -> bool {
    if pending.status == PendingStatus::Retrying {
        return true;
    }
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| pending.sent_at.checked_add_signed(window))
        .is_some_and(|due| due <= now)
}

/// Resend the pending request if it is due, recording the new send time.
///
/// Returns the envelope to publish. The envelope is the one originally built
/// by the handler, byte for byte.
pub fn resend(checkpoint: &mut Checkpoint, now: DateTime<Utc>, window: Duration) -> Option<OutboundEvent> {
    let waiting_on = checkpoint.waiting_for.request_id()?.clone();
    let pending = checkpoint.pending.as_mut()?;
    if pending.request_id != waiting_on || !due_for_resend(pending, now, window) {
        return None;
    }

    pending.sent_at = now;
    pending.status = PendingStatus::Sent;
    tracing::info!(
        flow_id = %checkpoint.flow_id,
        request_id = %pending.request_id,
        retries = pending.retries,
        "resending external request"
    );
    Some(pending.envelope.clone())
}
