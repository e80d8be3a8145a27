//! Top-level flow completion.

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::Checkpoint;

use super::HandlerOutcome;
use super::session::close_sessions;

/// Finish the flow, closing every session that is still open.
pub fn handle(checkpoint: &mut Checkpoint, result: Option<String>, now: DateTime<Utc>) -> HandlerOutcome {
    let open: Vec<_> = checkpoint
        .sessions
        .values()
        .filter(|s| s.status.is_open())
        .map(|s| s.session_id.clone())
        .collect();
    let outbound = close_sessions(checkpoint, open, now);
    HandlerOutcome::Terminate { result, outbound }
}
