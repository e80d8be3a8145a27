//! Sleep: ask the scheduler for a wake-up and wait for it.

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::event::OutboundEvent;
use flowpoint_types::waiting::WaitingFor;

use super::HandlerOutcome;

pub fn handle(checkpoint: &Checkpoint, until: DateTime<Utc>) -> HandlerOutcome {
    HandlerOutcome::Suspend {
        waiting_for: WaitingFor::WakeUp { until },
        outbound: vec![OutboundEvent::ScheduleWakeUp {
            flow_id: checkpoint.flow_id.clone(),
            at: until,
        }],
    }
}
