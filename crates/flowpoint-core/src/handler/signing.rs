//! Signing requests.

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::{Checkpoint, PendingRequest};
use flowpoint_types::event::{OutboundEvent, SignRequest};
use flowpoint_types::ids::RequestId;
use flowpoint_types::payload::Payload;
use flowpoint_types::waiting::WaitingFor;

use super::HandlerOutcome;

pub fn handle(
    checkpoint: &mut Checkpoint,
    request_id: RequestId,
    bytes: Payload,
    key_ref: String,
    now: DateTime<Utc>,
) -> HandlerOutcome {
    let waiting_for = WaitingFor::SignedBytes {
        request_id: request_id.clone(),
    };
    let envelope = OutboundEvent::SignRequest {
        request: SignRequest {
            request_id: request_id.clone(),
            flow_id: checkpoint.flow_id.clone(),
            holding_identity: checkpoint.holding_identity().clone(),
            timestamp: now,
            bytes,
            key_ref,
        },
    };
    checkpoint.pending = Some(PendingRequest::new(request_id, envelope.clone(), now));

    HandlerOutcome::Suspend {
        waiting_for,
        outbound: vec![envelope],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::checkpoint;
    use flowpoint_types::event::SIGN_REQUEST_TOPIC;

    #[test]
    fn sign_suspends_on_signed_bytes() {
        let mut cp = checkpoint();
        let outcome = handle(
            &mut cp,
            RequestId::from("r-9"),
            Payload::from("tx-bytes"),
            "key-1".to_string(),
            Utc::now(),
        );

        let HandlerOutcome::Suspend { waiting_for, outbound } = outcome else {
            panic!("expected suspend");
        };
        assert_eq!(waiting_for.request_id(), Some(&RequestId::from("r-9")));
        assert_eq!(outbound[0].topic(), SIGN_REQUEST_TOPIC);
        assert_eq!(cp.pending.map(|p| p.request_id), Some(RequestId::from("r-9")));
    }
}
