//! Storage requests: persist, merge, find, find-all and delete.
//!
//! All five share one shape. The flow waits on an entity response carrying
//! its request id, and the outbound envelope is kept on the checkpoint so a
//! later wake-up can resend it unchanged.

use chrono::{DateTime, Utc};
use flowpoint_types::checkpoint::{Checkpoint, PendingRequest};
use flowpoint_types::event::{EntityOperation, EntityRequest, OutboundEvent};
use flowpoint_types::ids::RequestId;
use flowpoint_types::waiting::WaitingFor;

use super::HandlerOutcome;

pub fn handle(
    checkpoint: &mut Checkpoint,
    request_id: RequestId,
    operation: EntityOperation,
    now: DateTime<Utc>,
) -> HandlerOutcome {
    let waiting_for = waiting_for(&request_id);
    let event = build_outbound(checkpoint, request_id, operation, now);
    HandlerOutcome::Suspend {
        waiting_for,
        outbound: vec![event],
    }
}

pub fn waiting_for(request_id: &RequestId) -> WaitingFor {
    WaitingFor::EntityResponse {
        request_id: request_id.clone(),
    }
}

/// Build the storage request envelope and record it as the pending request.
pub fn build_outbound(
    checkpoint: &mut Checkpoint,
    request_id: RequestId,
    operation: EntityOperation,
    now: DateTime<Utc>,
) -> OutboundEvent {
    let envelope = OutboundEvent::EntityRequest {
        request: EntityRequest {
            request_id: request_id.clone(),
            flow_id: checkpoint.flow_id.clone(),
            holding_identity: checkpoint.holding_identity().clone(),
            timestamp: now,
            operation,
        },
    };
    checkpoint.pending = Some(PendingRequest::new(request_id, envelope.clone(), now));
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{alice, checkpoint};
    use flowpoint_types::checkpoint::PendingStatus;
    use flowpoint_types::event::ENTITY_REQUEST_TOPIC;
    use flowpoint_types::payload::Payload;

    #[test]
    fn find_suspends_on_entity_response() {
        let mut cp = checkpoint();
        let now = Utc::now();
        let outcome = handle(
            &mut cp,
            RequestId::from("r-1"),
            EntityOperation::FindEntity {
                entity_class: "EntityType".to_string(),
                primary_key: Payload::from("key1"),
            },
            now,
        );

        let HandlerOutcome::Suspend { waiting_for, outbound } = outcome else {
            panic!("expected suspend");
        };
        assert_eq!(
            waiting_for,
            WaitingFor::EntityResponse {
                request_id: RequestId::from("r-1")
            }
        );
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].topic(), ENTITY_REQUEST_TOPIC);
        assert_eq!(outbound[0].partition_key(), "flow-1");

        let OutboundEvent::EntityRequest { request } = &outbound[0] else {
            panic!("expected entity request");
        };
        assert_eq!(request.holding_identity, alice());
        assert_eq!(request.timestamp, now);
    }

    #[test]
    fn envelope_is_kept_for_resend() {
        let mut cp = checkpoint();
        let outcome = handle(
            &mut cp,
            RequestId::from("r-2"),
            EntityOperation::Persist {
                entities: vec![Payload::from("e")],
            },
            Utc::now(),
        );

        let pending = cp.pending.expect("pending request recorded");
        assert_eq!(pending.request_id, RequestId::from("r-2"));
        assert_eq!(pending.status, PendingStatus::Sent);
        assert_eq!(pending.retries, 0);
        assert_eq!(&pending.envelope, &outcome.outbound()[0]);
    }
}
