//! Precondition checks for flow-issued requests.
//!
//! A request that fails here never reaches its handler: the runner resumes
//! the flow with a `Malformed` error instead.

use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::error::MalformedRequest;
use flowpoint_types::ids::{RequestId, SessionId};
use flowpoint_types::payload::Payload;
use flowpoint_types::request::IoRequest;

pub fn validate(checkpoint: &Checkpoint, request: &IoRequest) -> Result<(), MalformedRequest> {
    match request {
        IoRequest::InitiateFlow {
            session_id,
            protocol,
            ..
        } => {
            if protocol.trim().is_empty() {
                return Err(MalformedRequest::EmptyProtocol);
            }
            if checkpoint.sessions.contains_key(session_id) {
                return Err(MalformedRequest::DuplicateSession(session_id.clone()));
            }
            Ok(())
        }
        IoRequest::Send { payloads } => {
            if payloads.is_empty() {
                return Err(MalformedRequest::NoSessions { operation: "send" });
            }
            for session_id in payloads.keys() {
                require_open(checkpoint, session_id)?;
            }
            Ok(())
        }
        IoRequest::Receive { session_ids } => {
            if session_ids.is_empty() {
                return Err(MalformedRequest::NoSessions { operation: "receive" });
            }
            session_ids.iter().try_for_each(|id| require_known(checkpoint, id))
        }
        IoRequest::CloseSessions { session_ids } => {
            if session_ids.is_empty() {
                return Err(MalformedRequest::NoSessions { operation: "close_sessions" });
            }
            session_ids.iter().try_for_each(|id| require_known(checkpoint, id))
        }
        IoRequest::Persist { request_id, entities } => {
            require_request_id(request_id)?;
            require_entities("persist", entities)
        }
        IoRequest::Merge { request_id, entities } => {
            require_request_id(request_id)?;
            require_entities("merge", entities)
        }
        IoRequest::Delete { request_id, entities } => {
            require_request_id(request_id)?;
            require_entities("delete", entities)
        }
        IoRequest::Find {
            request_id,
            entity_class,
            primary_key,
        } => {
            require_request_id(request_id)?;
            if entity_class.trim().is_empty() {
                return Err(MalformedRequest::EmptyEntityClass { operation: "find" });
            }
            if primary_key.is_empty() {
                return Err(MalformedRequest::EmptyPrimaryKey);
            }
            Ok(())
        }
        IoRequest::FindAll {
            request_id,
            entity_class,
        } => {
            require_request_id(request_id)?;
            if entity_class.trim().is_empty() {
                return Err(MalformedRequest::EmptyEntityClass { operation: "find_all" });
            }
            Ok(())
        }
        IoRequest::SignBytes {
            request_id,
            bytes,
            key_ref,
        } => {
            require_request_id(request_id)?;
            if bytes.is_empty() {
                return Err(MalformedRequest::InvalidSignRequest("nothing to sign".to_string()));
            }
            if key_ref.trim().is_empty() {
                return Err(MalformedRequest::InvalidSignRequest("key reference is empty".to_string()));
            }
            Ok(())
        }
        IoRequest::SubFlowStart { flow_name } => {
            if flow_name.trim().is_empty() {
                return Err(MalformedRequest::EmptyFlowName);
            }
            Ok(())
        }
        IoRequest::SubFlowFinish | IoRequest::SubFlowFailed { .. } => {
            if checkpoint.stack.len() <= 1 {
                return Err(MalformedRequest::StackUnderflow);
            }
            Ok(())
        }
        IoRequest::Sleep { .. } | IoRequest::Finish { .. } => Ok(()),
    }
}

fn require_request_id(request_id: &RequestId) -> Result<(), MalformedRequest> {
    if request_id.is_empty() {
        return Err(MalformedRequest::EmptyRequestId);
    }
    Ok(())
}

fn require_entities(operation: &'static str, entities: &[Payload]) -> Result<(), MalformedRequest> {
    if entities.is_empty() {
        return Err(MalformedRequest::NoEntities { operation });
    }
    Ok(())
}

fn require_known(checkpoint: &Checkpoint, session_id: &SessionId) -> Result<(), MalformedRequest> {
    if !checkpoint.sessions.contains_key(session_id) {
        return Err(MalformedRequest::UnknownSession(session_id.clone()));
    }
    Ok(())
}

fn require_open(checkpoint: &Checkpoint, session_id: &SessionId) -> Result<(), MalformedRequest> {
    match checkpoint.session(session_id) {
        None => Err(MalformedRequest::UnknownSession(session_id.clone())),
        Some(s) if !s.status.is_open() => Err(MalformedRequest::SessionNotOpen(session_id.clone())),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{checkpoint, checkpoint_with_session};
    use flowpoint_types::checkpoint::SessionStatus;
    use flowpoint_types::ids::HoldingIdentity;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn find_with_empty_primary_key_is_malformed() {
        let req = IoRequest::Find {
            request_id: RequestId::from("r-1"),
            entity_class: "EntityType".to_string(),
            primary_key: Payload::new(Vec::<u8>::new()),
        };
        assert_eq!(validate(&checkpoint(), &req), Err(MalformedRequest::EmptyPrimaryKey));
    }

    #[test]
    fn find_with_blank_entity_class_is_malformed() {
        let req = IoRequest::Find {
            request_id: RequestId::from("r-1"),
            entity_class: "  ".to_string(),
            primary_key: Payload::from("key1"),
        };
        assert_eq!(
            validate(&checkpoint(), &req),
            Err(MalformedRequest::EmptyEntityClass { operation: "find" })
        );
    }

    #[test]
    fn persist_without_entities_is_malformed() {
        let req = IoRequest::Persist {
            request_id: RequestId::from("r-1"),
            entities: vec![],
        };
        assert_eq!(
            validate(&checkpoint(), &req),
            Err(MalformedRequest::NoEntities { operation: "persist" })
        );
    }

    #[test]
    fn empty_request_id_is_malformed() {
        let req = IoRequest::FindAll {
            request_id: RequestId::from(""),
            entity_class: "EntityType".to_string(),
        };
        assert_eq!(validate(&checkpoint(), &req), Err(MalformedRequest::EmptyRequestId));
    }

    #[test]
    fn sign_without_key_is_malformed() {
        let req = IoRequest::SignBytes {
            request_id: RequestId::from("r-1"),
            bytes: Payload::from("tx"),
            key_ref: String::new(),
        };
        assert!(matches!(
            validate(&checkpoint(), &req),
            Err(MalformedRequest::InvalidSignRequest(_))
        ));
    }

    #[test]
    fn send_to_unknown_or_closed_session_is_malformed() {
        let mut cp = checkpoint_with_session("s-1");
        let payloads: BTreeMap<_, _> = [(SessionId::from("s-2"), Payload::from("x"))].into();
        assert_eq!(
            validate(&cp, &IoRequest::Send { payloads }),
            Err(MalformedRequest::UnknownSession(SessionId::from("s-2")))
        );

        cp.session_mut(&SessionId::from("s-1")).unwrap().status = SessionStatus::Closed;
        let payloads: BTreeMap<_, _> = [(SessionId::from("s-1"), Payload::from("x"))].into();
        assert_eq!(
            validate(&cp, &IoRequest::Send { payloads }),
            Err(MalformedRequest::SessionNotOpen(SessionId::from("s-1")))
        );
    }

    #[test]
    fn receive_on_closed_session_is_allowed() {
        let mut cp = checkpoint_with_session("s-1");
        cp.session_mut(&SessionId::from("s-1")).unwrap().status = SessionStatus::Closed;
        let req = IoRequest::Receive {
            session_ids: BTreeSet::from([SessionId::from("s-1")]),
        };
        assert!(validate(&cp, &req).is_ok());
    }

    #[test]
    fn duplicate_initiate_is_malformed() {
        let cp = checkpoint_with_session("s-1");
        let req = IoRequest::InitiateFlow {
            session_id: SessionId::from("s-1"),
            counterparty: HoldingIdentity::new("O=Bob", "g"),
            protocol: "ping".to_string(),
        };
        assert_eq!(
            validate(&cp, &req),
            Err(MalformedRequest::DuplicateSession(SessionId::from("s-1")))
        );
    }

    #[test]
    fn leaving_root_frame_is_malformed() {
        assert_eq!(
            validate(&checkpoint(), &IoRequest::SubFlowFinish),
            Err(MalformedRequest::StackUnderflow)
        );
    }

    #[test]
    fn well_formed_requests_pass() {
        let cp = checkpoint();
        let req = IoRequest::Find {
            request_id: RequestId::from("r-1"),
            entity_class: "EntityType".to_string(),
            primary_key: Payload::from("key1"),
        };
        assert!(validate(&cp, &req).is_ok());
        assert!(validate(&cp, &IoRequest::Finish { result: None }).is_ok());
    }
}
