//! Suspend reasons a flow computation can yield.
//!
//! An `IoRequest` carries only the logical intent of a suspension. The wire
//! envelopes addressed to storage, signing, or counterparties are built by the
//! request handlers in `flowpoint-core`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{HoldingIdentity, RequestId, SessionId};
use crate::payload::Payload;

/// Why (and how) a flow suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IoRequest {
    /// Open a new session to `counterparty` speaking `protocol`.
    InitiateFlow {
        session_id: SessionId,
        counterparty: HoldingIdentity,
        protocol: String,
    },
    /// Send one payload per session.
    Send { payloads: BTreeMap<SessionId, Payload> },
    /// Wait for the next payload on every listed session.
    Receive { session_ids: BTreeSet<SessionId> },
    /// Close the listed sessions.
    CloseSessions { session_ids: BTreeSet<SessionId> },
    Persist {
        request_id: RequestId,
        entities: Vec<Payload>,
    },
    Merge {
        request_id: RequestId,
        entities: Vec<Payload>,
    },
    Find {
        request_id: RequestId,
        entity_class: String,
        primary_key: Payload,
    },
    FindAll {
        request_id: RequestId,
        entity_class: String,
    },
    Delete {
        request_id: RequestId,
        entities: Vec<Payload>,
    },
    SignBytes {
        request_id: RequestId,
        bytes: Payload,
        key_ref: String,
    },
    Sleep { until: DateTime<Utc> },
    /// Enter a sub-flow; pushes a call frame.
    SubFlowStart { flow_name: String },
    /// Leave the current sub-flow normally; pops its frame.
    SubFlowFinish,
    /// Leave the current sub-flow with an error; pops its frame.
    SubFlowFailed { error: String },
    /// The top-level flow returned.
    Finish { result: Option<String> },
}

impl IoRequest {
    /// Short variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            IoRequest::InitiateFlow { .. } => "initiate_flow",
            IoRequest::Send { .. } => "send",
            IoRequest::Receive { .. } => "receive",
            IoRequest::CloseSessions { .. } => "close_sessions",
            IoRequest::Persist { .. } => "persist",
            IoRequest::Merge { .. } => "merge",
            IoRequest::Find { .. } => "find",
            IoRequest::FindAll { .. } => "find_all",
            IoRequest::Delete { .. } => "delete",
            IoRequest::SignBytes { .. } => "sign_bytes",
            IoRequest::Sleep { .. } => "sleep",
            IoRequest::SubFlowStart { .. } => "sub_flow_start",
            IoRequest::SubFlowFinish => "sub_flow_finish",
            IoRequest::SubFlowFailed { .. } => "sub_flow_failed",
            IoRequest::Finish { .. } => "finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_request_json_shape() {
        let req = IoRequest::Find {
            request_id: RequestId::from("r-1"),
            entity_class: "EntityType".to_string(),
            primary_key: Payload::from("key1"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "find");
        assert_eq!(json["entity_class"], "EntityType");
        assert_eq!(req.name(), "find");
    }

    #[test]
    fn unit_variant_round_trips() {
        let json = serde_json::to_string(&IoRequest::SubFlowFinish).unwrap();
        assert_eq!(json, r#"{"type":"sub_flow_finish"}"#);
        let back: IoRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IoRequest::SubFlowFinish);
    }
}
