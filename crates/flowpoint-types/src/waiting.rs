//! The condition a suspended flow is blocked on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RequestId, SessionId};

/// What external reply will resume a suspended flow.
///
/// `None` is only valid for a brand-new or a terminal checkpoint. Every other
/// value implies exactly one outstanding condition correlated by session id,
/// request id, or wake time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitingFor {
    #[default]
    None,
    /// Next in-order data message on every listed session.
    SessionData { session_ids: BTreeSet<SessionId> },
    /// Reply from the storage worker.
    EntityResponse { request_id: RequestId },
    /// Reply from the signing worker.
    SignedBytes { request_id: RequestId },
    /// A scheduler wake-up at or after `until`.
    WakeUp { until: DateTime<Utc> },
}

impl WaitingFor {
    pub fn is_none(&self) -> bool {
        matches!(self, WaitingFor::None)
    }

    /// Request id of the outstanding external request, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            WaitingFor::EntityResponse { request_id } | WaitingFor::SignedBytes { request_id } => {
                Some(request_id)
            }
            _ => None,
        }
    }

    /// Short label used in logs and the store's `waiting_for` column.
    pub fn label(&self) -> &'static str {
        match self {
            WaitingFor::None => "none",
            WaitingFor::SessionData { .. } => "session_data",
            WaitingFor::EntityResponse { .. } => "entity_response",
            WaitingFor::SignedBytes { .. } => "signed_bytes",
            WaitingFor::WakeUp { .. } => "wake_up",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_only_for_external_waits() {
        let rid = RequestId::from("r-1");
        assert_eq!(
            WaitingFor::EntityResponse { request_id: rid.clone() }.request_id(),
            Some(&rid)
        );
        assert_eq!(
            WaitingFor::SignedBytes { request_id: rid.clone() }.request_id(),
            Some(&rid)
        );
        assert!(WaitingFor::None.request_id().is_none());
        assert!(WaitingFor::WakeUp { until: Utc::now() }.request_id().is_none());
    }

    #[test]
    fn waiting_for_is_internally_tagged() {
        let w = WaitingFor::EntityResponse { request_id: RequestId::from("r-1") };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "entity_response");
        assert_eq!(json["request_id"], "r-1");
    }
}
