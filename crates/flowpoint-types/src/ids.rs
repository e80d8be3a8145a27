//! Identifier newtypes for flows, sessions and external requests.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier of one flow instance. Inbound events are partitioned by it.
    FlowId
);

string_id!(
    /// Identifier of a session between two flows on different parties.
    SessionId
);

string_id!(
    /// Correlation id of an outstanding external request (storage or signing).
    RequestId
);

impl FlowId {
    /// Generate a fresh, time-sortable flow id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl RequestId {
    /// Deterministic request id for the suspension numbered `suspend_count`.
    ///
    /// A computation replayed from the same checkpoint yields the same id, so a
    /// reply produced for an earlier attempt still correlates.
    pub fn for_suspension(flow_id: &FlowId, suspend_count: u64) -> Self {
        Self(format!("{flow_id}-{suspend_count}"))
    }
}

/// The identity a flow runs as: a member name within a group.
///
/// Used as the correlation key for counterparty mailboxes and external workers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HoldingIdentity {
    pub x500_name: String,
    pub group_id: String,
}

impl HoldingIdentity {
    pub fn new(x500_name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            x500_name: x500_name.into(),
            group_id: group_id.into(),
        }
    }
}

impl fmt::Display for HoldingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.x500_name, self.group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_deterministic_per_suspension() {
        let flow = FlowId::from("flow-1");
        assert_eq!(
            RequestId::for_suspension(&flow, 3),
            RequestId::for_suspension(&flow, 3)
        );
        assert_ne!(
            RequestId::for_suspension(&flow, 3),
            RequestId::for_suspension(&flow, 4)
        );
        assert_eq!(RequestId::for_suspension(&flow, 3).as_str(), "flow-1-3");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SessionId::from("s-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s-1\"");
    }

    #[test]
    fn generated_flow_ids_are_unique() {
        assert_ne!(FlowId::generate(), FlowId::generate());
    }

    #[test]
    fn holding_identity_display() {
        let id = HoldingIdentity::new("O=Alice, L=London, C=GB", "group-a");
        assert_eq!(id.to_string(), "O=Alice, L=London, C=GB@group-a");
    }
}
