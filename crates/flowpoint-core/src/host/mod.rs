//! Execution host port.
//!
//! The engine never runs flow code itself. It hands a [`HostContext`] and a
//! [`Continuation`] to a [`FlowHost`], which runs the flow up to its next
//! suspension and returns what it yielded along with its new opaque state.

pub mod state_machine;

use std::collections::BTreeMap;

use flowpoint_types::checkpoint::{Checkpoint, InitiatedBy};
use flowpoint_types::context::ContextProperties;
use flowpoint_types::continuation::Continuation;
use flowpoint_types::ids::{FlowId, HoldingIdentity, RequestId};
use flowpoint_types::request::IoRequest;
use thiserror::Error;

/// Everything flow code may observe about its own flow.
#[derive(Debug, Clone, PartialEq)]
pub struct HostContext {
    pub flow_id: FlowId,
    pub class_name: String,
    pub holding_identity: HoldingIdentity,
    pub args: serde_json::Value,
    pub initiated_by: Option<InitiatedBy>,
    pub context_user: ContextProperties,
    pub context_platform: ContextProperties,
    /// Properties of the session that started an initiated flow.
    pub session_properties: BTreeMap<String, String>,
    pub stack_depth: usize,
    /// Suspensions yielded before this resume.
    pub suspend_count: u64,
    /// Opaque state the host returned last time.
    pub fiber: serde_json::Value,
}

impl HostContext {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let start = &checkpoint.start_context;
        let session_properties = start
            .initiated_by
            .as_ref()
            .and_then(|by| checkpoint.session(&by.session_id))
            .map(|s| s.session_properties.clone())
            .unwrap_or_default();

        Self {
            flow_id: checkpoint.flow_id.clone(),
            class_name: start.class_name.clone(),
            holding_identity: start.holding_identity.clone(),
            args: start.args.clone(),
            initiated_by: start.initiated_by.clone(),
            context_user: start.context_user.clone(),
            context_platform: start.context_platform.clone(),
            session_properties,
            stack_depth: checkpoint.stack.len(),
            suspend_count: checkpoint.suspend_count,
            fiber: checkpoint.fiber.clone(),
        }
    }

    /// Deterministic id for the request this resume is about to yield.
    ///
    /// Replaying the same resume produces the same id, so a reply to a request
    /// from before a crash still correlates.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::for_suspension(&self.flow_id, self.suspend_count)
    }
}

/// What a resumed computation did.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    /// Suspended on a request.
    Yield(IoRequest),
    /// Returned normally.
    Finished { result: Option<String> },
    /// Raised an error it did not handle.
    Raised { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resumed {
    pub step: FlowStep,
    pub fiber: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no flow class '{0}' in the sandbox for this identity")]
    UnknownFlowClass(String),

    #[error("sandbox failure: {0}")]
    Sandbox(String),
}

/// Runs flow code between suspensions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait FlowHost: Send + Sync {
    /// Resume the flow described by `context` with `input` until it next
    /// yields, finishes or raises.
    fn resume(
        &self,
        context: HostContext,
        input: Continuation,
    ) -> impl std::future::Future<Output = Result<Resumed, HostError>> + Send;

    /// Flow class that responds to `protocol` for the given identity, if any.
    fn initiated_flow(&self, holding_identity: &HoldingIdentity, protocol: &str) -> Option<String>;
}
