//! In-process execution host for flows written as explicit state machines.
//!
//! Each flow class maps to a [`FlowProgram`] that is stepped once per resume
//! and keeps its progress in the JSON fiber stored on the checkpoint. Programs
//! are grouped into per-group registries so each holding identity only sees
//! the flows installed for its group.

use std::collections::HashMap;
use std::sync::Arc;

use flowpoint_types::continuation::Continuation;
use flowpoint_types::ids::HoldingIdentity;

use super::{FlowHost, FlowStep, HostContext, HostError, Resumed};

/// A flow written as a step function over JSON state.
pub trait FlowProgram: Send + Sync {
    /// Advance from the last suspension. `state` starts as `Null`.
    fn step(&self, context: &HostContext, state: &mut serde_json::Value, input: Continuation) -> FlowStep;
}

type Step = Arc<dyn Fn(&HostContext, Continuation) -> FlowStep + Send + Sync>;

/// A linear flow: one closure per suspension, run in order.
///
/// Closure `n` receives the continuation that resolved suspension `n - 1`
/// (closure 0 receives the start continuation).
#[derive(Clone, Default)]
pub struct ScriptedProgram {
    steps: Vec<Step>,
}

impl ScriptedProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(mut self, step: F) -> Self
    where
        F: Fn(&HostContext, Continuation) -> FlowStep + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(step));
        self
    }
}

impl FlowProgram for ScriptedProgram {
    fn step(&self, context: &HostContext, state: &mut serde_json::Value, input: Continuation) -> FlowStep {
        let index = state.get("step").and_then(|v| v.as_u64()).unwrap_or(0);
        *state = serde_json::json!({ "step": index + 1 });

        match usize::try_from(index).ok().and_then(|i| self.steps.get(i)) {
            Some(step) => step(context, input),
            None => FlowStep::Raised {
                error: format!("flow {} resumed after its last step", context.class_name),
            },
        }
    }
}

/// Flow classes and responder protocols installed for one group.
#[derive(Clone, Default)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<dyn FlowProgram>>,
    responders: HashMap<String, String>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, class_name: impl Into<String>, program: impl FlowProgram + 'static) -> Self {
        self.flows.insert(class_name.into(), Arc::new(program));
        self
    }

    /// Register a flow class that is started by SessionInits for `protocol`.
    pub fn register_responder(
        mut self,
        protocol: impl Into<String>,
        class_name: impl Into<String>,
        program: impl FlowProgram + 'static,
    ) -> Self {
        let class_name = class_name.into();
        self.responders.insert(protocol.into(), class_name.clone());
        self.flows.insert(class_name, Arc::new(program));
        self
    }

    pub fn program(&self, class_name: &str) -> Option<Arc<dyn FlowProgram>> {
        self.flows.get(class_name).cloned()
    }

    pub fn responder_for(&self, protocol: &str) -> Option<&str> {
        self.responders.get(protocol).map(String::as_str)
    }
}

pub struct StateMachineHost {
    default: FlowRegistry,
    groups: HashMap<String, FlowRegistry>,
}

impl StateMachineHost {
    pub fn new(default: FlowRegistry) -> Self {
        Self {
            default,
            groups: HashMap::new(),
        }
    }

    /// Give identities in `group_id` their own registry instead of the default.
    pub fn with_group(mut self, group_id: impl Into<String>, registry: FlowRegistry) -> Self {
        self.groups.insert(group_id.into(), registry);
        self
    }

    fn sandbox(&self, holding_identity: &HoldingIdentity) -> &FlowRegistry {
        self.groups
            .get(&holding_identity.group_id)
            .unwrap_or(&self.default)
    }
}

impl FlowHost for StateMachineHost {
    async fn resume(&self, context: HostContext, input: Continuation) -> Result<Resumed, HostError> {
        let program = self
            .sandbox(&context.holding_identity)
            .program(&context.class_name)
            .ok_or_else(|| HostError::UnknownFlowClass(context.class_name.clone()))?;

        let mut fiber = context.fiber.clone();
        let step = program.step(&context, &mut fiber, input);
        Ok(Resumed { step, fiber })
    }

    fn initiated_flow(&self, holding_identity: &HoldingIdentity, protocol: &str) -> Option<String> {
        self.sandbox(holding_identity)
            .responder_for(protocol)
            .map(str::to_string)
    }
}
