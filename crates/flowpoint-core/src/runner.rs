//! Flow runner: one inbound event in, one checkpoint write and a batch of
//! outbound events out.
//!
//! The runner reads the checkpoint, decides what the event means, resumes the
//! flow through the [`FlowHost`] as far as it can go without blocking, and
//! writes the result with an optimistic version check. It never publishes:
//! outbound events are returned to the caller, which publishes them only
//! after the write succeeded.

use chrono::Utc;
use flowpoint_types::checkpoint::{
    Checkpoint, FlowStartContext, FlowStatus, InitiatedBy, SessionState, SessionStatus,
};
use flowpoint_types::config::EngineConfig;
use flowpoint_types::context::ContextProperties;
use flowpoint_types::continuation::{Continuation, FlowError, FlowErrorKind};
use flowpoint_types::error::RepositoryError;
use flowpoint_types::event::{
    InboundEvent, InboundPayload, OutboundEvent, SessionBody, SessionDirection, SessionEvent,
};
use flowpoint_types::ids::FlowId;
use flowpoint_types::request::IoRequest;
use flowpoint_types::waiting::WaitingFor;
use thiserror::Error;
use tokio::sync::watch;

use crate::context_mapper::remote_to_local_context;
use crate::handler::{self, HandlerOutcome, session, validate::validate};
use crate::host::{FlowHost, FlowStep, HostContext};
use crate::redelivery;
use crate::repository::checkpoint::CheckpointStore;
use crate::resolver;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of processing one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub flow_id: FlowId,
    pub disposition: Disposition,
    /// Events to publish, in order. Only valid once the write succeeded.
    pub outbound: Vec<OutboundEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The checkpoint was written at `version`.
    Persisted {
        version: u64,
        status: FlowStatus,
        waiting_for: WaitingFor,
    },
    /// Nothing was written.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No checkpoint and the event cannot start a flow.
    UnknownFlow,
    /// StartFlow for a flow that already exists.
    DuplicateStart,
    /// The flow already completed, failed or was killed.
    FlowTerminated,
    /// The event does not match what the flow waits on.
    Uncorrelated,
    /// SessionInit for a protocol no local flow responds to.
    UnknownProtocol,
    /// Wake-up arrived before the pending request was due for a resend.
    NotDue,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Another writer advanced the checkpoint; reprocess from a fresh read.
    #[error("checkpoint for flow {flow_id} changed concurrently (expected version {expected}, found {actual})")]
    Conflict {
        flow_id: FlowId,
        expected: u64,
        actual: u64,
    },

    #[error("checkpoint store error: {0}")]
    Store(RepositoryError),
}

impl From<RepositoryError> for RunnerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict {
                flow_id,
                expected,
                actual,
            } => RunnerError::Conflict {
                flow_id,
                expected,
                actual,
            },
            other => RunnerError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowRunner
// ---------------------------------------------------------------------------

/// Drives flows forward one inbound event at a time.
///
/// Generic over the checkpoint store and execution host. Configuration is read
/// from a `watch` channel on every event so policy changes apply to flows
/// that are already suspended.
pub struct FlowRunner<S: CheckpointStore, H: FlowHost> {
    store: S,
    host: H,
    config: watch::Receiver<EngineConfig>,
}

impl<S: CheckpointStore, H: FlowHost> FlowRunner<S, H> {
    pub fn new(store: S, host: H, config: watch::Receiver<EngineConfig>) -> Self {
        Self {
            store,
            host,
            config,
        }
    }

    /// Runner with a fixed configuration.
    pub fn with_config(store: S, host: H, config: EngineConfig) -> Self {
        let (_tx, rx) = watch::channel(config);
        Self::new(store, host, rx)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> EngineConfig {
        self.config.borrow().clone()
    }

    /// Current status of a flow, if it exists.
    pub async fn status(&self, flow_id: &FlowId) -> Result<Option<FlowStatus>, RunnerError> {
        Ok(self.store.read(flow_id).await?.map(|c| c.status))
    }

    /// Process one inbound event.
    ///
    /// Performs at most one checkpoint write. On `RunnerError::Conflict`
    /// nothing was written and nothing may be published.
    #[tracing::instrument(
        name = "process_event",
        skip_all,
        fields(flow_id = %event.flow_id, event = event.payload.name())
    )]
    pub async fn process(&self, event: InboundEvent) -> Result<ProcessOutcome, RunnerError> {
        let config = self.config();
        let InboundEvent { flow_id, payload } = event;

        match self.store.read(&flow_id).await? {
            None => self.start(flow_id, payload, &config).await,
            Some(checkpoint) => self.advance(checkpoint, payload, &config).await,
        }
    }

    /// Resume the computation with `continuation` and keep resuming it through
    /// non-blocking requests until it suspends, finishes or fails.
    ///
    /// Returns the outbound events produced along the way. The checkpoint is
    /// updated in place but not written.
    pub async fn run_flow(
        &self,
        checkpoint: &mut Checkpoint,
        continuation: Continuation,
    ) -> Vec<OutboundEvent> {
        let max_resumes = self.config.borrow().max_inline_resumes;
        let mut outbound = Vec::new();
        let mut input = continuation;
        checkpoint.waiting_for = WaitingFor::None;

        for _ in 0..max_resumes {
            let context = HostContext::from_checkpoint(checkpoint);
            let resumed = match self.host.resume(context, input).await {
                Ok(resumed) => resumed,
                Err(e) => {
                    fail(checkpoint, FlowError::new(FlowErrorKind::Fatal, e.to_string()));
                    return outbound;
                }
            };
            checkpoint.fiber = resumed.fiber;

            let request = match resumed.step {
                FlowStep::Yield(request) => request,
                FlowStep::Finished { result } => IoRequest::Finish { result },
                FlowStep::Raised { error } => {
                    fail(checkpoint, FlowError::new(FlowErrorKind::Unhandled, error));
                    return outbound;
                }
            };
            checkpoint.suspend_count += 1;

            if let Err(e) = validate(checkpoint, &request) {
                tracing::debug!(
                    flow_id = %checkpoint.flow_id,
                    request = request.name(),
                    error = %e,
                    "rejected malformed request"
                );
                input = Continuation::Error(FlowError::new(FlowErrorKind::Malformed, e.to_string()));
                continue;
            }

            let request_name = request.name();
            match handler::dispatch(checkpoint, request, Utc::now()) {
                HandlerOutcome::Suspend {
                    waiting_for,
                    outbound: events,
                } => {
                    tracing::debug!(
                        flow_id = %checkpoint.flow_id,
                        request = request_name,
                        waiting_for = waiting_for.label(),
                        "flow suspended"
                    );
                    checkpoint.waiting_for = waiting_for;
                    outbound.extend(events);
                    return outbound;
                }
                HandlerOutcome::Resume {
                    continuation,
                    outbound: events,
                } => {
                    outbound.extend(events);
                    input = continuation;
                }
                HandlerOutcome::Terminate {
                    result,
                    outbound: events,
                } => {
                    tracing::info!(flow_id = %checkpoint.flow_id, "flow completed");
                    outbound.extend(events);
                    checkpoint.terminate(FlowStatus::Completed { result });
                    return outbound;
                }
            }
        }

        fail(
            checkpoint,
            FlowError::new(
                FlowErrorKind::Fatal,
                format!("flow did not suspend within {max_resumes} resumes"),
            ),
        );
        outbound
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    /// Event for a flow with no checkpoint.
    async fn start(
        &self,
        flow_id: FlowId,
        payload: InboundPayload,
        config: &EngineConfig,
    ) -> Result<ProcessOutcome, RunnerError> {
        match payload {
            InboundPayload::StartFlow {
                class_name,
                args,
                holding_identity,
            } => {
                tracing::info!(class_name = %class_name, identity = %holding_identity, "starting flow");
                let mut checkpoint = Checkpoint::new(
                    flow_id,
                    FlowStartContext {
                        class_name,
                        holding_identity,
                        args,
                        initiated_by: None,
                        context_user: ContextProperties::new(),
                        context_platform: ContextProperties::new(),
                        started_at: Utc::now(),
                    },
                );
                let outbound = self.run_flow(&mut checkpoint, Continuation::unit()).await;
                self.persist(checkpoint, outbound).await
            }
            InboundPayload::Session { event }
                if event.direction == SessionDirection::Inbound
                    && matches!(event.body, SessionBody::Init { .. }) =>
            {
                self.start_initiated(flow_id, event, config).await
            }
            _ => Ok(discarded(flow_id, DiscardReason::UnknownFlow)),
        }
    }

    /// SessionInit from a counterparty: start the responder flow for its protocol.
    async fn start_initiated(
        &self,
        flow_id: FlowId,
        event: SessionEvent,
        config: &EngineConfig,
    ) -> Result<ProcessOutcome, RunnerError> {
        let SessionBody::Init {
            protocol,
            context_user,
            context_platform,
        } = &event.body
        else {
            return Ok(discarded(flow_id, DiscardReason::UnknownFlow));
        };

        let Some(class_name) = self.host.initiated_flow(&event.destination, protocol) else {
            tracing::warn!(
                flow_id = %flow_id,
                protocol = %protocol,
                initiator = %event.source,
                "no responder flow for protocol"
            );
            let reply = session_error_reply(&event, format!("no flow responds to protocol '{protocol}'"));
            let mut outcome = discarded(flow_id, DiscardReason::UnknownProtocol);
            outcome.outbound.push(reply);
            return Ok(outcome);
        };

        let local = remote_to_local_context(context_user, context_platform, &config.initiated_context);
        tracing::info!(
            flow_id = %flow_id,
            class_name = %class_name,
            initiator = %event.source,
            "starting initiated flow"
        );

        let mut checkpoint = Checkpoint::new(
            flow_id,
            FlowStartContext {
                class_name,
                holding_identity: event.destination.clone(),
                args: serde_json::Value::Null,
                initiated_by: Some(InitiatedBy {
                    counterparty: event.source.clone(),
                    session_id: event.session_id.clone(),
                    protocol: protocol.clone(),
                }),
                context_user: local.user_properties,
                context_platform: local.platform_properties,
                started_at: Utc::now(),
            },
        );
        add_initiating_session(&mut checkpoint, &event, local.session_properties);

        let outbound = self.run_flow(&mut checkpoint, Continuation::unit()).await;
        self.persist(checkpoint, outbound).await
    }

    /// Event for an existing flow.
    async fn advance(
        &self,
        mut checkpoint: Checkpoint,
        payload: InboundPayload,
        config: &EngineConfig,
    ) -> Result<ProcessOutcome, RunnerError> {
        let flow_id = checkpoint.flow_id.clone();
        if checkpoint.is_terminal() {
            return Ok(discarded(flow_id, DiscardReason::FlowTerminated));
        }
        let policy = config.policy_for(&checkpoint.start_context.class_name);

        match payload {
            InboundPayload::StartFlow { .. } => Ok(discarded(flow_id, DiscardReason::DuplicateStart)),
            InboundPayload::Kill { reason } => {
                tracing::info!(flow_id = %flow_id, reason = %reason, "killing flow");
                checkpoint.terminate(FlowStatus::Killed { reason });
                self.persist(checkpoint, Vec::new()).await
            }
            InboundPayload::WakeUp { scheduled_time } if checkpoint.waiting_for.request_id().is_some() => {
                match redelivery::resend(&mut checkpoint, scheduled_time, policy.resend_window) {
                    Some(envelope) => self.persist(checkpoint, vec![envelope]).await,
                    None => Ok(discarded(flow_id, DiscardReason::NotDue)),
                }
            }
            payload => match resolver::resolve(&mut checkpoint, &payload, &policy) {
                None => Ok(discarded(flow_id, DiscardReason::Uncorrelated)),
                Some(Continuation::Continue) => self.persist(checkpoint, Vec::new()).await,
                Some(Continuation::Error(error)) if error.is_terminal() => {
                    let session_ids: Vec<_> = checkpoint.sessions.keys().cloned().collect();
                    let outbound =
                        session::error_sessions(&mut checkpoint, session_ids, &error.message, Utc::now());
                    fail(&mut checkpoint, error);
                    self.persist(checkpoint, outbound).await
                }
                Some(continuation) => {
                    let outbound = self.run_flow(&mut checkpoint, continuation).await;
                    self.persist(checkpoint, outbound).await
                }
            },
        }
    }

    async fn persist(
        &self,
        checkpoint: Checkpoint,
        outbound: Vec<OutboundEvent>,
    ) -> Result<ProcessOutcome, RunnerError> {
        let version = self.store.write_if_version(&checkpoint).await?;
        tracing::debug!(
            flow_id = %checkpoint.flow_id,
            version,
            status = checkpoint.status.label(),
            waiting_for = checkpoint.waiting_for.label(),
            outbound = outbound.len(),
            "checkpoint written"
        );

        Ok(ProcessOutcome {
            flow_id: checkpoint.flow_id,
            disposition: Disposition::Persisted {
                version,
                status: checkpoint.status,
                waiting_for: checkpoint.waiting_for,
            },
            outbound,
        })
    }
}

fn fail(checkpoint: &mut Checkpoint, error: FlowError) {
    tracing::error!(
        flow_id = %checkpoint.flow_id,
        kind = ?error.kind,
        error = %error.message,
        "flow failed"
    );
    checkpoint.terminate(FlowStatus::Failed { error });
}

fn discarded(flow_id: FlowId, reason: DiscardReason) -> ProcessOutcome {
    match reason {
        DiscardReason::Uncorrelated | DiscardReason::NotDue | DiscardReason::FlowTerminated => {
            tracing::debug!(flow_id = %flow_id, reason = ?reason, "event discarded");
        }
        _ => tracing::warn!(flow_id = %flow_id, reason = ?reason, "event discarded"),
    }
    ProcessOutcome {
        flow_id,
        disposition: Disposition::Discarded(reason),
        outbound: Vec::new(),
    }
}

/// Record the session a responder flow was started from.
fn add_initiating_session(
    checkpoint: &mut Checkpoint,
    init: &SessionEvent,
    session_properties: std::collections::BTreeMap<String, String>,
) {
    let session_id = init.session_id.clone();
    let mut session = SessionState::new(session_id.clone(), init.source.clone(), false);
    session.status = SessionStatus::Confirmed;
    session.session_properties = session_properties;

    checkpoint.sessions.insert(session_id.clone(), session);
    if let Some(frame) = checkpoint.top_frame_mut() {
        frame.session_ids.insert(session_id);
    }
}

/// SessionError back to the sender of a SessionInit that cannot be served.
fn session_error_reply(init: &SessionEvent, message: String) -> OutboundEvent {
    OutboundEvent::Session {
        event: SessionEvent {
            session_id: init.session_id.clone(),
            direction: SessionDirection::Outbound,
            source: init.destination.clone(),
            destination: init.source.clone(),
            sequence: 1,
            timestamp: Utc::now(),
            body: SessionBody::Error { message },
        },
    }
}
