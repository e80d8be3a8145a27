//! Worker pool that feeds inbound events to the flow runner.
//!
//! Each worker owns a bounded mailbox. A flow id always hashes to the same
//! worker, so events for one flow are processed one at a time and in arrival
//! order, while different flows proceed in parallel.
//!
//! Every submitted event yields an [`EventReceipt`]. An event that could not
//! be committed, or whose outbound events could not be published after the
//! commit, comes back through the receipt with everything needed to retry it.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use flowpoint_types::event::{InboundEvent, OutboundEvent};
use flowpoint_types::ids::FlowId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::host::FlowHost;
use crate::repository::checkpoint::CheckpointStore;
use crate::runner::{FlowRunner, ProcessOutcome, RunnerError};
use crate::sink::{OutboundSink, SinkError};

/// Delay before the first publish retry; doubled on each further attempt.
const PUBLISH_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("worker pool is shut down")]
    Closed,

    /// Nothing was written; the event can be submitted again as is.
    #[error("event for flow {flow_id} was not processed: {source}")]
    Process {
        flow_id: FlowId,
        event: InboundEvent,
        source: RunnerError,
    },

    /// The checkpoint was written but `events` never reached the sink.
    #[error("flow {flow_id} advanced but {} outbound events were not published: {source}", .events.len())]
    Publish {
        flow_id: FlowId,
        events: Vec<OutboundEvent>,
        source: SinkError,
    },
}

type Reply = oneshot::Sender<Result<ProcessOutcome, PoolError>>;

struct Job {
    event: InboundEvent,
    reply: Reply,
}

/// Result of one submitted event, available once its worker is done with it.
#[derive(Debug)]
pub struct EventReceipt {
    flow_id: FlowId,
    reply: oneshot::Receiver<Result<ProcessOutcome, PoolError>>,
}

impl EventReceipt {
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// Wait for the event to be committed and published.
    ///
    /// Returns `PoolError::Closed` if the pool was cancelled before the event
    /// was processed.
    pub async fn outcome(self) -> Result<ProcessOutcome, PoolError> {
        match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Closed),
        }
    }
}

pub struct FlowWorkerPool {
    mailboxes: Vec<mpsc::Sender<Job>>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl FlowWorkerPool {
    /// Spawn `workers` workers, each with a mailbox of `capacity` events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, H, K>(
        runner: Arc<FlowRunner<S, H>>,
        sink: Arc<K>,
        workers: usize,
        capacity: usize,
    ) -> Result<Self, PoolError>
    where
        S: CheckpointStore + 'static,
        H: FlowHost + 'static,
        K: OutboundSink + 'static,
    {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let cancel = CancellationToken::new();
        let mut join_set = JoinSet::new();
        let mut mailboxes = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            mailboxes.push(tx);
            join_set.spawn(worker_loop(
                index,
                Arc::clone(&runner),
                Arc::clone(&sink),
                rx,
                cancel.clone(),
            ));
        }

        tracing::info!(workers, capacity, "flow worker pool started");
        Ok(Self {
            mailboxes,
            workers: join_set,
            cancel,
        })
    }

    /// Index of the worker that owns `flow_id`.
    pub fn worker_for(&self, flow_id: &FlowId) -> usize {
        partition(flow_id, self.mailboxes.len())
    }

    pub fn worker_count(&self) -> usize {
        self.mailboxes.len()
    }

    /// Queue an event on its flow's worker, waiting while the mailbox is full.
    pub async fn submit(&self, event: InboundEvent) -> Result<EventReceipt, PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let mailbox = self
            .mailboxes
            .get(self.worker_for(&event.flow_id))
            .ok_or(PoolError::Closed)?;

        let (reply, receipt) = oneshot::channel();
        let flow_id = event.flow_id.clone();
        mailbox
            .send(Job { event, reply })
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(EventReceipt {
            flow_id,
            reply: receipt,
        })
    }

    /// Token that stops every worker after its current event when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop workers without draining their mailboxes. Receipts of events
    /// still queued resolve to `PoolError::Closed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Close the mailboxes, let workers drain what is queued, and wait for them.
    pub async fn shutdown(mut self) {
        self.mailboxes.clear();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "flow worker terminated abnormally");
            }
        }
        tracing::info!("flow worker pool stopped");
    }
}

/// Stable mapping of a flow id onto one of `workers` partitions.
pub fn partition(flow_id: &FlowId, workers: usize) -> usize {
    if workers == 0 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    flow_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn worker_loop<S, H, K>(
    index: usize,
    runner: Arc<FlowRunner<S, H>>,
    sink: Arc<K>,
    mut mailbox: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) where
    S: CheckpointStore,
    H: FlowHost,
    K: OutboundSink,
{
    tracing::debug!(worker = index, "flow worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = mailbox.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let flow_id = job.event.flow_id.clone();
        let result = handle_event(&runner, sink.as_ref(), job.event).await;
        if job.reply.send(result).is_err() {
            tracing::trace!(worker = index, flow_id = %flow_id, "receipt dropped before completion");
        }
    }
    tracing::debug!(worker = index, "flow worker stopped");
}

/// Process one event, reprocessing from a fresh read on version conflicts,
/// then publish whatever the successful write produced.
async fn handle_event<S, H, K>(
    runner: &FlowRunner<S, H>,
    sink: &K,
    event: InboundEvent,
) -> Result<ProcessOutcome, PoolError>
where
    S: CheckpointStore,
    H: FlowHost,
    K: OutboundSink,
{
    let config = runner.config();
    let mut conflicts = 0;

    let outcome = loop {
        match runner.process(event.clone()).await {
            Ok(outcome) => break outcome,
            Err(RunnerError::Conflict { .. }) if conflicts < config.max_conflict_retries => {
                conflicts += 1;
                tracing::warn!(
                    flow_id = %event.flow_id,
                    attempt = conflicts,
                    "checkpoint conflict, reprocessing from fresh read"
                );
            }
            Err(e) => {
                tracing::error!(
                    flow_id = %event.flow_id,
                    event = event.payload.name(),
                    error = %e,
                    "event not processed, returning it to the submitter"
                );
                return Err(PoolError::Process {
                    flow_id: event.flow_id.clone(),
                    event,
                    source: e,
                });
            }
        }
    };

    publish_with_retry(sink, &outcome, config.max_publish_retries).await?;
    Ok(outcome)
}

/// Publish the outbound events of a committed write, retrying with backoff.
///
/// A retry republishes the whole batch, so a sink that failed part way
/// delivers some events twice. Consumers already discard duplicates by
/// request id and session sequence number.
async fn publish_with_retry<K: OutboundSink>(
    sink: &K,
    outcome: &ProcessOutcome,
    max_retries: u32,
) -> Result<(), PoolError> {
    if outcome.outbound.is_empty() {
        return Ok(());
    }

    let mut delay = PUBLISH_BACKOFF;
    let mut attempt = 0;
    loop {
        match sink.publish(outcome.outbound.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    flow_id = %outcome.flow_id,
                    attempt,
                    error = %e,
                    "publish failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(
                    flow_id = %outcome.flow_id,
                    events = outcome.outbound.len(),
                    error = %e,
                    "failed to publish outbound events, returning them to the submitter"
                );
                return Err(PoolError::Publish {
                    flow_id: outcome.flow_id.clone(),
                    events: outcome.outbound.clone(),
                    source: e,
                });
            }
        }
    }
}
