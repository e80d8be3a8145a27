//! Outbound publication port.
//!
//! The engine hands every outbound event of a processing cycle to an
//! [`OutboundSink`] only after the checkpoint write for that cycle succeeded.
//! [`ChannelSink`] is the in-process implementation: a bounded mpsc channel
//! whose receiver stands in for the message bus.

use flowpoint_types::event::OutboundEvent;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("outbound channel closed")]
    Closed,

    #[error("publish failed: {0}")]
    Publish(String),
}

/// Publishes outbound events to their topics.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait OutboundSink: Send + Sync {
    /// Publish `events` in order.
    fn publish(
        &self,
        events: Vec<OutboundEvent>,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

/// Bounded mpsc-backed sink. Cloning shares the same channel.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<OutboundEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl OutboundSink for ChannelSink {
    async fn publish(&self, events: Vec<OutboundEvent>) -> Result<(), SinkError> {
        for event in events {
            tracing::trace!(topic = event.topic(), key = %event.partition_key(), "publishing");
            self.sender.send(event).await.map_err(|_| SinkError::Closed)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSink")
            .field("capacity", &self.sender.capacity())
            .finish()
    }
}
