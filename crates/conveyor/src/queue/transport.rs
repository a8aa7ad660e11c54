//! Queue transport port.
//!
//! The durable queue itself is an external platform. The consumer only
//! relies on the semantics expressed here: delayed sends, long-poll
//! receives of at most one message, lease (visibility) adjustment via
//! receipt handles, and deletion as acknowledgement.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Transport-assigned unique message id.
    pub message_id: String,
    /// Serialized JSON payload.
    pub body: String,
    /// Lease handle for this delivery. A redelivery gets a fresh
    /// handle; operations with a stale handle fail.
    pub receipt_handle: Option<String>,
    /// How many times this message has been delivered, counting this
    /// one. Increments every time the lease expires unacknowledged.
    pub receive_count: u32,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be reached or returned an error.
    #[error("Queue transport error: {message}")]
    Io { message: String },

    /// The receipt handle does not correspond to an in-flight delivery.
    #[error("Receipt handle is not (or no longer) valid")]
    InvalidReceipt,
}

impl TransportError {
    /// Create an I/O error.
    #[inline]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

/// Operations the consumer needs from a durable queue.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue a message, hidden for `delay` before its first delivery.
    /// Returns the transport-assigned message id.
    async fn send(&self, body: String, delay: Duration) -> Result<String, TransportError>;

    /// Long-poll for at most one message, blocking up to `wait`.
    ///
    /// Returning at most one message is what serializes deliveries
    /// within a listener context.
    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Acknowledge and remove a delivered message.
    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError>;

    /// Reset the delivery's visibility timeout to `timeout` from now.
    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Drop every message in the queue.
    async fn purge(&self) -> Result<(), TransportError>;

    /// Approximate number of messages currently in the queue.
    async fn message_count(&self) -> Result<usize, TransportError>;
}
