//! In-process queue transport with platform-faithful semantics.
//!
//! Implements delayed delivery, visibility timeouts, receive-count
//! bookkeeping, and receipt-handle invalidation on redelivery. Used by
//! the test suites and local single-process runs; production deploys
//! plug a real transport into the same trait.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::transport::{QueueTransport, ReceivedMessage, TransportError};

/// Granularity of the internal long-poll wait.
const POLL_GRANULARITY: Duration = Duration::from_millis(10);

/// Default lease applied on receive until the consumer extends it.
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    /// Handle of the current in-flight delivery, if any. Cleared when
    /// the lease expires and the entry becomes receivable again.
    receipt_handle: Option<String>,
}

/// An in-memory queue.
///
/// Cheap to clone; clones share the same underlying queue state.
#[derive(Clone)]
pub struct InMemoryQueue {
    entries: Arc<Mutex<Vec<Entry>>>,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    /// Create an empty queue with the default visibility timeout.
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Create an empty queue with a custom default visibility timeout.
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            visibility_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the first visible message, if any, and lease it.
    fn try_receive(&self) -> Option<ReceivedMessage> {
        let now = Instant::now();
        let mut entries = self.lock();

        let entry = entries.iter_mut().find(|e| e.visible_at <= now)?;
        entry.receive_count += 1;
        entry.visible_at = now + self.visibility_timeout;
        let receipt = Uuid::new_v4().to_string();
        entry.receipt_handle = Some(receipt.clone());

        Some(ReceivedMessage {
            message_id: entry.message_id.clone(),
            body: entry.body.clone(),
            receipt_handle: Some(receipt),
            receive_count: entry.receive_count,
        })
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, body: String, delay: Duration) -> Result<String, TransportError> {
        let message_id = Uuid::new_v4().to_string();
        let mut entries = self.lock();
        entries.push(Entry {
            message_id: message_id.clone(),
            body,
            visible_at: Instant::now() + delay,
            receive_count: 0,
            receipt_handle: None,
        });
        Ok(message_id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(message) = self.try_receive() {
                return Ok(Some(message));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_GRANULARITY).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.receipt_handle.as_deref() != Some(receipt_handle));
        if entries.len() == before {
            return Err(TransportError::InvalidReceipt);
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or(TransportError::InvalidReceipt)?;
        entry.visible_at = Instant::now() + timeout;
        Ok(())
    }

    async fn purge(&self) -> Result<(), TransportError> {
        self.lock().clear();
        Ok(())
    }

    async fn message_count(&self) -> Result<usize, TransportError> {
        Ok(self.lock().len())
    }
}
