//! Core types and contracts for the queue engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::platform::{AppConfig, SinkError, SourceError};
use crate::queue::transport::{ReceivedMessage, TransportError};
use crate::store::StoreError;

/// Maximum delay before a sent message becomes visible, a hard platform
/// ceiling. Requested delays at or above this are reduced to one second
/// under it.
pub const MAX_MESSAGE_DELAY: Duration = Duration::from_secs(15 * 60);

/// Maximum visibility timeout the platform accepts.
pub const MAX_MESSAGE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60 - 1);

/// Default long-polling interval for receive calls.
pub const DEFAULT_LONG_POLLING_INTERVAL: Duration = Duration::from_secs(4);

/// Extra lease time on top of the processing timeout, leaving room for
/// error handling after a timeout fires.
pub const EXTRA_VISIBILITY_TIMEOUT_DELAY: Duration = Duration::from_secs(2);

/// Messages older than this on stale-prunable queues are dropped.
pub const STALE_MESSAGE_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Construction-time configuration of one queue consumer.
///
/// Immutable for the lifetime of the consumer.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Short queue name used in logs and metric tags.
    pub queue_name: String,
    /// Transport-level queue URL.
    pub queue_url: String,
    /// Transport-level queue region.
    pub queue_region: String,
    /// How long a receive call blocks waiting for a message.
    pub long_polling_interval: Duration,
    /// Per-delivery processing deadline.
    pub timeout: Duration,
    /// Deliveries after which `last_attempt` becomes true.
    pub max_attempts: u32,
    /// Whether messages past the staleness window are pruned unread.
    pub stale_prunable: bool,
}

impl QueueSettings {
    /// Create settings with the default long-polling interval and no
    /// stale pruning.
    pub fn new(
        queue_name: impl Into<String>,
        queue_url: impl Into<String>,
        queue_region: impl Into<String>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue_url: queue_url.into(),
            queue_region: queue_region.into(),
            long_polling_interval: DEFAULT_LONG_POLLING_INTERVAL,
            timeout,
            max_attempts,
            stale_prunable: false,
        }
    }

    /// Override the long-polling interval.
    #[must_use]
    pub fn with_long_polling_interval(mut self, interval: Duration) -> Self {
        self.long_polling_interval = interval;
        self
    }

    /// Mark this queue's messages as prunable once stale.
    #[must_use]
    pub fn with_stale_pruning(mut self) -> Self {
        self.stale_prunable = true;
        self
    }
}

/// Contract every queue payload implements.
///
/// Payloads are plain serde structs; a retry resends an equivalent
/// (possibly annotated) payload and never mutates the original message.
pub trait MessagePayload:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// The Jira site this message is destined for.
    fn jira_host(&self) -> &str;

    /// Source installation the message concerns, when known.
    fn installation_id(&self) -> Option<i64> {
        None
    }

    /// App configuration carried by the message, when known.
    fn app_config(&self) -> Option<&AppConfig> {
        None
    }

    /// Epoch milliseconds at which the originating webhook was
    /// received, when the payload carries one.
    fn webhook_received(&self) -> Option<i64> {
        None
    }

    /// Annotate this payload as having been postponed by the
    /// rate-limit guard before it is resent.
    fn mark_rate_limited(&mut self) {}
}

/// Per-delivery bundle handed to the message and error handlers.
///
/// Scoped to one `execute_message` invocation and discarded after.
#[derive(Debug, Clone)]
pub struct MessageContext<P> {
    /// The raw message as received from the transport.
    pub message: ReceivedMessage,
    /// Parsed payload.
    pub payload: P,
    /// How many times the transport has delivered this message.
    pub receive_count: u32,
    /// True iff `receive_count >= max_attempts`. Once true, no further
    /// retry may be scheduled.
    pub last_attempt: bool,
    /// Unique id for this execution, for log correlation.
    pub execution_id: Uuid,
}

/// Decision produced by the error-handler pipeline for one failed
/// delivery. Drives the only branching in failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandlingResult {
    /// Whether the delivery should be retried.
    pub retryable: bool,
    /// Whether this counts as an operational failure (vs. an expected
    /// rejection that is silently discarded).
    pub is_failure: bool,
    /// Lease extension applied before the next redelivery, when set.
    pub retry_delay: Option<Duration>,
    /// Delete instead of letting the transport's dead-letter redrive
    /// policy apply once the retry budget is exhausted.
    pub skip_dlq: bool,
}

impl ErrorHandlingResult {
    /// An expected upstream rejection; discard without alarm.
    pub fn not_a_failure() -> Self {
        Self {
            retryable: false,
            is_failure: false,
            retry_delay: None,
            skip_dlq: false,
        }
    }

    /// A real failure that retrying will not fix.
    pub fn unretryable_failure() -> Self {
        Self {
            retryable: false,
            is_failure: true,
            retry_delay: None,
            skip_dlq: false,
        }
    }

    /// A real failure worth retrying after `delay`.
    pub fn retryable_failure(delay: Duration) -> Self {
        Self {
            retryable: true,
            is_failure: true,
            retry_delay: Some(delay),
            skip_dlq: false,
        }
    }
}

/// Failure raised by a message handler.
///
/// A closed union of the ways processing can fail; the error-handler
/// pipeline matches on these variants rather than probing arbitrary
/// fields.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The source platform rejected or throttled us.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The sink platform rejected the submission.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Sync-state persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The handler exceeded the per-delivery deadline.
    #[error("Message handler timed out")]
    Timeout,

    /// Anything else.
    #[error("Unexpected handler error: {message}")]
    Unexpected { message: String },
}

impl HandlerError {
    /// Create an unexpected error from any displayable cause.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// The HTTP status this failure surfaced, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Source(err) => err.status(),
            Self::Sink(err) => err.status(),
            _ => None,
        }
    }
}

/// Handler invoked once per delivery.
#[async_trait]
pub trait MessageHandler<P>: Send + Sync {
    /// Process one delivery. Returning `Err` routes the delivery
    /// through the error-handler pipeline.
    async fn handle(&self, context: &MessageContext<P>) -> std::result::Result<(), HandlerError>;
}

/// Maps a handler failure into a retry decision.
///
/// An `Err` from the classifier itself is caught by the consumer,
/// logged, and swallowed; the message is simply left to reappear when
/// its lease expires.
#[async_trait]
pub trait ErrorHandler<P>: Send + Sync {
    /// Classify one failed delivery.
    async fn handle(
        &self,
        error: &HandlerError,
        context: &MessageContext<P>,
    ) -> std::result::Result<ErrorHandlingResult, HandlerError>;
}

#[async_trait]
impl<P, H> ErrorHandler<P> for std::sync::Arc<H>
where
    P: Send + Sync,
    H: ErrorHandler<P> + ?Sized,
{
    async fn handle(
        &self,
        error: &HandlerError,
        context: &MessageContext<P>,
    ) -> std::result::Result<ErrorHandlingResult, HandlerError> {
        (**self).handle(error, context).await
    }
}

/// State of one listener activation.
///
/// Exactly one context is "current" per `start()` call; a previous
/// context may still be draining its last delivery when a new one is
/// created during a stop/restart, and both are valid until the old loop
/// observes its stop flag.
#[derive(Debug)]
pub struct ListenerContext {
    /// Unique id of this activation, for log correlation.
    pub listener_id: Uuid,
    stopped: AtomicBool,
    listener_running: AtomicBool,
}

impl ListenerContext {
    /// Create a context for a freshly started listener.
    pub fn new() -> Self {
        Self {
            listener_id: Uuid::new_v4(),
            stopped: AtomicBool::new(false),
            listener_running: AtomicBool::new(true),
        }
    }

    /// Request the loop to stop at its next iteration boundary.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether the loop is still running (it clears this after
    /// observing the stop flag).
    pub fn is_running(&self) -> bool {
        self.listener_running.load(Ordering::Acquire)
    }

    /// Record that the loop has exited.
    pub fn mark_stopped(&self) {
        self.listener_running.store(false, Ordering::Release);
    }
}

impl Default for ListenerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the consumer's public operations.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload could not be serialized for sending.
    #[error("Failed to serialize message payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// `stop()` waited past its ceiling for the loop to exit.
    #[error("Listener didn't stop within {waited:?}")]
    StopTimeout { waited: Duration },
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_context_lifecycle() {
        let context = ListenerContext::new();
        assert!(!context.is_stopped());
        assert!(context.is_running());

        context.stop();
        assert!(context.is_stopped());
        assert!(context.is_running());

        context.mark_stopped();
        assert!(!context.is_running());
    }

    #[test]
    fn error_handling_result_constructors() {
        let discard = ErrorHandlingResult::not_a_failure();
        assert!(!discard.retryable);
        assert!(!discard.is_failure);

        let terminal = ErrorHandlingResult::unretryable_failure();
        assert!(!terminal.retryable);
        assert!(terminal.is_failure);

        let retry = ErrorHandlingResult::retryable_failure(Duration::from_secs(30));
        assert!(retry.retryable);
        assert!(retry.is_failure);
        assert_eq!(retry.retry_delay, Some(Duration::from_secs(30)));
        assert!(!retry.skip_dlq);
    }

    #[test]
    fn handler_error_status_passthrough() {
        let err = HandlerError::Sink(SinkError::api(404, "site gone"));
        assert_eq!(err.status(), Some(404));

        let err = HandlerError::Timeout;
        assert_eq!(err.status(), None);
    }

    #[test]
    fn settings_defaults() {
        let settings = QueueSettings::new(
            "backfill",
            "memory://backfill",
            "local",
            Duration::from_secs(60),
            3,
        );
        assert_eq!(settings.long_polling_interval, DEFAULT_LONG_POLLING_INTERVAL);
        assert!(!settings.stale_prunable);

        let settings = settings
            .with_long_polling_interval(Duration::from_secs(1))
            .with_stale_pruning();
        assert_eq!(settings.long_polling_interval, Duration::from_secs(1));
        assert!(settings.stale_prunable);
    }
}
