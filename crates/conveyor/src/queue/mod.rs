//! Durable queue engine.
//!
//! An at-least-once consumer over an SQS-style transport: delayed
//! sends, single-flight long-poll listening, lease extension, failure
//! classification, and preemptive rate-limit postponement.
//!
//! # Module Structure
//!
//! - [`types`] - settings, contexts, handler contracts, platform limits
//! - [`transport`] - the queue platform port and wire-level message
//! - [`memory`] - in-process transport with faithful semantics
//! - [`consumer`] - the send/listen/execute engine
//! - [`error_handlers`] - failure classification pipeline
//! - [`rate_limit_guard`] - preemptive quota check for guarded queues
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conveyor::queue::{InMemoryQueue, QueueConsumer, QueueSettings};
//!
//! let transport = Arc::new(InMemoryQueue::new());
//! let consumer = QueueConsumer::new(settings, transport, handler, error_handler);
//! consumer.start();
//! ```

pub mod consumer;
pub mod error_handlers;
pub mod memory;
pub mod rate_limit_guard;
pub mod transport;
pub mod types;

pub use consumer::QueueConsumer;
pub use error_handlers::{MetricsErrorHandler, PlatformErrorHandler, UnknownErrorHandler};
pub use memory::InMemoryQueue;
pub use rate_limit_guard::{RATE_LIMIT_FALLBACK_DELAY, RateLimitCheck, RateLimitGuard};
pub use transport::{QueueTransport, ReceivedMessage, TransportError};
pub use types::{
    ConsumerError, DEFAULT_LONG_POLLING_INTERVAL, ErrorHandler, ErrorHandlingResult,
    EXTRA_VISIBILITY_TIMEOUT_DELAY, HandlerError, ListenerContext, MAX_MESSAGE_DELAY,
    MAX_MESSAGE_VISIBILITY_TIMEOUT, MessageContext, MessageHandler, MessagePayload, QueueSettings,
    STALE_MESSAGE_AGE_MS,
};
