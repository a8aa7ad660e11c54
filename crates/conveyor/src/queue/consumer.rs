//! The queue consumer: send, listen, lease management, and per-delivery
//! execution.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::flags::{DefaultFlags, SharedFlags};
use crate::metrics::{
    DURATION_HISTOGRAM_BUCKETS, HISTOGRAM_BUCKET_TAG, NoopMetrics, SharedMetrics, names,
};
use crate::queue::rate_limit_guard::{RATE_LIMIT_FALLBACK_DELAY, RateLimitGuard};
use crate::queue::transport::{QueueTransport, ReceivedMessage};
use crate::queue::types::{
    ConsumerError, ErrorHandler, EXTRA_VISIBILITY_TIMEOUT_DELAY, HandlerError, ListenerContext,
    MAX_MESSAGE_DELAY, MAX_MESSAGE_VISIBILITY_TIMEOUT, MessageContext, MessageHandler,
    MessagePayload, QueueSettings, Result, STALE_MESSAGE_AGE_MS,
};

/// How often `stop()` polls for the loop to exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `stop()` waits before giving up.
const STOP_WAIT_CEILING: Duration = Duration::from_secs(60);

/// Log target for failures inside error handling itself. Kept separate
/// so these can be routed and filtered independently of normal queue
/// logs.
const UNSAFE_LOG_TARGET: &str = "message-error-handler-unsafe";

/// Client for a single durable queue.
///
/// Sends messages and runs the listener loop. Cheap to clone; clones
/// share the transport, handlers, and the current listener context.
///
/// # Example
///
/// ```ignore
/// use conveyor::queue::{QueueConsumer, QueueSettings};
///
/// let consumer = QueueConsumer::new(settings, transport, handler, error_handler);
/// consumer.start();
/// // ...
/// consumer.stop().await?;
/// ```
pub struct QueueConsumer<P: MessagePayload> {
    settings: Arc<QueueSettings>,
    transport: Arc<dyn QueueTransport>,
    message_handler: Arc<dyn MessageHandler<P>>,
    error_handler: Arc<dyn ErrorHandler<P>>,
    metrics: SharedMetrics,
    flags: SharedFlags,
    guard: Option<Arc<RateLimitGuard>>,
    /// Context of the currently active listener, or the last active one
    /// if the queue has been stopped. The only mutable shared state in
    /// the consumer.
    listener: Arc<Mutex<Option<Arc<ListenerContext>>>>,
}

impl<P: MessagePayload> Clone for QueueConsumer<P> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            transport: Arc::clone(&self.transport),
            message_handler: Arc::clone(&self.message_handler),
            error_handler: Arc::clone(&self.error_handler),
            metrics: Arc::clone(&self.metrics),
            flags: Arc::clone(&self.flags),
            guard: self.guard.clone(),
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<P: MessagePayload> QueueConsumer<P> {
    /// Create a consumer with no metrics backend, default flags, and no
    /// rate-limit guard.
    pub fn new(
        settings: QueueSettings,
        transport: Arc<dyn QueueTransport>,
        message_handler: Arc<dyn MessageHandler<P>>,
        error_handler: Arc<dyn ErrorHandler<P>>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            transport,
            message_handler,
            error_handler,
            metrics: Arc::new(NoopMetrics),
            flags: Arc::new(DefaultFlags),
            guard: None,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach a metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach a flag source.
    #[must_use]
    pub fn with_flags(mut self, flags: SharedFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Attach a preemptive rate-limit guard. Only queues whose handlers
    /// poll the rate-limited source carry one.
    #[must_use]
    pub fn with_rate_limit_guard(mut self, guard: Arc<RateLimitGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// The queue name this consumer serves.
    pub fn queue_name(&self) -> &str {
        &self.settings.queue_name
    }

    fn queue_tags(&self) -> [(&str, &str); 1] {
        [("queue", self.settings.queue_name.as_str())]
    }

    /// Send a message to the queue, hidden for `delay` before first
    /// delivery.
    ///
    /// Delays at or above the platform ceiling are clamped to one
    /// second below it.
    pub async fn send_message(&self, payload: &P, delay: Duration) -> Result<String> {
        let delay = if delay >= MAX_MESSAGE_DELAY {
            let clamped = MAX_MESSAGE_DELAY - Duration::from_secs(1);
            tracing::warn!(
                queue = %self.settings.queue_name,
                requested_secs = delay.as_secs(),
                clamped_secs = clamped.as_secs(),
                "Requested delay exceeds the platform maximum, clamping"
            );
            clamped
        } else {
            delay
        };

        let body = serde_json::to_string(payload)?;
        let message_id = self.transport.send(body, delay).await?;

        tracing::info!(
            queue = %self.settings.queue_name,
            delay_secs = delay.as_secs(),
            new_message_id = %message_id,
            "Added message to the queue"
        );
        self.metrics.increment(names::QUEUE_SENT, &self.queue_tags());
        Ok(message_id)
    }

    /// Start listening to the queue.
    ///
    /// Idempotent: if a listener context exists and has not been
    /// stopped, this logs and returns without creating a second receive
    /// loop. A fresh context is created otherwise; the previous one may
    /// still be draining its last delivery, which is fine - only the
    /// newest context is current.
    pub fn start(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(context) = listener.as_ref() {
            if !context.is_stopped() {
                tracing::warn!(queue = %self.settings.queue_name, "Queue is already running");
                return;
            }
        }

        let context = Arc::new(ListenerContext::new());
        *listener = Some(Arc::clone(&context));

        tracing::info!(
            queue = %self.settings.queue_name,
            queue_url = %self.settings.queue_url,
            queue_region = %self.settings.queue_region,
            listener_id = %context.listener_id,
            long_polling_interval_secs = self.settings.long_polling_interval.as_secs(),
            "Starting the queue"
        );

        let consumer = self.clone();
        tokio::spawn(async move {
            consumer.listen(context).await;
        });
    }

    /// Stop reading messages from the queue.
    ///
    /// Cooperative: the in-flight delivery (if any) finishes; the loop
    /// just never starts another iteration. Waits up to 60 seconds for
    /// the loop to observe the flag.
    pub async fn stop(&self) -> Result<()> {
        let context = {
            let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
            match listener.as_ref() {
                Some(context) if !context.is_stopped() => Arc::clone(context),
                _ => {
                    tracing::warn!(queue = %self.settings.queue_name, "Queue is already stopped");
                    return Ok(());
                }
            }
        };

        tracing::info!(
            queue = %self.settings.queue_name,
            listener_id = %context.listener_id,
            "Stopping the queue"
        );
        context.stop();

        let started = Instant::now();
        while context.is_running() {
            if started.elapsed() > STOP_WAIT_CEILING {
                return Err(ConsumerError::StopTimeout {
                    waited: STOP_WAIT_CEILING,
                });
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        tracing::info!(listener_id = %context.listener_id, "Awaited listener stop");
        Ok(())
    }

    /// Remove all messages from the queue.
    pub async fn purge_queue(&self) -> Result<()> {
        self.transport.purge().await?;
        Ok(())
    }

    /// Approximate number of messages currently on the queue.
    pub async fn message_count(&self) -> Result<usize> {
        Ok(self.transport.message_count().await?)
    }

    /// Extend or shrink a delivery's lease.
    ///
    /// Messages without a lease handle are logged and skipped. Timeouts
    /// at or above the platform ceiling are clamped to it with a
    /// warning. Transport failures are logged, never propagated.
    pub async fn change_visibility_timeout(&self, message: &ReceivedMessage, timeout: Duration) {
        let Some(receipt) = message.receipt_handle.as_deref() else {
            tracing::error!(
                message_id = %message.message_id,
                "No receipt handle in message, cannot change visibility timeout"
            );
            return;
        };

        let timeout = if timeout >= MAX_MESSAGE_VISIBILITY_TIMEOUT {
            tracing::warn!(
                requested_secs = timeout.as_secs(),
                max_secs = MAX_MESSAGE_VISIBILITY_TIMEOUT.as_secs(),
                "Attempt to set visibility timeout greater than allowed, clamping to the maximum"
            );
            MAX_MESSAGE_VISIBILITY_TIMEOUT
        } else {
            timeout
        };

        if let Err(err) = self.transport.change_visibility(receipt, timeout).await {
            tracing::error!(
                error = %err,
                message_id = %message.message_id,
                "Message visibility timeout change failed"
            );
        }
    }

    /// The receive loop for one listener context.
    ///
    /// A single cooperative loop: the stop flag is the cancellation
    /// point, checked at the top of every iteration.
    async fn listen(&self, context: Arc<ListenerContext>) {
        loop {
            if context.is_stopped() {
                context.mark_stopped();
                tracing::info!(
                    listener_id = %context.listener_id,
                    "Queue has been stopped. Not processing further messages"
                );
                return;
            }

            match self
                .transport
                .receive(self.settings.long_polling_interval)
                .await
            {
                Ok(Some(message)) => {
                    self.metrics
                        .increment(names::QUEUE_RECEIVED, &self.queue_tags());
                    self.execute_message(message).await;
                }
                Ok(None) => {
                    tracing::trace!("Nothing to process");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Error receiving message from the queue");
                    // Wait out the polling interval so a broken
                    // transport is not hammered with failing requests.
                    tokio::time::sleep(self.settings.long_polling_interval).await;
                }
            }
        }
    }

    /// Run one delivery through its full lifecycle.
    async fn execute_message(&self, message: ReceivedMessage) {
        let payload: P = match serde_json::from_str(&message.body) {
            Ok(payload) => payload,
            Err(err) => {
                // Unparseable bodies are left on the queue; the
                // transport's redrive policy disposes of them.
                tracing::error!(
                    error = %err,
                    message_id = %message.message_id,
                    "Failed to parse message body"
                );
                return;
            }
        };

        let receive_count = message.receive_count;
        let context = MessageContext {
            message,
            payload,
            receive_count,
            last_attempt: receive_count >= self.settings.max_attempts,
            execution_id: Uuid::new_v4(),
        };

        if self.flags.verbose_logging(context.payload.jira_host()) {
            tracing::debug!(
                queue = %self.settings.queue_name,
                message_id = %context.message.message_id,
                execution_id = %context.execution_id,
                receive_count,
                payload = %context.message.body,
                "Message received"
            );
        } else {
            tracing::info!(
                queue = %self.settings.queue_name,
                message_id = %context.message.message_id,
                execution_id = %context.execution_id,
                receive_count,
                "Message received"
            );
        }

        let started = Instant::now();

        if self.delete_stale_message(&context).await {
            return;
        }

        if let Some(guard) = &self.guard {
            let check = guard
                .check(
                    context.payload.jira_host(),
                    context.payload.installation_id(),
                    context.payload.app_config(),
                )
                .await;

            if check.exceed_threshold {
                // The quota is spent; keeping the message in flight
                // would just poll a throttled upstream. Reschedule an
                // equivalent payload for after the reset and drop the
                // original.
                self.reschedule_rate_limited(&context, check.reset_in)
                    .await;
                return;
            }
        }

        // Extend the lease to cover the processing deadline plus room
        // for error handling should the deadline fire.
        self.change_visibility_timeout(
            &context.message,
            self.settings.timeout + EXTRA_VISIBILITY_TIMEOUT_DELAY,
        )
        .await;

        let handler = Arc::clone(&self.message_handler);
        let handler_context = context.clone();
        let mut handler_task =
            tokio::spawn(async move { handler.handle(&handler_context).await });

        let outcome = tokio::select! {
            result = &mut handler_task => match result {
                Ok(result) => result,
                Err(join_err) => Err(HandlerError::unexpected(format!(
                    "message handler panicked: {join_err}"
                ))),
            },
            // The deadline abandons our wait on the handler, not the
            // handler's own work (it keeps running detached); the
            // failure is classified like any other.
            _ = tokio::time::sleep(self.settings.timeout) => Err(HandlerError::Timeout),
        };

        match outcome {
            Ok(()) => {
                self.send_processed_metrics(started.elapsed());
                self.delete_message(&context).await;
            }
            Err(err) => {
                self.handle_execution_error(err, &context).await;
            }
        }
    }

    /// Resend the payload annotated as rate limited, delayed until the
    /// quota reset, then delete the original message.
    async fn reschedule_rate_limited(
        &self,
        context: &MessageContext<P>,
        reset_in: Option<Duration>,
    ) {
        let mut annotated = context.payload.clone();
        annotated.mark_rate_limited();
        let delay = reset_in.unwrap_or(RATE_LIMIT_FALLBACK_DELAY);

        match self.send_message(&annotated, delay).await {
            Ok(new_message_id) => {
                self.delete_message(context).await;
                tracing::warn!(
                    new_message_id = %new_message_id,
                    deleted_message_id = %context.message.message_id,
                    delay_secs = delay.as_secs(),
                    "Preemptive rate limit threshold exceeded, rescheduled a new message and deleted the original"
                );
            }
            Err(err) => {
                // Couldn't reschedule; classify like any other failure
                // so the message is retried rather than lost.
                self.handle_execution_error(
                    HandlerError::unexpected(format!(
                        "failed to reschedule rate-limited message: {err}"
                    )),
                    context,
                )
                .await;
            }
        }
    }

    /// Drop messages that outlived their usefulness on queues where old
    /// events are worthless. Returns true when the message was pruned.
    async fn delete_stale_message(&self, context: &MessageContext<P>) -> bool {
        if !self.settings.stale_prunable {
            return false;
        }
        if !self
            .flags
            .remove_stale_messages(context.payload.jira_host())
        {
            return false;
        }
        let Some(webhook_received) = context.payload.webhook_received() else {
            return false;
        };

        let age_ms = Utc::now().timestamp_millis() - webhook_received;
        if age_ms <= STALE_MESSAGE_AGE_MS {
            return false;
        }

        if self.delete_message(context).await {
            tracing::warn!(
                deleted_message_id = %context.message.message_id,
                queue = %self.settings.queue_name,
                age_ms,
                "Deleted stale message"
            );
            true
        } else {
            tracing::error!(
                message_id = %context.message.message_id,
                queue = %self.settings.queue_name,
                "Failed to delete stale message"
            );
            false
        }
    }

    /// Acknowledge a delivery. Returns true on success; failures are
    /// logged, never propagated.
    async fn delete_message(&self, context: &MessageContext<P>) -> bool {
        tracing::debug!(message_id = %context.message.message_id, "Deleting the message");

        let Some(receipt) = context.message.receipt_handle.as_deref() else {
            tracing::error!(
                message_id = %context.message.message_id,
                "Unable to delete message, receipt handle is missing"
            );
            return false;
        };

        match self.transport.delete(receipt).await {
            Ok(()) => {
                self.metrics
                    .increment(names::QUEUE_DELETED, &self.queue_tags());
                tracing::debug!("Successfully deleted message from queue");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Error deleting message from the queue");
                false
            }
        }
    }

    /// Route a failed delivery through the error-handler pipeline and
    /// act on its decision. A failure while handling the error is
    /// caught and swallowed - it must never take the listener loop
    /// down; the message simply reappears when its lease expires.
    async fn handle_execution_error(&self, err: HandlerError, context: &MessageContext<P>) {
        tracing::warn!(
            target: UNSAFE_LOG_TARGET,
            error = %err,
            message_id = %context.message.message_id,
            receive_count = context.receive_count,
            "Failed message"
        );

        match self.error_handler.handle(&err, context).await {
            Ok(result) => {
                if result.is_failure {
                    tracing::error!(error = %err, "Error while executing queue message");
                } else {
                    tracing::warn!(
                        error = %err,
                        "Expected exception while executing queue message. Not an error, deleting the message"
                    );
                }

                if !result.is_failure {
                    tracing::info!("Deleting the message because the error is not a failure");
                    self.delete_message(context).await;
                } else if !result.retryable {
                    tracing::warn!("Deleting the message because the error is not retryable");
                    self.delete_message(context).await;
                } else if result.skip_dlq && context.last_attempt {
                    tracing::warn!(
                        "Deleting the message because it has reached the maximum amount of retries"
                    );
                    self.delete_message(context).await;
                } else if let Some(delay) = result.retry_delay {
                    tracing::info!(
                        delay_secs = delay.as_secs(),
                        "Delaying the retry via visibility timeout"
                    );
                    self.change_visibility_timeout(&context.message, delay)
                        .await;
                }
                // With no explicit delay the message stays put and the
                // transport redelivers it when the current lease
                // expires.
            }
            Err(handling_err) => {
                tracing::error!(
                    target: UNSAFE_LOG_TARGET,
                    error = %handling_err,
                    original_error = %err,
                    message_id = %context.message.message_id,
                    "Error while performing error handling on queue message"
                );
            }
        }
    }

    /// Emit completion counters and the duration histogram.
    ///
    /// The histogram goes out twice: once plain for percentile rollups,
    /// once tagged with the fixed bucket layout.
    fn send_processed_metrics(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as f64;
        let [queue_tag] = self.queue_tags();

        self.metrics
            .increment(names::QUEUE_COMPLETED, &[queue_tag]);
        self.metrics
            .histogram(names::QUEUE_DURATION, duration_ms, &[queue_tag]);
        self.metrics.histogram(
            names::QUEUE_DURATION,
            duration_ms,
            &[queue_tag, (HISTOGRAM_BUCKET_TAG, DURATION_HISTOGRAM_BUCKETS)],
        );
    }
}
