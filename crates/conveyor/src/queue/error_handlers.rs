//! Error classification for failed deliveries.
//!
//! Some upstream responses do not indicate a broken delivery at all: a
//! deleted Jira site answers 404, an uninstalled app 401. Those are
//! silently discarded. Rate-limit errors are retried with a computed
//! cooldown, and everything else falls through to exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::metrics::{SharedMetrics, names};
use crate::platform::{SinkError, SourceError, UNRETRYABLE_STATUS_CODES};
use crate::queue::types::{ErrorHandler, ErrorHandlingResult, HandlerError, MessageContext, MessagePayload};

/// Base seconds added to a rate-limit reset before redelivery.
const BASE_RATE_LIMITING_DELAY_BUFFER_SEC: i64 = 60;

/// How much the buffer shrinks per prior delivery, prioritizing older
/// messages to be replayed sooner.
const RATE_LIMITING_BUFFER_STEP: i64 = 10;

/// Exponential backoff base for unknown errors.
const EXPONENTIAL_BACKOFF_BASE_SEC: u64 = 60;

/// Exponential backoff multiplier for unknown errors.
const EXPONENTIAL_BACKOFF_MULTIPLIER: u64 = 3;

const ONE_HOUR_IN_SECONDS: i64 = 3600;

/// Backoff applied to errors nothing else claims:
/// `60s * 3^receive_count`.
fn exponential_backoff(receive_count: u32) -> Duration {
    let factor = EXPONENTIAL_BACKOFF_MULTIPLIER.saturating_pow(receive_count);
    Duration::from_secs(EXPONENTIAL_BACKOFF_BASE_SEC.saturating_mul(factor))
}

/// Fallback handler: treat the error as transient and back off
/// exponentially.
pub struct UnknownErrorHandler;

#[async_trait]
impl<P: MessagePayload> ErrorHandler<P> for UnknownErrorHandler {
    async fn handle(
        &self,
        error: &HandlerError,
        context: &MessageContext<P>,
    ) -> Result<ErrorHandlingResult, HandlerError> {
        let delay = exponential_backoff(context.receive_count);
        tracing::warn!(
            error = %error,
            delay_secs = delay.as_secs(),
            "Unknown error: retrying with exponential backoff"
        );
        Ok(ErrorHandlingResult::retryable_failure(delay))
    }
}

/// The composed classification pipeline for source/sink platform
/// errors. First matching rule wins; unknown errors fall through to
/// exponential backoff.
pub struct PlatformErrorHandler;

#[async_trait]
impl<P: MessagePayload> ErrorHandler<P> for PlatformErrorHandler {
    async fn handle(
        &self,
        error: &HandlerError,
        context: &MessageContext<P>,
    ) -> Result<ErrorHandlingResult, HandlerError> {
        tracing::warn!(error = %error, "Handling platform error");

        if let Some(result) = maybe_handle_non_failure_case(error) {
            return Ok(result);
        }
        if let Some(result) = maybe_handle_rate_limiting(error, context) {
            return Ok(result);
        }
        if let Some(result) = maybe_handle_unretryable_status(error) {
            return Ok(result);
        }

        UnknownErrorHandler.handle(error, context).await
    }
}

/// Rule 1: a sink rejection with a gone/unauthorized status is not a
/// failure at all - the destination is stale, not the delivery.
fn maybe_handle_non_failure_case(error: &HandlerError) -> Option<ErrorHandlingResult> {
    match error {
        HandlerError::Sink(SinkError::Api { status, .. })
            if UNRETRYABLE_STATUS_CODES.contains(status) =>
        {
            tracing::warn!(
                status,
                "Received unretryable status from the sink. Discarding the message"
            );
            Some(ErrorHandlingResult::not_a_failure())
        }
        _ => None,
    }
}

/// Rule 2: a source rate limit is retried once the window resets.
///
/// The buffer shrinks with the receive count so older messages replay
/// slightly sooner, and the additive hour term spreads burst traffic
/// across consecutive hourly resets instead of re-overwhelming the
/// first one.
fn maybe_handle_rate_limiting<P>(
    error: &HandlerError,
    context: &MessageContext<P>,
) -> Option<ErrorHandlingResult> {
    let HandlerError::Source(SourceError::RateLimited { reset_at }) = error else {
        return None;
    };

    tracing::warn!(reset_at = %reset_at, "Rate limiting error, retrying");

    let receive_count = i64::from(context.receive_count);
    let buffer = (BASE_RATE_LIMITING_DELAY_BUFFER_SEC - receive_count * RATE_LIMITING_BUFFER_STEP)
        .max(RATE_LIMITING_BUFFER_STEP);
    let until_reset = reset_at.timestamp() + buffer - Utc::now().timestamp();
    let delay_secs = (until_reset + ONE_HOUR_IN_SECONDS * (receive_count - 1)).max(0);

    Some(ErrorHandlingResult::retryable_failure(Duration::from_secs(
        delay_secs as u64,
    )))
}

/// Rule 3: any other error exposing a gone/unauthorized status is
/// discarded like rule 1, logged with the raw status.
fn maybe_handle_unretryable_status(error: &HandlerError) -> Option<ErrorHandlingResult> {
    let status = error.status()?;
    if !UNRETRYABLE_STATUS_CODES.contains(&status) {
        return None;
    }
    tracing::warn!(
        error = %error,
        status,
        "Received error with unretryable status. Discarding the message"
    );
    Some(ErrorHandlingResult::not_a_failure())
}

/// Decorator emitting the "failed" counter exactly once per message:
/// when the result is a failure and either retries are pointless or the
/// retry budget is spent.
pub struct MetricsErrorHandler<H> {
    delegate: H,
    name: String,
    metrics: SharedMetrics,
}

impl<H> MetricsErrorHandler<H> {
    /// Wrap `delegate`, tagging emitted metrics with `name`.
    pub fn new(delegate: H, name: impl Into<String>, metrics: SharedMetrics) -> Self {
        Self {
            delegate,
            name: name.into(),
            metrics,
        }
    }
}

#[async_trait]
impl<P, H> ErrorHandler<P> for MetricsErrorHandler<H>
where
    P: MessagePayload,
    H: ErrorHandler<P>,
{
    async fn handle(
        &self,
        error: &HandlerError,
        context: &MessageContext<P>,
    ) -> Result<ErrorHandlingResult, HandlerError> {
        let result = self.delegate.handle(error, context).await?;

        if result.is_failure && (!result.retryable || context.last_attempt) {
            tracing::error!(
                error = %error,
                handler = %self.name,
                "Message processing failed and won't be retried anymore"
            );
            self.metrics
                .increment(names::QUEUE_FAILED, &[("name", self.name.as_str())]);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use crate::metrics::MetricsSink;
    use crate::queue::transport::ReceivedMessage;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestPayload {
        jira_host: String,
    }

    impl MessagePayload for TestPayload {
        fn jira_host(&self) -> &str {
            &self.jira_host
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        counters: Mutex<Vec<String>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn increment(&self, name: &str, _tags: &[(&str, &str)]) {
            self.counters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(name.to_string());
        }

        fn histogram(&self, _name: &str, _value_ms: f64, _tags: &[(&str, &str)]) {}
    }

    fn context(receive_count: u32, max_attempts: u32) -> MessageContext<TestPayload> {
        MessageContext {
            message: ReceivedMessage {
                message_id: "m-1".to_string(),
                body: "{}".to_string(),
                receipt_handle: Some("r-1".to_string()),
                receive_count,
            },
            payload: TestPayload {
                jira_host: "https://example.atlassian.net".to_string(),
            },
            receive_count,
            last_attempt: receive_count >= max_attempts,
            execution_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn sink_gone_status_is_not_a_failure() {
        for status in [401, 403, 404] {
            let error = HandlerError::Sink(SinkError::api(status, "gone"));
            let result = PlatformErrorHandler
                .handle(&error, &context(1, 3))
                .await
                .unwrap();
            assert!(!result.is_failure, "status {status} should not be a failure");
            assert!(!result.retryable);
        }
    }

    #[tokio::test]
    async fn sink_server_error_falls_through_to_backoff() {
        let error = HandlerError::Sink(SinkError::api(500, "boom"));
        let result = PlatformErrorHandler
            .handle(&error, &context(1, 3))
            .await
            .unwrap();
        assert!(result.is_failure);
        assert!(result.retryable);
        // 60 * 3^1
        assert_eq!(result.retry_delay, Some(Duration::from_secs(180)));
    }

    #[tokio::test]
    async fn rate_limit_delay_includes_buffer_and_hourly_spread() {
        let reset_at = Utc::now() + ChronoDuration::seconds(100);
        let error = HandlerError::Source(SourceError::RateLimited { reset_at });

        // receive_count 1: buffer = 60 - 10 = 50, no hourly term.
        let result = PlatformErrorHandler
            .handle(&error, &context(1, 5))
            .await
            .unwrap();
        let delay = result.retry_delay.unwrap().as_secs() as i64;
        assert!((145..=155).contains(&delay), "delay was {delay}");

        // receive_count 3: buffer = 60 - 30 = 30, plus two hours.
        let result = PlatformErrorHandler
            .handle(&error, &context(3, 5))
            .await
            .unwrap();
        let delay = result.retry_delay.unwrap().as_secs() as i64;
        let expected = 100 + 30 + 2 * 3600;
        assert!(
            ((expected - 5)..=(expected + 5)).contains(&delay),
            "delay was {delay}"
        );
        assert!(result.retryable);
        assert!(result.is_failure);
    }

    #[tokio::test]
    async fn rate_limit_buffer_never_drops_below_step() {
        let reset_at = Utc::now();
        let error = HandlerError::Source(SourceError::RateLimited { reset_at });

        // receive_count 8 would make the buffer negative without the floor.
        let result = PlatformErrorHandler
            .handle(&error, &context(8, 10))
            .await
            .unwrap();
        let delay = result.retry_delay.unwrap().as_secs() as i64;
        let expected = 10 + 7 * 3600;
        assert!(
            ((expected - 5)..=(expected + 5)).contains(&delay),
            "delay was {delay}"
        );
    }

    #[tokio::test]
    async fn source_not_found_is_discarded_with_status_logged() {
        let error = HandlerError::Source(SourceError::api(404, "repo gone"));
        let result = PlatformErrorHandler
            .handle(&error, &context(1, 3))
            .await
            .unwrap();
        assert!(!result.is_failure);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn timeout_gets_exponential_backoff() {
        let result = PlatformErrorHandler
            .handle(&HandlerError::Timeout, &context(2, 5))
            .await
            .unwrap();
        assert!(result.retryable);
        // 60 * 3^2
        assert_eq!(result.retry_delay, Some(Duration::from_secs(540)));
    }

    #[tokio::test]
    async fn unknown_handler_backoff_grows_with_receive_count() {
        let first = UnknownErrorHandler
            .handle(&HandlerError::unexpected("boom"), &context(1, 5))
            .await
            .unwrap();
        let third = UnknownErrorHandler
            .handle(&HandlerError::unexpected("boom"), &context(3, 5))
            .await
            .unwrap();
        assert_eq!(first.retry_delay, Some(Duration::from_secs(180)));
        assert_eq!(third.retry_delay, Some(Duration::from_secs(1620)));
    }

    #[tokio::test]
    async fn metrics_wrapper_skips_non_failures() {
        let metrics = Arc::new(RecordingMetrics::default());
        let handler =
            MetricsErrorHandler::new(PlatformErrorHandler, "backfill", metrics.clone());

        let error = HandlerError::Sink(SinkError::api(404, "gone"));
        handler.handle(&error, &context(1, 3)).await.unwrap();

        assert!(metrics.counters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_wrapper_skips_retryable_non_final_attempts() {
        let metrics = Arc::new(RecordingMetrics::default());
        let handler =
            MetricsErrorHandler::new(PlatformErrorHandler, "backfill", metrics.clone());

        handler
            .handle(&HandlerError::unexpected("boom"), &context(1, 3))
            .await
            .unwrap();

        assert!(metrics.counters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_wrapper_emits_failed_on_last_attempt() {
        let metrics = Arc::new(RecordingMetrics::default());
        let handler =
            MetricsErrorHandler::new(PlatformErrorHandler, "backfill", metrics.clone());

        handler
            .handle(&HandlerError::unexpected("boom"), &context(3, 3))
            .await
            .unwrap();

        let counters = metrics.counters.lock().unwrap();
        assert_eq!(counters.as_slice(), [names::QUEUE_FAILED]);
    }
}
