//! Preemptive rate-limit guard.
//!
//! Before a message on a guarded queue is processed, the guard checks
//! how much of the source platform's quota the installation has already
//! burned. Past the configured threshold the message is postponed until
//! the quota resets instead of polling a throttled upstream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::flags::SharedFlags;
use crate::platform::{AppConfig, SourceClientProvider};

/// Fallback postponement when the computed reset delay is non-positive.
pub const RATE_LIMIT_FALLBACK_DELAY: Duration = Duration::from_secs(30 * 60);

/// Verdict of one preemptive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCheck {
    /// Whether quota usage is at or past the threshold.
    pub exceed_threshold: bool,
    /// How long to postpone the message, set when exceeded.
    pub reset_in: Option<Duration>,
}

impl RateLimitCheck {
    fn within_budget() -> Self {
        Self {
            exceed_threshold: false,
            reset_in: None,
        }
    }
}

/// Checks upstream quota usage before message processing.
pub struct RateLimitGuard {
    provider: Arc<dyn SourceClientProvider>,
    flags: SharedFlags,
}

impl RateLimitGuard {
    /// Create a guard fetching quota through `provider` and reading its
    /// threshold from `flags`.
    pub fn new(provider: Arc<dyn SourceClientProvider>, flags: SharedFlags) -> Self {
        Self { provider, flags }
    }

    /// Check whether the installation's quota usage exceeds the
    /// per-host threshold.
    ///
    /// Both quota buckets are considered; the delay runs to the *later*
    /// of the two resets so the still-healthy bucket is not exhausted
    /// right after the other one recovers. Fetch failures are treated
    /// as within budget (fail-open) and logged.
    pub async fn check(
        &self,
        jira_host: &str,
        installation_id: Option<i64>,
        app_config: Option<&AppConfig>,
    ) -> RateLimitCheck {
        let threshold = self.flags.preemptive_rate_limit_threshold(jira_host);

        let (Some(installation_id), Some(app_config)) = (installation_id, app_config) else {
            tracing::debug!(jira_host, "Message carries no installation, skipping quota check");
            return RateLimitCheck::within_budget();
        };

        let snapshot = match self.provider.client_for(installation_id, app_config).await {
            Ok(client) => client.rate_limit().await,
            Err(err) => Err(err),
        };

        match snapshot {
            Ok(snapshot) => {
                let used_percent = snapshot.max_used_percent();
                if used_percent < threshold {
                    return RateLimitCheck::within_budget();
                }

                let reset_in = (snapshot.latest_reset() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let reset_in = if reset_in.is_zero() {
                    RATE_LIMIT_FALLBACK_DELAY
                } else {
                    reset_in
                };

                tracing::info!(
                    jira_host,
                    used_percent,
                    threshold,
                    reset_in_secs = reset_in.as_secs(),
                    core_reset = %snapshot.core.reset_at,
                    graphql_reset = %snapshot.graphql.reset_at,
                    "Preemptive rate limit threshold exceeded"
                );

                RateLimitCheck {
                    exceed_threshold: true,
                    reset_in: Some(reset_in),
                }
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    jira_host,
                    installation_id,
                    github_app_id = ?app_config.github_app_id,
                    "Failed to fetch rate limit"
                );
                RateLimitCheck::within_budget()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use crate::flags::Flags;
    use crate::platform::{
        QuotaBucket, RateLimitSnapshot, RepositoryPage, SourceClient, SourceError, SourceResult,
    };

    struct FixedQuotaClient {
        snapshot: SourceResult<RateLimitSnapshot>,
    }

    #[async_trait]
    impl SourceClient for FixedQuotaClient {
        async fn rate_limit(&self) -> SourceResult<RateLimitSnapshot> {
            match &self.snapshot {
                Ok(snapshot) => Ok(*snapshot),
                Err(_) => Err(SourceError::network("quota endpoint unreachable")),
            }
        }

        async fn repositories_page(
            &self,
            _per_page: u32,
            _cursor: Option<&str>,
        ) -> SourceResult<RepositoryPage> {
            unimplemented!("not used by the guard")
        }
    }

    struct FixedProvider {
        snapshot: SourceResult<RateLimitSnapshot>,
    }

    #[async_trait]
    impl SourceClientProvider for FixedProvider {
        async fn client_for(
            &self,
            _installation_id: i64,
            _app_config: &AppConfig,
        ) -> SourceResult<Arc<dyn SourceClient>> {
            let snapshot = match &self.snapshot {
                Ok(snapshot) => Ok(*snapshot),
                Err(_) => Err(SourceError::network("quota endpoint unreachable")),
            };
            Ok(Arc::new(FixedQuotaClient { snapshot }))
        }
    }

    struct LowThresholdFlags;

    impl Flags for LowThresholdFlags {
        fn preemptive_rate_limit_threshold(&self, _jira_host: &str) -> f64 {
            50.0
        }
    }

    fn app_config() -> AppConfig {
        AppConfig {
            github_app_id: None,
            app_id: 7,
            client_id: "client".to_string(),
            base_url: "https://github.com".to_string(),
            api_url: "https://api.github.com".to_string(),
            uuid: None,
        }
    }

    fn snapshot(core_remaining: u64, graphql_remaining: u64) -> RateLimitSnapshot {
        let reset = Utc::now() + ChronoDuration::minutes(10);
        RateLimitSnapshot {
            core: QuotaBucket {
                limit: 100,
                remaining: core_remaining,
                reset_at: reset,
            },
            graphql: QuotaBucket {
                limit: 100,
                remaining: graphql_remaining,
                reset_at: reset + ChronoDuration::minutes(5),
            },
        }
    }

    fn guard(snapshot: SourceResult<RateLimitSnapshot>) -> RateLimitGuard {
        RateLimitGuard::new(
            Arc::new(FixedProvider { snapshot }),
            Arc::new(LowThresholdFlags),
        )
    }

    #[tokio::test]
    async fn under_threshold_is_within_budget() {
        let guard = guard(Ok(snapshot(80, 90)));
        let check = guard.check("host", Some(1), Some(&app_config())).await;
        assert!(!check.exceed_threshold);
    }

    #[tokio::test]
    async fn one_exhausted_bucket_exceeds_threshold() {
        let guard = guard(Ok(snapshot(90, 10)));
        let check = guard.check("host", Some(1), Some(&app_config())).await;
        assert!(check.exceed_threshold);
        let reset_in = check.reset_in.expect("reset delay should be set");
        // Delay runs to the later reset (core + 15 min in the fixture).
        assert!(reset_in >= Duration::from_secs(14 * 60));
    }

    #[tokio::test]
    async fn past_reset_uses_fallback_delay() {
        let reset = Utc::now() - ChronoDuration::minutes(1);
        let stale = RateLimitSnapshot {
            core: QuotaBucket {
                limit: 100,
                remaining: 0,
                reset_at: reset,
            },
            graphql: QuotaBucket {
                limit: 100,
                remaining: 100,
                reset_at: reset,
            },
        };
        let guard = guard(Ok(stale));
        let check = guard.check("host", Some(1), Some(&app_config())).await;
        assert!(check.exceed_threshold);
        assert_eq!(check.reset_in, Some(RATE_LIMIT_FALLBACK_DELAY));
    }

    #[tokio::test]
    async fn fetch_failure_fails_open() {
        let guard = guard(Err(SourceError::network("boom")));
        let check = guard.check("host", Some(1), Some(&app_config())).await;
        assert!(!check.exceed_threshold);
    }

    #[tokio::test]
    async fn missing_installation_skips_the_check() {
        let guard = guard(Ok(snapshot(0, 0)));
        let check = guard.check("host", None, None).await;
        assert!(!check.exceed_threshold);
    }
}
