//! Per-host feature flag lookups.
//!
//! The flag service is an external collaborator; the core asks it a
//! handful of questions, always keyed by the recipient Jira host, and
//! falls back to the defaults below when no override exists.

use std::sync::Arc;

use chrono::Duration;

/// Flag lookups the queue engine and orchestrator consult.
///
/// Default methods encode the built-in behavior; implementations
/// override whichever lookups their flag service actually serves.
pub trait Flags: Send + Sync {
    /// Whether stale messages on targeted queues should be pruned.
    fn remove_stale_messages(&self, _jira_host: &str) -> bool {
        true
    }

    /// Quota usage percentage above which the preemptive rate-limit
    /// guard postpones messages. 100 disables the guard in practice.
    fn preemptive_rate_limit_threshold(&self, _jira_host: &str) -> f64 {
        100.0
    }

    /// Lookback window for main-branch commits when no explicit
    /// since-date is requested. `None` means no cutoff.
    fn main_commit_lookback(&self, _jira_host: &str) -> Option<Duration> {
        None
    }

    /// Lookback window for non-main-branch commits when no explicit
    /// since-date is requested. `None` means no cutoff.
    fn branch_commit_lookback(&self, _jira_host: &str) -> Option<Duration> {
        None
    }

    /// Whether deliveries for this host log at debug verbosity.
    fn verbose_logging(&self, _jira_host: &str) -> bool {
        false
    }
}

/// Built-in defaults with no external flag service.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFlags;

impl Flags for DefaultFlags {}

/// Shared handle to a flag source.
pub type SharedFlags = Arc<dyn Flags>;
