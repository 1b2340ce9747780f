//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the conflict pruning scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneConfig {
    /// Time between scheduled runs.
    pub period: Duration,
    /// Minimum time between the end of one run and the start of the next.
    pub min_interval: Duration,
    /// Losing revisions processed per run at most.
    pub max_conflicts_per_run: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60 * 60),
            min_interval: Duration::from_secs(5 * 60),
            max_conflicts_per_run: 100,
        }
    }
}

impl PruneConfig {
    /// Sets the period between scheduled runs.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the minimum interval between runs.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the per-run ceiling.
    #[must_use]
    pub fn with_max_conflicts_per_run(mut self, max: usize) -> Self {
        self.max_conflicts_per_run = max;
        self
    }
}

/// Configuration for the change-feed subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Delay before each reconnection attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Poll interval while waiting for the transport at startup.
    pub startup_poll_interval: Duration,
    /// How long to wait for the transport at startup.
    pub startup_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            startup_poll_interval: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl FeedConfig {
    /// Sets the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the reconnect attempt bound.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the startup timeout.
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

/// Configuration for a [`crate::SyncService`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Pruning scheduler settings.
    pub prune: PruneConfig,
    /// Change-feed settings.
    pub feed: FeedConfig,
    /// Documents to keep a live subscription for.
    pub watched_documents: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct RawSyncConfig {
    prune_period_ms: Option<u64>,
    min_prune_interval_ms: Option<u64>,
    max_conflicts_per_run: Option<usize>,
    reconnect_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    startup_poll_interval_ms: Option<u64>,
    startup_timeout_ms: Option<u64>,
    watched_documents: Option<Vec<String>>,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pruning configuration.
    #[must_use]
    pub fn with_prune(mut self, prune: PruneConfig) -> Self {
        self.prune = prune;
        self
    }

    /// Sets the change-feed configuration.
    #[must_use]
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    /// Adds a document to watch.
    #[must_use]
    pub fn watch(mut self, doc_id: impl Into<String>) -> Self {
        self.watched_documents.push(doc_id.into());
        self
    }

    /// Parses a JSON configuration. Durations are in milliseconds; missing
    /// fields keep their defaults.
    ///
    /// ```rust
    /// use driftwood_engine::SyncConfig;
    /// use std::time::Duration;
    ///
    /// let config = SyncConfig::from_json(r#"{"reconnectDelayMs": 1000}"#).unwrap();
    /// assert_eq!(config.feed.reconnect_delay, Duration::from_secs(1));
    /// assert_eq!(config.prune.max_conflicts_per_run, 100);
    /// ```
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let raw: RawSyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        let mut config = Self::default();
        let ms = Duration::from_millis;

        if let Some(v) = raw.prune_period_ms {
            config.prune.period = ms(v);
        }
        if let Some(v) = raw.min_prune_interval_ms {
            config.prune.min_interval = ms(v);
        }
        if let Some(v) = raw.max_conflicts_per_run {
            config.prune.max_conflicts_per_run = v;
        }
        if let Some(v) = raw.reconnect_delay_ms {
            config.feed.reconnect_delay = ms(v);
        }
        if let Some(v) = raw.max_reconnect_attempts {
            config.feed.max_reconnect_attempts = v;
        }
        if let Some(v) = raw.startup_poll_interval_ms {
            config.feed.startup_poll_interval = ms(v);
        }
        if let Some(v) = raw.startup_timeout_ms {
            config.feed.startup_timeout = ms(v);
        }
        if let Some(v) = raw.watched_documents {
            config.watched_documents = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the scheduler and subscriber cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.prune.period.is_zero() {
            return Err(SyncError::Config("prune period must be positive".into()));
        }
        if self.feed.startup_poll_interval.is_zero() {
            return Err(SyncError::Config(
                "startup poll interval must be positive".into(),
            ));
        }
        Ok(())
    }
}
