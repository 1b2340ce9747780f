//! Conflict pruning scheduler.
//!
//! A run scans every syncable document for losing revisions and deletes them
//! one by one, leaving only the winner. Runs are single-flight and rate
//! limited: a request while a run is in flight, or before `min_interval` has
//! passed since the last one finished, returns a skipped [`PruneResult`]
//! without touching the source.

use crate::config::PruneConfig;
use crate::visibility::{AlwaysVisible, HostVisibility};
use driftwood_protocol::{RemoteError, ReplicationFilter, RevisionId, RevisionSource};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Phase of the pruning scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneState {
    /// No run in flight.
    #[default]
    Idle,
    /// Looking for documents with losing revisions.
    Scanning,
    /// Deleting losing revisions.
    Pruning,
}

impl PruneState {
    /// Returns true while a run is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(self, PruneState::Idle)
    }
}

/// Why a run did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run was in flight.
    AlreadyRunning,
    /// The previous run finished less than `min_interval` ago.
    TooSoon,
    /// The host was in the background at a scheduled tick.
    Hidden,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::AlreadyRunning => "already running",
            SkipReason::TooSoon => "too soon",
            SkipReason::Hidden => "host hidden",
        })
    }
}

/// A failure recorded during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneError {
    /// Document the failure belongs to; `None` for scan failures.
    pub doc_id: Option<String>,
    /// Revision whose deletion failed.
    pub rev: Option<RevisionId>,
    /// What went wrong.
    pub error: RemoteError,
}

impl fmt::Display for PruneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.doc_id, &self.rev) {
            (Some(doc_id), Some(rev)) => write!(f, "{doc_id}@{rev}: {}", self.error),
            _ => write!(f, "scan: {}", self.error),
        }
    }
}

/// Outcome of one run. A run never fails; problems end up in `errors`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneResult {
    /// Syncable documents inspected.
    pub documents_checked: usize,
    /// Losing revisions found.
    pub conflicts_found: usize,
    /// Losing revisions deleted.
    pub conflicts_pruned: usize,
    /// Losing revisions that were already gone.
    pub already_resolved: usize,
    /// Losing revisions left for a later run because of the per-run ceiling.
    pub deferred: usize,
    /// Failures; none of them aborted the run.
    pub errors: Vec<PruneError>,
    /// Wall time of the run.
    pub duration: Duration,
    /// Set when the run did not happen.
    pub skipped: Option<SkipReason>,
}

impl PruneResult {
    /// Creates the result of a run that did not happen.
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    /// Returns true if the run did not happen.
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

struct Inner<S: RevisionSource> {
    source: Arc<S>,
    filter: ReplicationFilter,
    config: PruneConfig,
    visibility: Arc<dyn HostVisibility>,
    state: Mutex<PruneState>,
    last_finished: Mutex<Option<Instant>>,
    last_result: Mutex<Option<PruneResult>>,
}

/// Resets the scheduler to `Idle` when a run ends, however it ends.
struct RunGuard<'a, S: RevisionSource> {
    inner: &'a Inner<S>,
}

impl<S: RevisionSource> Drop for RunGuard<'_, S> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        *self.inner.last_finished.lock() = Some(Instant::now());
        *state = PruneState::Idle;
    }
}

impl<S: RevisionSource> Inner<S> {
    fn begin(&self) -> Result<RunGuard<'_, S>, SkipReason> {
        let mut state = self.state.lock();
        if state.is_active() {
            return Err(SkipReason::AlreadyRunning);
        }
        if let Some(finished) = *self.last_finished.lock() {
            if finished.elapsed() < self.config.min_interval {
                return Err(SkipReason::TooSoon);
            }
        }
        *state = PruneState::Scanning;
        Ok(RunGuard { inner: self })
    }

    async fn run(&self) -> PruneResult {
        let guard = match self.begin() {
            Ok(guard) => guard,
            Err(reason) => {
                debug!(%reason, "prune run skipped");
                return PruneResult::skipped(reason);
            }
        };

        let result = self.execute().await;
        drop(guard);

        if result.errors.is_empty() {
            info!(
                checked = result.documents_checked,
                found = result.conflicts_found,
                pruned = result.conflicts_pruned,
                deferred = result.deferred,
                elapsed_ms = result.duration.as_millis() as u64,
                "prune run finished"
            );
        } else {
            warn!(
                found = result.conflicts_found,
                pruned = result.conflicts_pruned,
                errors = result.errors.len(),
                "prune run finished with errors"
            );
        }
        *self.last_result.lock() = Some(result.clone());
        result
    }

    async fn execute(&self) -> PruneResult {
        let started = Instant::now();
        let mut result = PruneResult::default();

        let report = match self.source.scan_conflicts(&self.filter).await {
            Ok(report) => report,
            Err(error) => {
                result.errors.push(PruneError {
                    doc_id: None,
                    rev: None,
                    error,
                });
                result.duration = started.elapsed();
                return result;
            }
        };
        result.documents_checked = report.documents_checked;

        // The source already filters; internal documents must never be
        // touched even if it does not.
        let candidates = self.filter.filter_syncable(report.candidates);
        result.conflicts_found = candidates.iter().map(|c| c.info.conflict_count()).sum();

        *self.state.lock() = PruneState::Pruning;
        let mut budget = self.config.max_conflicts_per_run;
        for candidate in &candidates {
            for target in candidate.info.prune_targets() {
                if budget == 0 {
                    result.deferred += 1;
                    continue;
                }
                budget -= 1;

                match self.source.remove_revision(&target).await {
                    Ok(()) => result.conflicts_pruned += 1,
                    Err(error) if error.is_missing_revision() => {
                        debug!(doc = target.doc_id(), rev = %target.rev(), "already resolved");
                        result.already_resolved += 1;
                    }
                    Err(error) => {
                        warn!(doc = target.doc_id(), rev = %target.rev(), %error, "prune failed");
                        result.errors.push(PruneError {
                            doc_id: Some(target.doc_id().to_string()),
                            rev: Some(target.rev().clone()),
                            error,
                        });
                    }
                }
            }
        }

        result.duration = started.elapsed();
        result
    }

    async fn tick(&self) -> PruneResult {
        if !self.visibility.is_visible() {
            debug!("host hidden, prune tick skipped");
            return PruneResult::skipped(SkipReason::Hidden);
        }
        self.run().await
    }
}

/// Periodically prunes losing revisions from a [`RevisionSource`].
pub struct PruneScheduler<S: RevisionSource> {
    inner: Arc<Inner<S>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RevisionSource> PruneScheduler<S> {
    /// Creates a scheduler for a host that is always visible.
    pub fn new(source: Arc<S>, config: PruneConfig) -> Self {
        Self::with_visibility(source, config, Arc::new(AlwaysVisible))
    }

    /// Creates a scheduler that skips scheduled runs while `visibility`
    /// reports the host hidden.
    pub fn with_visibility(
        source: Arc<S>,
        config: PruneConfig,
        visibility: Arc<dyn HostVisibility>,
    ) -> Self {
        Self::with_filter(source, config, ReplicationFilter::default(), visibility)
    }

    /// Creates a scheduler that scans with `filter`. Pass the filter the
    /// rest of the sync machinery uses so every component agrees on which
    /// documents are internal.
    pub fn with_filter(
        source: Arc<S>,
        config: PruneConfig,
        filter: ReplicationFilter,
        visibility: Arc<dyn HostVisibility>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                filter,
                config,
                visibility,
                state: Mutex::new(PruneState::Idle),
                last_finished: Mutex::new(None),
                last_result: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PruneConfig {
        &self.inner.config
    }

    /// Returns the filter scans run with.
    pub fn filter(&self) -> &ReplicationFilter {
        &self.inner.filter
    }

    /// Runs one pass now, regardless of host visibility. Both the
    /// single-flight and the minimum-interval guard apply.
    pub async fn run_now(&self) -> PruneResult {
        self.inner.run().await
    }

    /// Runs one scheduled pass: skipped while the host is hidden.
    pub async fn tick(&self) -> PruneResult {
        self.inner.tick().await
    }

    /// Starts the periodic task. The first run happens immediately. Returns
    /// false if the task is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.config.period.max(Duration::from_millis(1));
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.tick().await;
            }
        }));
        info!(period_secs = period.as_secs(), "prune scheduler started");
        true
    }

    /// Stops the periodic task. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("prune scheduler stopped");
        }
    }

    /// Returns true while the periodic task is running.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Returns the current phase.
    pub fn state(&self) -> PruneState {
        *self.inner.state.lock()
    }

    /// Returns the result of the last run that happened.
    pub fn last_result(&self) -> Option<PruneResult> {
        self.inner.last_result.lock().clone()
    }
}

impl<S: RevisionSource> Drop for PruneScheduler<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl<S: RevisionSource> fmt::Debug for PruneScheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PruneScheduler")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
