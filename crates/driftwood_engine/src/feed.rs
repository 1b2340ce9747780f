//! Change-feed subscriber.
//!
//! Keeps one live subscription per watched document and applies incoming
//! changes to the local store. The subscription runs in a supervised task:
//!
//! ```text
//! disconnected -> connecting -> connected -> error -> reconnecting -> connected
//!                                                                 \-> disconnected
//! ```
//!
//! After `max_reconnect_attempts` consecutive failures the task gives up and
//! the subscriber stays disconnected until [`ChangeFeedSubscriber::reconnect`]
//! is called.

use crate::config::FeedConfig;
use crate::error::{SyncError, SyncResult};
use driftwood_protocol::{
    now_millis, EntityKind, FeedEvent, RemoteChange, RemoteStore, ReplicationFilter,
    Subscription, Winner,
};
use driftwood_store::{Entity, EntityStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state of a change-feed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    /// Not subscribed.
    #[default]
    Disconnected,
    /// Opening the first subscription.
    Connecting,
    /// Receiving changes.
    Connected,
    /// The subscription failed; a reconnect is scheduled.
    Error,
    /// Opening a replacement subscription.
    Reconnecting,
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStatus {
    /// Connection state.
    pub state: FeedState,
    /// Consecutive failures since the last applied change.
    pub attempts: u32,
    /// True once the reconnect bound was exceeded.
    pub exhausted: bool,
    /// Last failure, if any.
    pub last_error: Option<String>,
    /// Watched document.
    pub doc_id: Option<String>,
    /// Changes applied since the subscriber was created.
    pub applied: u64,
}

/// Destination of remote changes.
pub trait ChangeSink: Send + Sync + 'static {
    /// Applies one change and reports which side won.
    fn apply_change(&self, change: &RemoteChange) -> SyncResult<Winner>;
}

impl ChangeSink for EntityStore {
    fn apply_change(&self, change: &RemoteChange) -> SyncResult<Winner> {
        match change {
            RemoteChange::Updated(doc) => {
                let kind = self
                    .filter()
                    .kind_of(doc)
                    .ok_or_else(|| SyncError::validation(format!("{} has no known type", doc.id)))?;
                let entity = Entity::from_remote(doc, now_millis())?;
                Ok(self.apply_remote(kind, doc.rev.clone(), entity)?)
            }
            RemoteChange::Deleted { id, rev } => {
                let kind = self.filter().kind_for_id(id).or_else(|| {
                    EntityKind::ALL
                        .iter()
                        .copied()
                        .find(|k| matches!(self.get(*k, id), Ok(Some(_))))
                });
                match kind {
                    Some(kind) => Ok(self.apply_remote_delete(kind, id, rev.clone())?),
                    None => {
                        debug!(id, "deletion of unknown document ignored");
                        Ok(Winner::Remote)
                    }
                }
            }
        }
    }
}

struct Supervisor<R: RemoteStore> {
    remote: Arc<R>,
    sink: Arc<dyn ChangeSink>,
    config: FeedConfig,
    filter: ReplicationFilter,
    status: Arc<watch::Sender<FeedStatus>>,
    doc_id: String,
}

impl<R: RemoteStore> Supervisor<R> {
    async fn run(self) {
        let mut attempts: u32 = 0;
        loop {
            self.status.send_modify(|s| {
                s.state = if attempts == 0 {
                    FeedState::Connecting
                } else {
                    FeedState::Reconnecting
                };
                s.attempts = attempts;
                s.exhausted = false;
            });

            let failure = match self.remote.subscribe(&self.doc_id).await {
                Ok(subscription) => {
                    info!(doc_id = %self.doc_id, "change feed connected");
                    self.status.send_modify(|s| {
                        s.state = FeedState::Connected;
                        s.last_error = None;
                    });
                    self.pump(subscription, &mut attempts).await
                }
                Err(err) => err.to_string(),
            };

            attempts = attempts.saturating_add(1);
            if attempts > self.config.max_reconnect_attempts {
                warn!(doc_id = %self.doc_id, attempts, error = %failure, "change feed gave up");
                self.status.send_modify(|s| {
                    s.state = FeedState::Disconnected;
                    s.attempts = attempts;
                    s.exhausted = true;
                    s.last_error = Some(failure);
                });
                return;
            }

            warn!(
                doc_id = %self.doc_id,
                attempts,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                error = %failure,
                "change feed failed, reconnecting"
            );
            self.status.send_modify(|s| {
                s.state = FeedState::Error;
                s.attempts = attempts;
                s.last_error = Some(failure);
            });
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Applies events until the stream fails and returns the failure.
    async fn pump(&self, subscription: Subscription, attempts: &mut u32) -> String {
        let Subscription {
            mut events,
            handle: _handle,
        } = subscription;

        while let Some(event) = events.recv().await {
            match event {
                FeedEvent::Change(change) => {
                    if self.filter.is_internal_id(change.doc_id()) {
                        debug!(doc_id = change.doc_id(), "internal document ignored");
                        continue;
                    }
                    match self.sink.apply_change(&change) {
                        Ok(winner) => {
                            debug!(doc_id = change.doc_id(), rev = %change.rev(), ?winner, "change applied");
                            *attempts = 0;
                            self.status.send_modify(|s| {
                                s.attempts = 0;
                                s.applied += 1;
                            });
                        }
                        Err(err) => {
                            warn!(doc_id = change.doc_id(), error = %err, "change not applied");
                        }
                    }
                }
                FeedEvent::Error(err) => return err.to_string(),
                FeedEvent::Complete => return "subscription completed".to_string(),
            }
        }
        "subscription closed".to_string()
    }
}

/// Subscribes to a remote document and mirrors its changes locally.
pub struct ChangeFeedSubscriber<R: RemoteStore> {
    remote: Arc<R>,
    sink: Arc<dyn ChangeSink>,
    config: FeedConfig,
    filter: ReplicationFilter,
    status: Arc<watch::Sender<FeedStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    watched: Mutex<Option<String>>,
}

impl<R: RemoteStore> ChangeFeedSubscriber<R> {
    /// Creates a disconnected subscriber.
    pub fn new(remote: Arc<R>, sink: Arc<dyn ChangeSink>, config: FeedConfig) -> Self {
        let (status, _) = watch::channel(FeedStatus::default());
        Self {
            remote,
            sink,
            config,
            filter: ReplicationFilter::default(),
            status: Arc::new(status),
            task: Mutex::new(None),
            generation: AtomicU64::new(0),
            watched: Mutex::new(None),
        }
    }

    /// Uses `filter` to decide which documents are internal.
    #[must_use]
    pub fn with_filter(mut self, filter: ReplicationFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Waits for the transport, then subscribes to `doc_id`, replacing any
    /// previous subscription.
    ///
    /// The previous subscription is dropped before the wait. Fails with
    /// [`SyncError::StartupTimeout`] if the transport is not available
    /// within `startup_timeout`, and with [`SyncError::NotListening`] if
    /// [`stop`](Self::stop) or another start ran during the wait.
    pub async fn start_listening(&self, doc_id: &str) -> SyncResult<()> {
        if doc_id.is_empty() || self.filter.is_internal_id(doc_id) {
            return Err(SyncError::validation(format!("{doc_id:?} cannot be watched")));
        }
        let generation = {
            let mut task = self.task.lock();
            if let Some(previous) = task.take() {
                previous.abort();
                debug!("previous change feed dropped");
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        *self.watched.lock() = Some(doc_id.to_string());
        self.status.send_modify(|s| {
            s.state = FeedState::Connecting;
            s.doc_id = Some(doc_id.to_string());
            s.attempts = 0;
            s.exhausted = false;
        });

        if let Err(err) = self.wait_until_available().await {
            if self.generation.load(Ordering::SeqCst) == generation {
                self.status.send_modify(|s| {
                    s.state = FeedState::Disconnected;
                    s.last_error = Some(err.to_string());
                });
            }
            return Err(err);
        }

        let supervisor = Supervisor {
            remote: Arc::clone(&self.remote),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            filter: self.filter.clone(),
            status: Arc::clone(&self.status),
            doc_id: doc_id.to_string(),
        };
        let mut task = self.task.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(%doc_id, "start cancelled while waiting for the remote");
            return Err(SyncError::NotListening);
        }
        *task = Some(tokio::spawn(supervisor.run()));
        Ok(())
    }

    async fn wait_until_available(&self) -> SyncResult<()> {
        let started = Instant::now();
        loop {
            if self.remote.is_available() {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.config.startup_timeout {
                warn!(waited_ms = waited.as_millis() as u64, "remote not available");
                return Err(SyncError::StartupTimeout { waited });
            }
            let remaining = self.config.startup_timeout - waited;
            tokio::time::sleep(self.config.startup_poll_interval.min(remaining)).await;
        }
    }

    /// Clears the attempt counter and subscribes to the last watched
    /// document again.
    pub async fn reconnect(&self) -> SyncResult<()> {
        let doc_id = self.watched.lock().clone().ok_or(SyncError::NotListening)?;
        info!(%doc_id, "manual reconnect");
        self.start_listening(&doc_id).await
    }

    /// Drops the subscription and cancels any start still waiting for the
    /// transport. Safe to call when already stopped.
    pub fn stop(&self) {
        let mut guard = self.task.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = guard.take() {
            task.abort();
            debug!("change feed stopped");
        }
        drop(guard);
        self.status.send_modify(|s| {
            s.state = FeedState::Disconnected;
            s.exhausted = false;
        });
    }

    /// Returns true while a subscription is live.
    pub fn is_connected(&self) -> bool {
        self.status.borrow().state == FeedState::Connected
    }

    /// Returns the current status.
    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    /// Returns the watched document, if any.
    pub fn watched(&self) -> Option<String> {
        self.watched.lock().clone()
    }
}

impl<R: RemoteStore> Drop for ChangeFeedSubscriber<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl<R: RemoteStore> std::fmt::Debug for ChangeFeedSubscriber<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedSubscriber")
            .field("config", &self.config)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwood_protocol::{FilterConfig, RemoteDocument, RevisionId};
    use driftwood_remote::MemoryRemote;
    use driftwood_store::{StoreConfig, SyncStatus, Task};
    use serde_json::json;
    use std::time::Duration;

    fn remote_task(id: &str, title: &str, updated_at: i64) -> RemoteDocument {
        let body = json!({"id": id, "type": "task", "title": title, "updatedAt": updated_at});
        RemoteDocument::new(id, RevisionId::next(None, title.as_bytes()), body)
    }

    #[test]
    fn store_applies_updates_and_deletes() {
        let store = EntityStore::open_in_memory().unwrap();
        let doc = remote_task("tasks:1", "a", 10);

        let winner = store.apply_change(&RemoteChange::Updated(doc.clone())).unwrap();
        assert_eq!(winner, Winner::Remote);
        let task = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(task.meta.sync_status, SyncStatus::Synced);

        let deletion = RemoteChange::Deleted {
            id: "tasks:1".into(),
            rev: RevisionId::next(Some(&doc.rev), b"deleted"),
        };
        store.apply_change(&deletion).unwrap();
        let task = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert!(task.is_deleted());
    }

    #[test]
    fn typed_documents_outside_namespaces_are_found() {
        let store = EntityStore::open_in_memory().unwrap();
        let doc = RemoteDocument::new(
            "abc",
            RevisionId::next(None, b"x"),
            json!({"type": "task", "title": "t", "updatedAt": 1}),
        );
        store.apply_change(&doc.clone().into()).unwrap();

        let deletion = RemoteChange::Deleted {
            id: "abc".into(),
            rev: RevisionId::next(Some(&doc.rev), b"deleted"),
        };
        store.apply_change(&deletion).unwrap();
        assert!(store.get(EntityKind::Task, "abc").unwrap().unwrap().is_deleted());

        let unknown = RemoteChange::Deleted {
            id: "nope".into(),
            rev: RevisionId::next(None, b"deleted"),
        };
        assert_eq!(store.apply_change(&unknown).unwrap(), Winner::Remote);
    }

    #[test]
    fn unsynced_local_edit_survives_remote_update() {
        let store = EntityStore::open_in_memory().unwrap();
        store
            .upsert(EntityKind::Task, Entity::new("tasks:1", 100, Task::titled("local")))
            .unwrap();

        let winner = store
            .apply_change(&RemoteChange::Updated(remote_task("tasks:1", "remote", 90)))
            .unwrap();
        assert_eq!(winner, Winner::Local);
        let info = store.conflict_info(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(info.conflict_count(), 1);
    }

    fn subscriber(
        remote: &Arc<MemoryRemote>,
        store: &Arc<EntityStore>,
        config: FeedConfig,
    ) -> ChangeFeedSubscriber<MemoryRemote> {
        ChangeFeedSubscriber::new(remote.clone(), store.clone(), config)
    }

    async fn wait_for(sub: &ChangeFeedSubscriber<MemoryRemote>, check: impl Fn(&FeedStatus) -> bool) {
        let mut rx = sub.subscribe_status();
        rx.wait_for(|s| check(s)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn applies_remote_changes() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = subscriber(&remote, &store, FeedConfig::default());

        sub.start_listening("tasks:1").await.unwrap();
        wait_for(&sub, |s| s.state == FeedState::Connected).await;
        assert!(sub.is_connected());

        remote.put_revision(remote_task("tasks:1", "a", 1));
        wait_for(&sub, |s| s.applied == 1).await;
        assert!(store.get(EntityKind::Task, "tasks:1").unwrap().is_some());

        remote.delete("tasks:1").unwrap();
        wait_for(&sub, |s| s.applied == 2).await;
        assert!(store.get(EntityKind::Task, "tasks:1").unwrap().unwrap().is_deleted());

        sub.stop();
        sub.stop();
        assert!(!sub.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_times_out_when_transport_never_comes_up() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_available(false);
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = subscriber(&remote, &store, FeedConfig::default());

        let started = Instant::now();
        let err = sub.start_listening("tasks:1").await.unwrap_err();
        assert!(matches!(err, SyncError::StartupTimeout { .. }));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
        assert_eq!(sub.status().state, FeedState::Disconnected);
        assert_eq!(remote.subscribe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_waits_for_late_transport() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_available(false);
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = subscriber(&remote, &store, FeedConfig::default());

        let late = remote.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            late.set_available(true);
        });

        let started = Instant::now();
        sub.start_listening("tasks:1").await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1200) && waited < Duration::from_secs(2));
        wait_for(&sub, |s| s.state == FeedState::Connected).await;
    }

    #[tokio::test]
    async fn internal_documents_cannot_be_watched() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = subscriber(&remote, &store, FeedConfig::default());
        assert!(matches!(
            sub.start_listening("_local/state").await,
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(sub.reconnect().await, Err(SyncError::NotListening)));
    }

    #[test]
    fn store_sink_resolves_kinds_with_the_store_filter() {
        let config = StoreConfig::default().with_filter(FilterConfig {
            namespaces: vec![(EntityKind::Task, "todo/".into())],
            ..FilterConfig::default()
        });
        let store = EntityStore::open(driftwood_store::MemoryJournal::new(), config).unwrap();
        let doc = remote_task("todo/1", "a", 10);

        assert_eq!(store.apply_change(&doc.clone().into()).unwrap(), Winner::Remote);
        let deletion = RemoteChange::Deleted {
            id: "todo/1".into(),
            rev: RevisionId::next(Some(&doc.rev), b"deleted"),
        };
        store.apply_change(&deletion).unwrap();
        assert!(store.get(EntityKind::Task, "todo/1").unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn custom_internal_marker_cannot_be_watched() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let filter = ReplicationFilter::new(FilterConfig {
            local_marker: "~local/".into(),
            ..FilterConfig::default()
        });
        let sub = subscriber(&remote, &store, FeedConfig::default()).with_filter(filter);
        assert!(matches!(
            sub.start_listening("~local/state").await,
            Err(SyncError::Validation(_))
        ));
        assert_eq!(remote.subscribe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_drops_the_previous_subscription() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = subscriber(&remote, &store, FeedConfig::default());

        sub.start_listening("tasks:1").await.unwrap();
        wait_for(&sub, |s| s.state == FeedState::Connected).await;
        assert_eq!(remote.subscriber_count("tasks:1"), 1);

        remote.set_available(false);
        let err = sub.reconnect().await.unwrap_err();
        assert!(matches!(err, SyncError::StartupTimeout { .. }));
        assert_eq!(remote.subscriber_count("tasks:1"), 0);

        remote.put_revision(remote_task("tasks:1", "late", 5));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = sub.status();
        assert_eq!(status.applied, 0);
        assert_eq!(status.state, FeedState::Disconnected);
        assert!(store.get(EntityKind::Task, "tasks:1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_start_waiting_for_the_transport() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_available(false);
        let store = Arc::new(EntityStore::open_in_memory().unwrap());
        let sub = Arc::new(subscriber(&remote, &store, FeedConfig::default()));

        let starting = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.start_listening("tasks:1").await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        sub.stop();
        remote.set_available(true);

        let result = starting.await.unwrap();
        assert!(matches!(result, Err(SyncError::NotListening)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.subscribe_calls(), 0);
        assert_eq!(remote.subscriber_count("tasks:1"), 0);
        assert_eq!(sub.status().state, FeedState::Disconnected);
    }
}
