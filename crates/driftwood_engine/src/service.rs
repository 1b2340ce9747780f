//! Long-lived sync service.

use crate::config::SyncConfig;
use crate::drain::{DrainReport, OutboxDrainer};
use crate::error::{SyncError, SyncResult};
use crate::feed::{ChangeFeedSubscriber, FeedStatus};
use crate::outbox::SyncOutbox;
use crate::prune::{PruneResult, PruneScheduler};
use crate::visibility::{AlwaysVisible, HostVisibility};
use driftwood_protocol::RemoteStore;
use driftwood_store::EntityStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the sync machinery of one process: outbox, drainer, pruning
/// scheduler and one change-feed subscriber per watched document.
///
/// Every component uses the store's replication filter. Construct it once
/// at startup and hand out references. After
/// [`dispose`](Self::dispose) every operation fails with
/// [`SyncError::Disposed`].
pub struct SyncService<R: RemoteStore> {
    store: Arc<EntityStore>,
    outbox: SyncOutbox,
    drainer: OutboxDrainer<R>,
    scheduler: PruneScheduler<EntityStore>,
    feeds: Vec<ChangeFeedSubscriber<R>>,
    config: SyncConfig,
    disposed: AtomicBool,
}

impl<R: RemoteStore> SyncService<R> {
    /// Creates a service for a host that is always visible.
    pub fn new(store: Arc<EntityStore>, remote: Arc<R>, config: SyncConfig) -> SyncResult<Self> {
        Self::with_visibility(store, remote, config, Arc::new(AlwaysVisible))
    }

    /// Creates a service whose scheduled pruning follows `visibility`.
    pub fn with_visibility(
        store: Arc<EntityStore>,
        remote: Arc<R>,
        config: SyncConfig,
        visibility: Arc<dyn HostVisibility>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let filter = store.filter().clone();

        let feeds = config
            .watched_documents
            .iter()
            .map(|_| {
                ChangeFeedSubscriber::new(
                    Arc::clone(&remote),
                    Arc::clone(&store) as _,
                    config.feed.clone(),
                )
                .with_filter(filter.clone())
            })
            .collect();

        Ok(Self {
            outbox: SyncOutbox::new(Arc::clone(&store)).with_filter(filter.clone()),
            drainer: OutboxDrainer::new(Arc::clone(&store), remote),
            scheduler: PruneScheduler::with_filter(
                Arc::clone(&store),
                config.prune.clone(),
                filter,
                visibility,
            ),
            store,
            feeds,
            config,
            disposed: AtomicBool::new(false),
        })
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Starts scheduled pruning and subscribes to every watched document.
    ///
    /// A subscriber that cannot start does not stop the others; the first
    /// failure is returned after all of them were tried.
    pub async fn start(&self) -> SyncResult<()> {
        self.ensure_live()?;
        self.scheduler.start();

        let mut first_error = None;
        for (feed, doc_id) in self.feeds.iter().zip(&self.config.watched_documents) {
            if let Err(err) = feed.start_listening(doc_id).await {
                warn!(%doc_id, error = %err, "change feed did not start");
                first_error.get_or_insert(err);
            }
        }
        info!(
            watched = self.feeds.len(),
            backlog = self.pending_count(),
            "sync service started"
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Stops pruning and drops every subscription. Safe to call repeatedly.
    pub fn stop(&self) {
        self.scheduler.stop();
        for feed in &self.feeds {
            feed.stop();
        }
    }

    /// Stops the service for good.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.stop();
            info!("sync service disposed");
        }
    }

    /// Returns true once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns the outbox backlog, for a "pending changes" indicator.
    pub fn pending_count(&self) -> usize {
        self.outbox.count()
    }

    /// Returns true if at least one document is watched and every
    /// subscription is live.
    pub fn is_connected(&self) -> bool {
        !self.feeds.is_empty() && self.feeds.iter().all(ChangeFeedSubscriber::is_connected)
    }

    /// Returns the status of every subscriber, in watch order.
    pub fn feed_status(&self) -> Vec<FeedStatus> {
        self.feeds.iter().map(ChangeFeedSubscriber::status).collect()
    }

    /// Runs one pruning pass now. The scheduler's guards still apply.
    pub async fn manual_prune(&self) -> SyncResult<PruneResult> {
        self.ensure_live()?;
        Ok(self.scheduler.run_now().await)
    }

    /// Restarts every subscriber, clearing their attempt counters.
    pub async fn reconnect(&self) -> SyncResult<()> {
        self.ensure_live()?;
        if self.feeds.is_empty() {
            return Err(SyncError::NotListening);
        }
        let mut first_error = None;
        for (feed, doc_id) in self.feeds.iter().zip(&self.config.watched_documents) {
            if let Err(err) = feed.start_listening(doc_id).await {
                warn!(%doc_id, error = %err, "reconnect failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Pushes the outbox once.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        self.ensure_live()?;
        self.drainer.drain_once().await
    }

    /// Returns the outbox.
    pub fn outbox(&self) -> &SyncOutbox {
        &self.outbox
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Returns the pruning scheduler.
    pub fn scheduler(&self) -> &PruneScheduler<EntityStore> {
        &self.scheduler
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl<R: RemoteStore> std::fmt::Debug for SyncService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("watched", &self.config.watched_documents)
            .field("pending", &self.pending_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
