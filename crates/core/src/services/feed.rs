//! Live feed - turns the head subscription into bounded block and extrinsic
//! histories.
//!
//! One worker task owns both windows. Head notifications are read from the
//! subscription, each one spawns its own body fetch, and completions come back
//! to the worker over a channel where they are applied one at a time. Readers
//! only ever see immutable [`FeedSnapshot`]s.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{ConfigError, FeedError, FeedResult, FetchError, FetchResult};
use crate::metrics::{
    FetchTimer, record_block_accepted, record_block_fetch_error, record_block_rejected,
    record_extrinsics_accepted, record_head_received,
};
use crate::models::{
    BlockSummary, ExtrinsicId, ExtrinsicOutcome, ExtrinsicSummary, FeedCounters, FeedStatus,
};
use crate::ports::{ChainNode, HeadNotification, HeadStream, RawBlockBody};
use crate::services::connection::Session;
use crate::services::registry::{Liveness, SubscriptionRegistry};
use crate::window::{Admission, RollingWindow};

/// Live feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Capacity of both the block and the extrinsic window.
    pub window_capacity: usize,
    /// Leading extrinsics taken from each accepted block.
    pub extrinsics_per_block: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            window_capacity: 10,
            extrinsics_per_block: 3,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError {
                field: "window_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Immutable view of both windows, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub blocks: Vec<BlockSummary>,
    pub extrinsics: Vec<ExtrinsicSummary>,
    pub counters: FeedCounters,
}

/// Starts live feeds over connected sessions.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    config: FeedConfig,
}

impl LiveFeed {
    pub fn new(config: FeedConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Subscribe to new heads and start aggregating.
    ///
    /// The subscription replaces any previous one registered on the session.
    #[instrument(skip_all, fields(endpoint = %session.endpoint()))]
    pub async fn start(&self, session: &Session) -> FeedResult<FeedHandle> {
        if !session.is_connected() {
            return Err(FeedError::NotConnected(session.endpoint().to_string()));
        }

        // At most one head subscription per session: the old one goes first.
        session.registry().teardown_head().await;
        let heads = session.node().subscribe_new_heads().await?;

        let liveness = Liveness::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(FeedSnapshot::default()));
        let (status_tx, status_rx) = watch::channel(FeedStatus::Running);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let worker = FeedWorker {
            node: Arc::clone(session.node()),
            registry: Arc::clone(session.registry()),
            liveness: liveness.clone(),
            extrinsics_per_block: self.config.extrinsics_per_block,
            blocks: RollingWindow::new(self.config.window_capacity),
            extrinsics: RollingWindow::new(self.config.window_capacity),
            counters: FeedCounters::default(),
            pending: HashSet::new(),
            snapshot: snapshot_tx,
            status: status_tx,
            done: done_tx,
        };

        let task = tokio::spawn(worker.run(heads, done_rx));
        let abort = task.abort_handle();
        if !session.registry().register_head(liveness.clone(), task) {
            return Err(FeedError::NotConnected(session.endpoint().to_string()));
        }

        info!(
            capacity = self.config.window_capacity,
            extrinsics_per_block = self.config.extrinsics_per_block,
            "📡 Live feed started"
        );

        Ok(FeedHandle {
            liveness,
            snapshot: snapshot_rx,
            status: status_rx,
            abort,
        })
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Reader and stop switch of a running feed.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    liveness: Liveness,
    snapshot: watch::Receiver<Arc<FeedSnapshot>>,
    status: watch::Receiver<FeedStatus>,
    abort: AbortHandle,
}

impl FeedHandle {
    /// Accepted blocks, strictly descending by number.
    pub fn recent_blocks(&self) -> Vec<BlockSummary> {
        self.snapshot.borrow().blocks.clone()
    }

    /// Accepted extrinsics, newest first.
    pub fn recent_extrinsics(&self) -> Vec<ExtrinsicSummary> {
        self.snapshot.borrow().extrinsics.clone()
    }

    pub fn snapshot(&self) -> Arc<FeedSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn counters(&self) -> FeedCounters {
        self.snapshot.borrow().counters
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<FeedSnapshot>> {
        self.snapshot.clone()
    }

    pub fn status(&self) -> FeedStatus {
        let status = self.status.borrow().clone();
        match status {
            FeedStatus::Failed { .. } => status,
            _ if !self.liveness.is_live() => FeedStatus::Stopped,
            other => other,
        }
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    /// Cancel the subscription. Fetches still in flight finish but their
    /// results are dropped. Idempotent.
    pub fn stop(&self) {
        if self.liveness.deactivate() {
            self.abort.abort();
            info!("🛑 Live feed stopped");
        }
    }

    /// Resolves once the feed has failed or been stopped.
    pub async fn wait_terminal(&self) -> FeedStatus {
        let mut status = self.status.clone();
        tokio::select! {
            _ = self.liveness.deactivated() => {}
            _ = async {
                let _ = status.wait_for(|s| matches!(s, FeedStatus::Failed { .. })).await;
            } => {}
        }
        self.status()
    }
}

// =============================================================================
// Worker
// =============================================================================

struct FetchCompletion {
    head: HeadNotification,
    observed_at: DateTime<Utc>,
    result: FetchResult<RawBlockBody>,
}

/// Sole owner of the windows.
struct FeedWorker {
    node: Arc<dyn ChainNode>,
    registry: Arc<SubscriptionRegistry>,
    liveness: Liveness,
    extrinsics_per_block: usize,
    blocks: RollingWindow<BlockSummary>,
    extrinsics: RollingWindow<ExtrinsicSummary>,
    counters: FeedCounters,
    /// Block numbers with a fetch in flight.
    pending: HashSet<u64>,
    snapshot: watch::Sender<Arc<FeedSnapshot>>,
    status: watch::Sender<FeedStatus>,
    done: mpsc::UnboundedSender<FetchCompletion>,
}

impl FeedWorker {
    async fn run(mut self, mut heads: HeadStream, mut done: mpsc::UnboundedReceiver<FetchCompletion>) {
        let mut heads_open = true;

        loop {
            tokio::select! {
                next = heads.next(), if heads_open => match next {
                    Some(Ok(head)) => self.on_head(head),
                    Some(Err(e)) => {
                        heads_open = false;
                        self.fail(e.to_string());
                    }
                    None => {
                        heads_open = false;
                        self.fail("head subscription ended".to_string());
                    }
                },
                Some(completion) = done.recv(), if !self.pending.is_empty() => {
                    self.apply(completion);
                }
                else => break,
            }
        }

        debug!("Feed worker finished");
    }

    fn on_head(&mut self, head: HeadNotification) {
        self.counters.heads_received += 1;
        record_head_received();
        trace!(block = head.number, hash = %head.hash.short(), "Head received");

        let rejected = if self.pending.contains(&head.number) {
            Some(Admission::Duplicate)
        } else {
            self.blocks.screen(&head.number, &head.number)
        };
        if let Some(rejected) = rejected {
            debug!(block = head.number, reason = rejected.label(), "Head ignored");
            record_block_rejected(rejected.label());
            self.publish();
            return;
        }

        self.pending.insert(head.number);
        self.spawn_fetch(head, Utc::now());
    }

    fn spawn_fetch(&self, head: HeadNotification, observed_at: DateTime<Utc>) {
        let node = Arc::clone(&self.node);
        let registry = Arc::clone(&self.registry);
        let liveness = self.liveness.clone();
        let done = self.done.clone();

        tokio::spawn(async move {
            let Some(_ticket) =
                registry.register_fetch(format!("block:{}", head.number), liveness.clone())
            else {
                return;
            };

            let timer = FetchTimer::new();
            let result = node
                .block_body(&head.hash)
                .await
                .map_err(|e| FetchError::from_chain(head.number, e));
            drop(timer);

            if !liveness.is_live() {
                trace!(block = head.number, "Dropping late fetch result");
                return;
            }
            let _ = done.send(FetchCompletion {
                head,
                observed_at,
                result,
            });
        });
    }

    /// Apply one completed fetch to the windows.
    fn apply(&mut self, completion: FetchCompletion) {
        let FetchCompletion {
            head,
            observed_at,
            result,
        } = completion;
        self.pending.remove(&head.number);

        if !self.liveness.is_live() {
            return;
        }

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                warn!(block = head.number, error = %e, "⚠️  Skipping block");
                record_block_fetch_error(e.kind());
                self.counters.fetch_failures += 1;
                self.publish();
                return;
            }
        };

        let extrinsic_count = u32::try_from(body.extrinsics.len()).unwrap_or(u32::MAX);
        let block = BlockSummary {
            number: head.number,
            hash: head.hash,
            extrinsic_count,
            author: head.author,
            observed_at,
        };

        match self.blocks.insert(block) {
            Admission::Inserted { evicted } => {
                record_block_accepted();
                info!(block = head.number, extrinsics = extrinsic_count, "⛓️  Block received");
                if let Some(old) = evicted {
                    trace!(block = old.number, "Block evicted");
                }
            }
            rejected => {
                debug!(block = head.number, reason = rejected.label(), "Block discarded");
                record_block_rejected(rejected.label());
                self.publish();
                return;
            }
        }

        self.counters.extrinsics_observed += body.extrinsics.len() as u64;

        let mut accepted = 0u64;
        for ext in body.extrinsics.into_iter().take(self.extrinsics_per_block) {
            let summary = ExtrinsicSummary {
                id: ExtrinsicId {
                    block_number: head.number,
                    index: ext.index,
                },
                block_number: head.number,
                hash: ext.hash,
                action: format!("{}.{}", ext.pallet, ext.call),
                outcome: if ext.success {
                    ExtrinsicOutcome::Success
                } else {
                    ExtrinsicOutcome::Failed
                },
                observed_at,
            };
            if self.extrinsics.insert(summary).is_inserted() {
                accepted += 1;
            }
        }
        record_extrinsics_accepted(accepted);

        self.publish();
    }

    fn fail(&self, reason: String) {
        if !self.liveness.is_live() {
            return;
        }
        let changed = self.status.send_if_modified(|status| {
            if matches!(status, FeedStatus::Failed { .. }) {
                return false;
            }
            *status = FeedStatus::Failed {
                reason: reason.clone(),
            };
            true
        });
        if changed {
            warn!(reason = %reason, "❌ Head subscription lost");
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(Arc::new(FeedSnapshot {
            blocks: self.blocks.to_vec(),
            extrinsics: self.extrinsics.to_vec(),
            counters: self.counters,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::{ConnectionConfig, ConnectionManager};
    use crate::testing::{MockConnector, MockNode, eventually};
    use std::time::Duration;

    async fn connected() -> (Session, Arc<MockNode>, ConnectionManager) {
        let connector = Arc::new(MockConnector::new());
        let manager = ConnectionManager::new(connector.clone(), ConnectionConfig::default());
        let session = manager.connect("ws://node.test:9944").await.unwrap();
        let node = connector.last_node().unwrap();
        (session, node, manager)
    }

    fn feed(window_capacity: usize) -> LiveFeed {
        LiveFeed::new(FeedConfig {
            window_capacity,
            extrinsics_per_block: 3,
        })
        .unwrap()
    }

    async fn wait_until(handle: &FeedHandle, pred: impl Fn(&FeedSnapshot) -> bool) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(&**s)))
            .await
            .expect("feed did not reach expected state")
            .expect("feed snapshot channel closed");
    }

    fn numbers(handle: &FeedHandle) -> Vec<u64> {
        handle.recent_blocks().iter().map(|b| b.number).collect()
    }

    // Test critique: 6 résolu après 7 ne réordonne jamais la fenêtre
    #[tokio::test]
    async fn test_late_completion_is_inserted_in_order() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        let gate = node.gate_block(6);
        node.push_head(5);
        node.push_head(7);
        node.push_head(6);
        wait_until(&handle, |s| s.blocks.len() == 2).await;
        assert_eq!(numbers(&handle), vec![7, 5]);

        gate.send(()).unwrap();
        wait_until(&handle, |s| s.blocks.len() == 3).await;
        assert_eq!(numbers(&handle), vec![7, 6, 5]);
    }

    #[tokio::test]
    async fn test_duplicate_head_leaves_window_unchanged() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        node.push_head(5);
        wait_until(&handle, |s| s.blocks.len() == 1).await;
        let before = handle.recent_blocks();

        node.push_head(5);
        wait_until(&handle, |s| s.counters.heads_received == 2).await;

        assert_eq!(handle.recent_blocks(), before);
        assert_eq!(node.body_requests(5), 1);
    }

    #[tokio::test]
    async fn test_window_keeps_highest_blocks() {
        let (session, node, _manager) = connected().await;
        let handle = feed(3).start(&session).await.unwrap();

        for n in 1..=4 {
            node.push_head(n);
        }
        wait_until(&handle, |s| {
            s.blocks.iter().map(|b| b.number).collect::<Vec<_>>() == vec![4, 3, 2]
        })
        .await;

        let snapshot = handle.snapshot();
        assert!(snapshot.blocks.len() <= 3);
        assert!(snapshot.extrinsics.len() <= 3);
    }

    #[tokio::test]
    async fn test_extrinsics_take_leading_calls() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        node.push_head(8);
        wait_until(&handle, |s| s.blocks.len() == 1).await;

        let extrinsics = handle.recent_extrinsics();
        let ids: Vec<String> = extrinsics.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["8-2", "8-1", "8-0"]);
        assert_eq!(extrinsics[2].action, "Timestamp.set");
        assert_eq!(extrinsics[0].outcome, ExtrinsicOutcome::Failed);
        assert!(extrinsics.iter().all(|e| e.block_number == 8));

        let block = &handle.recent_blocks()[0];
        assert_eq!(block.extrinsic_count, 4);
        assert_eq!(handle.counters().extrinsics_observed, 4);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_skipped() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        node.fail_body(6);
        for n in 5..=7 {
            node.push_head(n);
        }
        wait_until(&handle, |s| s.blocks.len() == 2 && s.counters.fetch_failures == 1).await;

        assert_eq!(numbers(&handle), vec![7, 5]);
        assert_eq!(handle.status(), FeedStatus::Running);
    }

    // Test critique: après stop, un résultat tardif n'apparaît jamais
    #[tokio::test]
    async fn test_stop_drops_late_results() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        let gate = node.gate_block(9);
        node.push_head(9);
        let registry = Arc::clone(session.registry());
        eventually(|| registry.in_flight() == vec!["block:9".to_string()]).await;

        handle.stop();
        handle.stop();
        let _ = gate.send(());

        eventually(|| registry.in_flight().is_empty()).await;
        assert!(handle.recent_blocks().is_empty());
        assert_eq!(handle.status(), FeedStatus::Stopped);
        eventually(|| node.head_subscribers() == 0).await;
    }

    #[tokio::test]
    async fn test_subscription_end_fails_feed_once() {
        let (session, node, _manager) = connected().await;
        let handle = feed(10).start(&session).await.unwrap();

        node.push_head(1);
        wait_until(&handle, |s| s.blocks.len() == 1).await;
        node.end_heads();

        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait_terminal())
            .await
            .unwrap();
        assert!(matches!(status, FeedStatus::Failed { .. }));
        // Snapshot déjà publié reste lisible
        assert_eq!(numbers(&handle), vec![1]);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let (session, node, manager) = connected().await;

        node.set_subscribe_failing(true);
        let err = feed(10).start(&session).await.unwrap_err();
        assert!(matches!(err, FeedError::SubscriptionFailed(_)));

        manager.disconnect().await;
        let err = feed(10).start(&session).await.unwrap_err();
        assert!(matches!(err, FeedError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_new_feed_replaces_previous_subscription() {
        let (session, node, _manager) = connected().await;
        let first = feed(10).start(&session).await.unwrap();
        let second = feed(10).start(&session).await.unwrap();

        assert!(!first.is_live());
        assert!(second.is_live());
        // L'ancienne souscription est fermée avant l'ouverture de la nouvelle
        assert_eq!(node.live_heads_at_subscribe(), vec![0, 0]);
        assert_eq!(node.head_subscribers(), 1);

        node.push_head(3);
        wait_until(&second, |s| s.blocks.len() == 1).await;
        assert!(first.recent_blocks().is_empty());
    }

    #[test]
    fn test_config_rejects_empty_window() {
        assert!(LiveFeed::new(FeedConfig {
            window_capacity: 0,
            extrinsics_per_block: 3,
        })
        .is_err());
    }
}
