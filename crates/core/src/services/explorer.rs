//! Explorer facade - one session, one feed and one poller per endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{ConfigError, ExplorerError};
use crate::models::{
    BlockSummary, ChainMetadata, ConnectionState, ExtrinsicSummary, FeedCounters, FeedStatus,
    MetricsSnapshot,
};
use crate::ports::{ChainConnector, ExplorerView};
use crate::services::connection::{ConnectionConfig, ConnectionManager, Session};
use crate::services::feed::{FeedConfig, FeedHandle, LiveFeed};
use crate::services::poller::{MetricsPoller, PollerConfig, PollerHandle};

/// Configuration of every explorer service.
#[derive(Debug, Clone, Default)]
pub struct ExplorerConfig {
    pub connection: ConnectionConfig,
    pub feed: FeedConfig,
    pub poller: PollerConfig,
}

impl ExplorerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.feed.validate()?;
        self.poller.validate()
    }
}

struct Running {
    session: Session,
    feed: FeedHandle,
    poller: PollerHandle,
}

/// Connects to an endpoint and keeps a live feed and a metrics poller on it.
///
/// Never retries on its own. Supervisors call [`Explorer::start`] again after
/// [`Explorer::wait_feed_terminal`] reports a failure.
pub struct Explorer {
    connections: ConnectionManager,
    feed: LiveFeed,
    poller: MetricsPoller,
    running: Mutex<Option<Running>>,
}

impl Explorer {
    pub fn new(
        connector: Arc<dyn ChainConnector>,
        config: ExplorerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            connections: ConnectionManager::new(connector, config.connection),
            feed: LiveFeed::new(config.feed)?,
            poller: MetricsPoller::new(config.poller)?,
            running: Mutex::new(None),
        })
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Connect to `endpoint` and start the feed and the poller.
    ///
    /// Anything running for a previous session is stopped first; both windows
    /// start empty.
    #[instrument(skip(self))]
    pub async fn start(&self, endpoint: &str) -> Result<Session, ExplorerError> {
        self.stop_services();

        let session = self.connections.connect(endpoint).await?;

        let feed = match self.feed.start(&session).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(error = %e, "❌ Live feed could not start, disconnecting");
                self.connections.disconnect().await;
                return Err(e.into());
            }
        };
        let poller = self.poller.start(&session);

        *self.running.lock() = Some(Running {
            session: session.clone(),
            feed,
            poller,
        });

        info!(chain = %session.metadata().chain_name, "🚀 Explorer running");
        Ok(session)
    }

    /// Stop everything and disconnect. Idempotent.
    pub async fn stop(&self) {
        self.stop_services();
        self.connections.disconnect().await;
    }

    /// Resolves once the current feed fails or is stopped. `None` when
    /// nothing is running.
    pub async fn wait_feed_terminal(&self) -> Option<FeedStatus> {
        let feed = self.running.lock().as_ref().map(|r| r.feed.clone())?;
        Some(feed.wait_terminal().await)
    }

    pub fn session(&self) -> Option<Session> {
        self.running.lock().as_ref().map(|r| r.session.clone())
    }

    fn stop_services(&self) {
        if let Some(running) = self.running.lock().take() {
            running.feed.stop();
            running.poller.stop();
        }
    }

    fn with_running<T>(&self, f: impl FnOnce(&Running) -> T) -> Option<T> {
        self.running.lock().as_ref().map(f)
    }
}

impl ExplorerView for Explorer {
    fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    fn endpoint(&self) -> Option<String> {
        self.connections
            .session()
            .map(|session| session.endpoint().to_string())
    }

    fn last_error(&self) -> Option<String> {
        self.connections.last_error()
    }

    fn chain_metadata(&self) -> Option<ChainMetadata> {
        self.connections
            .session()
            .map(|session| session.metadata().clone())
    }

    fn recent_blocks(&self) -> Vec<BlockSummary> {
        self.with_running(|r| r.feed.recent_blocks())
            .unwrap_or_default()
    }

    fn recent_extrinsics(&self) -> Vec<ExtrinsicSummary> {
        self.with_running(|r| r.feed.recent_extrinsics())
            .unwrap_or_default()
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.with_running(|r| (*r.poller.snapshot()).clone())
            .unwrap_or_else(|| {
                MetricsSnapshot::empty(self.poller.config().expected_block_time_label())
            })
    }

    fn feed_status(&self) -> FeedStatus {
        self.with_running(|r| r.feed.status())
            .unwrap_or(FeedStatus::Idle)
    }

    fn feed_counters(&self) -> FeedCounters {
        self.with_running(|r| r.feed.counters())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionErrorKind, FeedError};
    use crate::testing::{MockConnector, eventually};
    use std::time::Duration;

    fn explorer(connector: &Arc<MockConnector>) -> Explorer {
        Explorer::new(connector.clone(), ExplorerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_view_before_connect() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);

        assert_eq!(explorer.connection_state(), ConnectionState::Disconnected);
        assert!(explorer.chain_metadata().is_none());
        assert!(explorer.recent_blocks().is_empty());
        assert_eq!(explorer.feed_status(), FeedStatus::Idle);

        let metrics = explorer.metrics_snapshot();
        assert_eq!(metrics.uptime_label, "n/a");
        assert_eq!(metrics.avg_block_time_label, "6.0s");
    }

    #[tokio::test]
    async fn test_start_serves_feed_and_metrics() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);

        explorer.start("ws://node.test:9944").await.unwrap();
        let node = connector.last_node().unwrap();
        node.push_head(11);

        eventually(|| explorer.recent_blocks().len() == 1).await;
        eventually(|| explorer.metrics_snapshot().last_successful_poll_at.is_some()).await;

        assert_eq!(explorer.connection_state(), ConnectionState::Connected);
        assert_eq!(explorer.endpoint().as_deref(), Some("ws://node.test:9944"));
        assert_eq!(explorer.feed_status(), FeedStatus::Running);
        assert_eq!(explorer.recent_extrinsics().len(), 3);
        assert_eq!(explorer.feed_counters().heads_received, 1);
    }

    // Test critique: la déconnexion coupe feed et poller en cascade
    #[tokio::test]
    async fn test_disconnect_cascades_to_feed_and_poller() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);
        let session = explorer.start("ws://node.test:9944").await.unwrap();
        let node = connector.last_node().unwrap();

        let (feed, poller) = explorer
            .with_running(|r| (r.feed.clone(), r.poller.clone()))
            .unwrap();

        let gate = node.gate_block(4);
        node.push_head(4);
        eventually(|| session.registry().in_flight().contains(&"block:4".to_string())).await;

        // Teardown via the manager alone, without touching the handles
        explorer.connections().disconnect().await;

        assert!(!feed.is_live());
        assert!(!poller.is_live());
        assert_eq!(feed.status(), FeedStatus::Stopped);
        assert!(node.is_closed());

        let _ = gate.send(());
        eventually(|| session.registry().in_flight().is_empty()).await;
        assert!(feed.recent_blocks().is_empty());

        let status = tokio::time::timeout(Duration::from_secs(5), feed.wait_terminal())
            .await
            .unwrap();
        assert_eq!(status, FeedStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_begins_with_empty_windows() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);

        explorer.start("ws://a.test:9944").await.unwrap();
        connector.last_node().unwrap().push_head(20);
        eventually(|| explorer.recent_blocks().len() == 1).await;

        explorer.start("ws://b.test:9944").await.unwrap();
        assert!(explorer.recent_blocks().is_empty());
        assert_eq!(connector.open_count(), 2);
        assert!(connector.nodes()[0].is_closed());
    }

    #[tokio::test]
    async fn test_feed_failure_is_reported_once() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);
        explorer.start("ws://node.test:9944").await.unwrap();

        connector.last_node().unwrap().end_heads();
        let status = tokio::time::timeout(Duration::from_secs(5), explorer.wait_feed_terminal())
            .await
            .unwrap();

        assert!(matches!(status, Some(FeedStatus::Failed { .. })));
        assert!(matches!(explorer.feed_status(), FeedStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_start_failures() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);

        let err = explorer.start("bad-endpoint").await.unwrap_err();
        assert!(matches!(
            err,
            ExplorerError::Connection(ref e) if e.kind() == ConnectionErrorKind::Unreachable
        ));
        assert!(explorer.last_error().is_some());

        connector.set_subscribe_failing(true);
        let err = explorer.start("ws://node.test:9944").await.unwrap_err();
        assert!(matches!(err, ExplorerError::Feed(FeedError::SubscriptionFailed(_))));
        assert_eq!(explorer.connection_state(), ConnectionState::Disconnected);
        assert!(connector.last_node().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let connector = Arc::new(MockConnector::new());
        let explorer = explorer(&connector);
        explorer.stop().await;

        explorer.start("ws://node.test:9944").await.unwrap();
        explorer.stop().await;
        explorer.stop().await;

        assert_eq!(explorer.connection_state(), ConnectionState::Disconnected);
        assert_eq!(explorer.feed_status(), FeedStatus::Idle);
        assert!(explorer.wait_feed_terminal().await.is_none());
    }
}
