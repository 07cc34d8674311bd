//! Connection manager - owns the lifecycle of one chain session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{ChainError, ConfigError, ConnectionError, ConnectionResult};
use crate::metrics::record_connection_attempt;
use crate::models::{ChainMetadata, ChainProperties, ConnectionState};
use crate::ports::{ChainConnector, ChainNode};
use crate::services::registry::SubscriptionRegistry;

// =============================================================================
// Configuration
// =============================================================================

/// Well-known public RPC endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "wss://rpc.polkadot.io";

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on opening the transport, and separately on the metadata batch.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError {
                field: "connect_timeout",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

// =============================================================================
// Session
// =============================================================================

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionInner {
    id: u64,
    endpoint: String,
    metadata: ChainMetadata,
    node: Arc<dyn ChainNode>,
    state: watch::Receiver<ConnectionState>,
    registry: Arc<SubscriptionRegistry>,
    connected_at: DateTime<Utc>,
}

/// Read-only handle to a live connection.
///
/// Cheap to clone. Only the [`ConnectionManager`] that created it can change
/// its state; feeds and pollers merely borrow it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Process-unique session identifier.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn metadata(&self) -> &ChainMetadata {
        &self.inner.metadata
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Receiver for state transitions of this session.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub(crate) fn node(&self) -> &Arc<dyn ChainNode> {
        &self.inner.node
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

struct ActiveSession {
    session: Session,
    state: watch::Sender<ConnectionState>,
}

/// Owns at most one [`Session`] at a time.
///
/// # Flow
///
/// 1. Validate the endpoint URL
/// 2. Open the transport (bounded by `connect_timeout`)
/// 3. Fetch chain metadata in one batch (bounded by `connect_timeout`)
/// 4. Publish the session as connected
///
/// Nothing is retried here. A failed attempt leaves the manager in
/// [`ConnectionState::Failed`] until the caller connects again.
pub struct ConnectionManager {
    connector: Arc<dyn ChainConnector>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    active: Mutex<Option<ActiveSession>>,
    last_error: Mutex<Option<String>>,
    /// Serializes connect/disconnect.
    op_lock: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn ChainConnector>, config: ConnectionConfig) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            state,
            active: Mutex::new(None),
            last_error: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver for connection state transitions across sessions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<Session> {
        self.active.lock().as_ref().map(|a| a.session.clone())
    }

    /// Reason of the last failed attempt.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Connect to `endpoint`.
    ///
    /// Connecting to the endpoint of the live session returns that session.
    /// Connecting elsewhere tears the live session down first.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn connect(&self, endpoint: &str) -> ConnectionResult<Session> {
        let _op = self.op_lock.lock().await;

        if let Some(session) = self.session()
            && session.endpoint() == endpoint
            && session.is_connected()
        {
            debug!(session = session.id(), "Already connected");
            return Ok(session);
        }

        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            info!(previous = %previous.session.endpoint(), "🔌 Superseding session");
            Self::teardown(previous).await;
        }

        self.state.send_replace(ConnectionState::Connecting);
        info!("📡 Connecting to node...");

        match self.establish(endpoint).await {
            Ok(active) => {
                let session = active.session.clone();
                *self.active.lock() = Some(active);
                *self.last_error.lock() = None;
                self.state.send_replace(ConnectionState::Connected);
                record_connection_attempt("connected");

                let metadata = session.metadata();
                info!(
                    chain = %metadata.chain_name,
                    genesis = %metadata.genesis_hash.short(),
                    runtime = metadata.runtime_version,
                    "🔗 Chain connected"
                );
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "❌ Connection failed");
                record_connection_attempt(&err.kind().to_string());
                *self.last_error.lock() = Some(err.to_string());
                self.state.send_replace(ConnectionState::Failed {
                    kind: err.kind(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Tear down the live session. Idempotent.
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;

        let active = self.active.lock().take();
        match active {
            Some(active) => {
                info!(endpoint = %active.session.endpoint(), "🔌 Disconnecting");
                Self::teardown(active).await;
            }
            None => debug!("No session to disconnect"),
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn establish(&self, endpoint: &str) -> ConnectionResult<ActiveSession> {
        validate_endpoint(endpoint)?;

        let timeout = self.config.connect_timeout;
        let node = match tokio::time::timeout(timeout, self.connector.open(endpoint)).await {
            Ok(Ok(node)) => node,
            Ok(Err(e)) => {
                return Err(ConnectionError::Unreachable {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    endpoint: endpoint.to_string(),
                    after: timeout,
                });
            }
        };
        debug!("Transport open, fetching metadata");

        let metadata = match tokio::time::timeout(timeout, fetch_metadata(node.as_ref())).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                node.close().await;
                return Err(ConnectionError::MetadataUnavailable {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                node.close().await;
                return Err(ConnectionError::Timeout {
                    endpoint: endpoint.to_string(),
                    after: timeout,
                });
            }
        };

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let session = Session {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                endpoint: endpoint.to_string(),
                metadata,
                node,
                state: state_rx,
                registry: Arc::new(SubscriptionRegistry::new()),
                connected_at: Utc::now(),
            }),
        };

        Ok(ActiveSession {
            session,
            state: state_tx,
        })
    }

    async fn teardown(active: ActiveSession) {
        active.session.registry().close();
        active.session.node().close().await;
        active.state.send_replace(ConnectionState::Disconnected);
    }
}

/// Only `ws://` and `wss://` URLs with a host are accepted.
fn validate_endpoint(endpoint: &str) -> ConnectionResult<()> {
    let unreachable = |reason: String| ConnectionError::Unreachable {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = url::Url::parse(endpoint).map_err(|e| unreachable(format!("invalid URL: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(unreachable(format!(
            "unsupported scheme '{}', expected ws or wss",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(unreachable("missing host".to_string()));
    }
    Ok(())
}

/// Fetch all static metadata in one batch. Nothing is published unless every
/// call succeeds.
async fn fetch_metadata(node: &dyn ChainNode) -> Result<ChainMetadata, ChainError> {
    let (chain_name, node_name, node_version, properties, genesis_hash, runtime) = tokio::try_join!(
        node.chain_name(),
        node.node_name(),
        node.node_version(),
        node.properties(),
        node.genesis_hash(),
        node.runtime_version(),
    )?;

    Ok(ChainMetadata {
        chain_name,
        node_name,
        node_version,
        properties: ChainProperties::from_json(&properties),
        spec_name: runtime.spec_name,
        runtime_version: runtime.spec_version,
        genesis_hash,
    })
}
