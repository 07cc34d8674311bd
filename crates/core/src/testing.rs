//! In-memory chain node for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use crate::error::{ChainError, ChainResult};
use crate::models::{BlockHash, ExtrinsicHash};
use crate::ports::{
    ChainConnector, ChainNode, FinalizedHead, HeadNotification, HeadStream, NodeHealth,
    RawBlockBody, RawExtrinsic, RuntimeInfo,
};

/// Poll `condition` while letting other tasks run. Panics if it never holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met");
}

// =============================================================================
// Connector
// =============================================================================

#[derive(Default)]
pub struct MockConnector {
    unreachable: AtomicBool,
    hang: AtomicBool,
    metadata_failing: AtomicBool,
    subscribe_failing: AtomicBool,
    nodes: Mutex<Vec<Arc<MockNode>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    /// Never answer `open`.
    pub fn set_hang(&self, value: bool) {
        self.hang.store(value, Ordering::SeqCst);
    }

    pub fn set_metadata_failing(&self, value: bool) {
        self.metadata_failing.store(value, Ordering::SeqCst);
    }

    /// Nodes opened from now on refuse head subscriptions.
    pub fn set_subscribe_failing(&self, value: bool) {
        self.subscribe_failing.store(value, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn nodes(&self) -> Vec<Arc<MockNode>> {
        self.nodes.lock().clone()
    }

    pub fn last_node(&self) -> Option<Arc<MockNode>> {
        self.nodes.lock().last().cloned()
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn open(&self, endpoint: &str) -> ChainResult<Arc<dyn ChainNode>> {
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ChainError::ConnectionFailed(format!(
                "connection refused: {endpoint}"
            )));
        }

        let node = Arc::new(MockNode::new());
        node.state.lock().metadata_failing = self.metadata_failing.load(Ordering::SeqCst);
        node.state.lock().subscribe_failing = self.subscribe_failing.load(Ordering::SeqCst);
        self.nodes.lock().push(Arc::clone(&node));
        Ok(node)
    }
}

// =============================================================================
// Node
// =============================================================================

#[derive(Default)]
struct NodeState {
    head_senders: Vec<mpsc::UnboundedSender<ChainResult<HeadNotification>>>,
    live_heads_at_subscribe: Vec<usize>,
    subscribe_failing: bool,
    metadata_failing: bool,
    body_gates: HashMap<u64, oneshot::Receiver<()>>,
    failing_bodies: HashSet<u64>,
    body_requests: HashMap<u64, usize>,
    finalized: u64,
    peers: u64,
    validators: u64,
    validators_failing: bool,
    health_failing: bool,
    health_gate: Option<oneshot::Receiver<()>>,
}

/// Scriptable [`ChainNode`].
///
/// Every block body holds four extrinsics; the third one failed.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<NodeState>,
    health_calls: AtomicUsize,
    close_count: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic hash carrying the block number in its first bytes.
    pub fn hash_of(number: u64) -> BlockHash {
        let mut bytes = [0xab; 32];
        bytes[..8].copy_from_slice(&number.to_be_bytes());
        BlockHash(bytes)
    }

    fn number_of(hash: &BlockHash) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.0[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Announce block `number` to every open subscription.
    pub fn push_head(&self, number: u64) {
        self.send_heads(Ok(HeadNotification {
            number,
            hash: Self::hash_of(number),
            author: None,
        }));
    }

    pub fn fail_heads(&self, reason: &str) {
        self.send_heads(Err(ChainError::SubscriptionError(reason.to_string())));
    }

    fn send_heads(&self, item: ChainResult<HeadNotification>) {
        let mut state = self.state.lock();
        state.head_senders.retain(|tx| !tx.is_closed());
        for tx in &state.head_senders {
            let item = match &item {
                Ok(head) => Ok(head.clone()),
                Err(e) => Err(ChainError::SubscriptionError(e.to_string())),
            };
            let _ = tx.unbounded_send(item);
        }
    }

    /// End every open subscription.
    pub fn end_heads(&self) {
        self.state.lock().head_senders.clear();
    }

    /// Subscriptions whose stream is still held by a consumer.
    pub fn head_subscribers(&self) -> usize {
        self.state
            .lock()
            .head_senders
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Subscriptions still open at each `subscribe_new_heads` call.
    pub fn live_heads_at_subscribe(&self) -> Vec<usize> {
        self.state.lock().live_heads_at_subscribe.clone()
    }

    pub fn set_subscribe_failing(&self, value: bool) {
        self.state.lock().subscribe_failing = value;
    }

    /// Hold the body of `number` until the returned sender fires or drops.
    pub fn gate_block(&self, number: u64) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().body_gates.insert(number, rx);
        tx
    }

    pub fn fail_body(&self, number: u64) {
        self.state.lock().failing_bodies.insert(number);
    }

    pub fn body_requests(&self, number: u64) -> usize {
        self.state
            .lock()
            .body_requests
            .get(&number)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_finalized(&self, number: u64) {
        self.state.lock().finalized = number;
    }

    pub fn set_peers(&self, peers: u64) {
        self.state.lock().peers = peers;
    }

    pub fn set_validators(&self, count: u64) {
        self.state.lock().validators = count;
    }

    pub fn set_validators_failing(&self, value: bool) {
        self.state.lock().validators_failing = value;
    }

    pub fn set_health_failing(&self, value: bool) {
        self.state.lock().health_failing = value;
    }

    /// Hold the next `health` call until the returned sender fires or drops.
    pub fn gate_health(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().health_gate = Some(rx);
        tx
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn metadata<T>(&self, value: T) -> ChainResult<T> {
        if self.state.lock().metadata_failing {
            return Err(ChainError::MetadataError("state_getMetadata failed".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ChainNode for MockNode {
    async fn chain_name(&self) -> ChainResult<String> {
        self.metadata("Polkadot".to_string())
    }

    async fn node_name(&self) -> ChainResult<String> {
        self.metadata("Parity Polkadot".to_string())
    }

    async fn node_version(&self) -> ChainResult<String> {
        self.metadata("1.16.0".to_string())
    }

    async fn properties(&self) -> ChainResult<serde_json::Map<String, serde_json::Value>> {
        let raw = json!({ "tokenSymbol": "DOT", "tokenDecimals": 10, "ss58Format": 0 });
        let map = raw.as_object().cloned().unwrap_or_default();
        self.metadata(map)
    }

    async fn genesis_hash(&self) -> ChainResult<BlockHash> {
        self.metadata(Self::hash_of(0))
    }

    async fn runtime_version(&self) -> ChainResult<RuntimeInfo> {
        self.metadata(RuntimeInfo {
            spec_name: "polkadot".to_string(),
            spec_version: 1_003_000,
        })
    }

    async fn subscribe_new_heads(&self) -> ChainResult<HeadStream> {
        let mut state = self.state.lock();
        let live = state.head_senders.iter().filter(|tx| !tx.is_closed()).count();
        state.live_heads_at_subscribe.push(live);
        if state.subscribe_failing {
            return Err(ChainError::SubscriptionError(
                "chain_subscribeNewHeads rejected".into(),
            ));
        }
        let (tx, rx) = mpsc::unbounded();
        state.head_senders.push(tx);
        Ok(Box::pin(rx))
    }

    async fn block_body(&self, hash: &BlockHash) -> ChainResult<RawBlockBody> {
        let number = Self::number_of(hash);
        let gate = {
            let mut state = self.state.lock();
            *state.body_requests.entry(number).or_default() += 1;
            state.body_gates.remove(&number)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.state.lock().failing_bodies.contains(&number) {
            return Err(ChainError::BlockNotFound(hash.to_hex()));
        }

        let calls = [
            ("Timestamp", "set", true),
            ("ParaInherent", "enter", true),
            ("Balances", "transfer_keep_alive", false),
            ("Balances", "transfer_allow_death", true),
        ];
        let extrinsics = calls
            .into_iter()
            .enumerate()
            .map(|(index, (pallet, call, success))| {
                let mut bytes = hash.0;
                bytes[31] = index as u8;
                RawExtrinsic {
                    index: index as u32,
                    hash: ExtrinsicHash(bytes),
                    pallet: pallet.to_string(),
                    call: call.to_string(),
                    success,
                }
            })
            .collect();

        Ok(RawBlockBody { extrinsics })
    }

    async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
        let number = self.state.lock().finalized;
        Ok(FinalizedHead {
            number,
            hash: Self::hash_of(number),
        })
    }

    async fn health(&self) -> ChainResult<NodeHealth> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lock().health_gate.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let state = self.state.lock();
        if state.health_failing {
            return Err(ChainError::RpcError("system_health timed out".into()));
        }
        Ok(NodeHealth {
            peers: state.peers,
            is_syncing: false,
        })
    }

    async fn validator_count(&self) -> ChainResult<u64> {
        let state = self.state.lock();
        if state.validators_failing {
            return Err(ChainError::RpcError("Session.Validators unavailable".into()));
        }
        Ok(state.validators)
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.end_heads();
    }
}
