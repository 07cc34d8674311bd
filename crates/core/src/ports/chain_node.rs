//! Port traits for the chain node client.
//!
//! The core never talks to a node directly. It consumes this narrow,
//! already-decoded contract; implementations live in the infrastructure
//! layer (e.g., `chainscope-substrate`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ChainResult;
use crate::models::{BlockHash, ExtrinsicHash};

/// Header announced by the new-heads subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadNotification {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Block author, if the adapter can derive it from the header.
    pub author: Option<String>,
}

/// Decoded block body.
#[derive(Debug, Clone)]
pub struct RawBlockBody {
    /// Extrinsics in block order.
    pub extrinsics: Vec<RawExtrinsic>,
}

/// Decoded extrinsic.
#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    /// Index in block.
    pub index: u32,
    /// Extrinsic hash.
    pub hash: ExtrinsicHash,
    /// Decoded pallet name.
    pub pallet: String,
    /// Decoded call name.
    pub call: String,
    /// Success flag (from `System.ExtrinsicSuccess`/`ExtrinsicFailed`).
    pub success: bool,
}

/// Current finalized head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedHead {
    pub number: u64,
    pub hash: BlockHash,
}

/// Node networking health (`system_health`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHealth {
    pub peers: u64,
    pub is_syncing: bool,
}

/// Runtime identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub spec_name: String,
    pub spec_version: u32,
}

/// Stream of head notifications. Dropping it cancels the subscription.
pub type HeadStream = Pin<Box<dyn Stream<Item = ChainResult<HeadNotification>> + Send>>;

/// Opens transports to chain nodes.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Open a transport to `endpoint`.
    ///
    /// Errors mean the transport itself could not be established.
    async fn open(&self, endpoint: &str) -> ChainResult<Arc<dyn ChainNode>>;
}

/// An open connection to one chain node.
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Chain name (`system_chain`).
    async fn chain_name(&self) -> ChainResult<String>;

    /// Node implementation name (`system_name`).
    async fn node_name(&self) -> ChainResult<String>;

    /// Node implementation version (`system_version`).
    async fn node_version(&self) -> ChainResult<String>;

    /// Raw chain properties (`system_properties`).
    async fn properties(&self) -> ChainResult<serde_json::Map<String, serde_json::Value>>;

    /// Genesis hash of the connected chain.
    async fn genesis_hash(&self) -> ChainResult<BlockHash>;

    /// Current runtime version.
    async fn runtime_version(&self) -> ChainResult<RuntimeInfo>;

    /// Subscribe to new (best) block heads.
    async fn subscribe_new_heads(&self) -> ChainResult<HeadStream>;

    /// Fetch and decode the body of the block with `hash`.
    async fn block_body(&self, hash: &BlockHash) -> ChainResult<RawBlockBody>;

    /// Current finalized head.
    async fn finalized_head(&self) -> ChainResult<FinalizedHead>;

    /// Peer count and sync status.
    async fn health(&self) -> ChainResult<NodeHealth>;

    /// Size of the current active validator set (`Session.Validators`).
    async fn validator_count(&self) -> ChainResult<u64>;

    /// Release the transport. Must be idempotent.
    async fn close(&self);
}
