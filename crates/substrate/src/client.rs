//! Substrate RPC client with dynamic metadata decoding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::blocks::Block;
use subxt::utils::{AccountId32, H256};
use subxt::{OnlineClient, PolkadotConfig};
use tracing::{debug, instrument, trace};

use chainscope_core::error::{ChainError, ChainResult};
use chainscope_core::models::{BlockHash, ExtrinsicHash};
use chainscope_core::ports::{
    ChainConnector, ChainNode, FinalizedHead, HeadNotification, HeadStream, NodeHealth,
    RawBlockBody, RawExtrinsic, RuntimeInfo,
};

pub type SubstrateBlock = Block<PolkadotConfig, OnlineClient<PolkadotConfig>>;

/// Opens [`SubstrateNode`]s over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstrateConnector;

impl SubstrateConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChainConnector for SubstrateConnector {
    async fn open(&self, endpoint: &str) -> ChainResult<Arc<dyn ChainNode>> {
        let node = SubstrateNode::connect(endpoint).await?;
        Ok(Arc::new(node))
    }
}

#[derive(Clone)]
struct Clients {
    online: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
}

/// Substrate node adapter implementing the ChainNode port.
///
/// Uses the legacy RPC backend: best heads come from
/// `chain_subscribeNewHeads` and bodies are fetched by hash, which the
/// chainHead backend only allows for pinned blocks.
pub struct SubstrateNode {
    endpoint: String,
    clients: RwLock<Option<Clients>>,
}

impl SubstrateNode {
    /// Connect to a Substrate node.
    #[instrument(skip_all, fields(url = %endpoint))]
    pub async fn connect(endpoint: &str) -> ChainResult<Self> {
        debug!("Connecting to node");

        let rpc_client = RpcClient::from_url(endpoint)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client.clone());
        let online = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!("Connected successfully");

        Ok(Self {
            endpoint: endpoint.to_string(),
            clients: RwLock::new(Some(Clients { online, rpc })),
        })
    }

    fn clients(&self) -> ChainResult<Clients> {
        self.clients.read().clone().ok_or_else(|| {
            ChainError::ConnectionFailed(format!("connection to {} closed", self.endpoint))
        })
    }
}

#[async_trait]
impl ChainNode for SubstrateNode {
    async fn chain_name(&self) -> ChainResult<String> {
        self.clients()?
            .rpc
            .system_chain()
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))
    }

    async fn node_name(&self) -> ChainResult<String> {
        self.clients()?
            .rpc
            .system_name()
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))
    }

    async fn node_version(&self) -> ChainResult<String> {
        self.clients()?
            .rpc
            .system_version()
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))
    }

    async fn properties(&self) -> ChainResult<serde_json::Map<String, serde_json::Value>> {
        self.clients()?
            .rpc
            .system_properties()
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))
    }

    async fn genesis_hash(&self) -> ChainResult<BlockHash> {
        let hash = self.clients()?.online.genesis_hash();
        Ok(BlockHash(hash.0))
    }

    async fn runtime_version(&self) -> ChainResult<RuntimeInfo> {
        let version = self
            .clients()?
            .rpc
            .state_get_runtime_version(None)
            .await
            .map_err(|e| ChainError::MetadataError(e.to_string()))?;

        Ok(RuntimeInfo {
            spec_name: spec_name(&version.other)?,
            spec_version: version.spec_version,
        })
    }

    async fn subscribe_new_heads(&self) -> ChainResult<HeadStream> {
        let subscription = self
            .clients()?
            .online
            .blocks()
            .subscribe_best()
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let stream = subscription.map(|result| match result {
            Ok(block) => Ok(HeadNotification {
                number: u64::from(block.number()),
                hash: BlockHash(block.hash().0),
                author: None,
            }),
            Err(e) => Err(ChainError::SubscriptionError(e.to_string())),
        });

        Ok(Box::pin(stream))
    }

    async fn block_body(&self, hash: &BlockHash) -> ChainResult<RawBlockBody> {
        let block = self
            .clients()?
            .online
            .blocks()
            .at(H256::from(hash.0))
            .await
            .map_err(|e| ChainError::BlockNotFound(format!("{hash}: {e}")))?;

        let extrinsics = decode_extrinsics(&block).await?;
        Ok(RawBlockBody { extrinsics })
    }

    async fn finalized_head(&self) -> ChainResult<FinalizedHead> {
        let head = self
            .clients()?
            .online
            .blocks()
            .at_latest()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(FinalizedHead {
            number: u64::from(head.number()),
            hash: BlockHash(head.hash().0),
        })
    }

    async fn health(&self) -> ChainResult<NodeHealth> {
        let health = self
            .clients()?
            .rpc
            .system_health()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(NodeHealth {
            peers: health.peers as u64,
            is_syncing: health.is_syncing,
        })
    }

    async fn validator_count(&self) -> ChainResult<u64> {
        let online = self.clients()?.online;
        // Chains without a session pallet have no validator set to report.
        if online.metadata().pallet_by_name("Session").is_none() {
            return Ok(0);
        }

        let query = subxt::dynamic::storage("Session", "Validators", ());
        let validators = online
            .storage()
            .at_latest()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .fetch(&query)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let Some(validators) = validators else {
            return Ok(0);
        };
        let validators: Vec<AccountId32> = validators
            .as_type()
            .map_err(|e| ChainError::DecodeError(e.to_string()))?;
        Ok(validators.len() as u64)
    }

    async fn close(&self) {
        if self.clients.write().take().is_some() {
            debug!(url = %self.endpoint, "Connection closed");
        }
    }
}

// =============================================================================
// Block decoding helpers
// =============================================================================

/// `specName` lives among the untyped runtime version fields.
fn spec_name(other: &HashMap<String, serde_json::Value>) -> ChainResult<String> {
    other
        .get("specName")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ChainError::MetadataError("runtime version without specName".into()))
}

/// Decode extrinsics from a block.
async fn decode_extrinsics(block: &SubstrateBlock) -> ChainResult<Vec<RawExtrinsic>> {
    let extrinsics = block
        .extrinsics()
        .await
        .map_err(|e| ChainError::DecodeError(e.to_string()))?;

    let events = block
        .events()
        .await
        .map_err(|e| ChainError::RpcError(e.to_string()))?;

    let mut raw_extrinsics = Vec::new();

    for ext in extrinsics.iter() {
        let index = ext.index();
        let pallet = name_or(ext.pallet_name(), "Unknown");
        let call = name_or(ext.variant_name(), "unknown");
        trace!(block = block.number(), index, %pallet, %call, "Extrinsic decoded");

        raw_extrinsics.push(RawExtrinsic {
            index,
            hash: ExtrinsicHash(ext.hash().0),
            pallet,
            call,
            success: extrinsic_succeeded(&events, index),
        });
    }

    Ok(raw_extrinsics)
}

fn name_or<E>(name: Result<&str, E>, fallback: &str) -> String {
    name.map(str::to_string)
        .unwrap_or_else(|_| fallback.to_string())
}

/// Outcome of an extrinsic from its `System` events. Defaults to success when
/// no outcome event was emitted.
fn extrinsic_succeeded(events: &subxt::events::Events<PolkadotConfig>, ext_index: u32) -> bool {
    for ev in events.iter().flatten() {
        if let subxt::events::Phase::ApplyExtrinsic(idx) = ev.phase()
            && idx == ext_index
            && ev.pallet_name() == "System"
        {
            match ev.variant_name() {
                "ExtrinsicSuccess" => return true,
                "ExtrinsicFailed" => return false,
                _ => {}
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_name_from_runtime_version() {
        let mut other = HashMap::new();
        other.insert("specName".to_string(), json!("polkadot"));
        other.insert("implName".to_string(), json!("parity-polkadot"));
        assert_eq!(spec_name(&other).unwrap(), "polkadot");
    }

    #[test]
    fn test_missing_spec_name_is_metadata_error() {
        let other = HashMap::new();
        assert!(matches!(
            spec_name(&other),
            Err(ChainError::MetadataError(_))
        ));
    }

    #[test]
    fn test_name_fallback() {
        assert_eq!(name_or::<()>(Ok("Balances"), "Unknown"), "Balances");
        assert_eq!(name_or(Err(()), "Unknown"), "Unknown");
    }
}
