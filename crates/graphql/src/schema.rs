//! GraphQL schema definition.
//!
//! Read-only queries over the explorer view: connection state, chain
//! metadata, the recent block and extrinsic windows, network metrics and
//! feed status.

use std::sync::Arc;

use async_graphql::{Context, EmptyMutation, EmptySubscription, Enum, Object, Result, Schema};
use chrono::{DateTime, Utc};

use chainscope_core::models::{self as core, BlockHash};
use chainscope_core::ports::ExplorerView;

use crate::types::ExplorerSchema;

// -----------------------------------------------------------------------------
// Schema Configuration
// -----------------------------------------------------------------------------

/// Maximum query depth to prevent deeply nested queries (DoS protection).
/// Note: GraphQL introspection requires depth ~13, so we use 15 to allow it.
pub const MAX_QUERY_DEPTH: usize = 15;

/// Maximum query complexity score (DoS protection).
/// Each field has a default complexity of 1, nested objects multiply.
pub const MAX_QUERY_COMPLEXITY: usize = 500;

/// Build the explorer schema over `view`, with depth and complexity limits.
pub fn build_schema(view: Arc<dyn ExplorerView>) -> ExplorerSchema {
    Schema::build(ExplorerQuery, EmptyMutation, EmptySubscription)
        .data(view)
        .limit_depth(MAX_QUERY_DEPTH)
        .limit_complexity(MAX_QUERY_COMPLEXITY)
        .finish()
}

// -----------------------------------------------------------------------------
// Query Root
// -----------------------------------------------------------------------------

/// Query root of the explorer API.
#[derive(Default)]
pub struct ExplorerQuery;

fn view<'ctx>(ctx: &Context<'ctx>) -> Result<&'ctx Arc<dyn ExplorerView>> {
    ctx.data::<Arc<dyn ExplorerView>>()
}

#[Object]
impl ExplorerQuery {
    /// Connection state of the current session.
    async fn connection<'ctx>(&self, ctx: &Context<'ctx>) -> Result<Connection> {
        let view = view(ctx)?;
        Ok(Connection::new(
            view.connection_state(),
            view.endpoint(),
            view.last_error(),
        ))
    }

    /// Static chain metadata. Null until connected.
    async fn chain<'ctx>(&self, ctx: &Context<'ctx>) -> Result<Option<Chain>> {
        Ok(view(ctx)?.chain_metadata().map(Chain::from))
    }

    /// Most recent blocks, highest number first.
    async fn recent_blocks<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        first: Option<i32>,
    ) -> Result<Vec<Block>> {
        let limit = validate_limit(first);
        Ok(view(ctx)?
            .recent_blocks()
            .into_iter()
            .take(limit)
            .map(Block::from)
            .collect())
    }

    /// A block from the recent window, by number.
    async fn block<'ctx>(&self, ctx: &Context<'ctx>, number: i64) -> Result<Option<Block>> {
        Ok(view(ctx)?
            .recent_blocks()
            .into_iter()
            .find(|b| b.number as i64 == number)
            .map(Block::from))
    }

    /// A block from the recent window, by hash.
    async fn block_by_hash<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        hash: String,
    ) -> Result<Option<Block>> {
        let hash = BlockHash(parse_hash(&hash)?);
        Ok(view(ctx)?
            .recent_blocks()
            .into_iter()
            .find(|b| b.hash == hash)
            .map(Block::from))
    }

    /// Most recent extrinsics, newest first.
    async fn recent_extrinsics<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        first: Option<i32>,
        pallet: Option<String>,
    ) -> Result<Vec<Extrinsic>> {
        validate_filter_string(&pallet, "pallet")?;
        let limit = validate_limit(first);
        let prefix = pallet.map(|p| format!("{p}."));

        Ok(view(ctx)?
            .recent_extrinsics()
            .into_iter()
            .filter(|e| prefix.as_ref().is_none_or(|p| e.action.starts_with(p)))
            .take(limit)
            .map(Extrinsic::from)
            .collect())
    }

    /// Last known-good network metrics.
    async fn metrics<'ctx>(&self, ctx: &Context<'ctx>) -> Result<NetworkMetrics> {
        Ok(NetworkMetrics::from(view(ctx)?.metrics_snapshot()))
    }

    /// Live feed status and counters.
    async fn feed<'ctx>(&self, ctx: &Context<'ctx>) -> Result<Feed> {
        let view = view(ctx)?;
        Ok(Feed::new(view.feed_status(), view.feed_counters()))
    }
}

// -----------------------------------------------------------------------------
// Output Types
// -----------------------------------------------------------------------------

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Connection state.
#[derive(async_graphql::SimpleObject)]
pub struct Connection {
    pub status: ConnectionStatus,
    pub endpoint: Option<String>,
    /// Failure classification when `status` is FAILED.
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl Connection {
    fn new(state: core::ConnectionState, endpoint: Option<String>, last_error: Option<String>) -> Self {
        let (status, error_kind, error) = match state {
            core::ConnectionState::Disconnected => (ConnectionStatus::Disconnected, None, None),
            core::ConnectionState::Connecting => (ConnectionStatus::Connecting, None, None),
            core::ConnectionState::Connected => (ConnectionStatus::Connected, None, None),
            core::ConnectionState::Failed { kind, reason } => {
                (ConnectionStatus::Failed, Some(kind.to_string()), Some(reason))
            }
        };
        Self {
            status,
            endpoint,
            error_kind,
            error: error.or(last_error),
        }
    }
}

/// Chain metadata.
#[derive(async_graphql::SimpleObject)]
pub struct Chain {
    pub name: String,
    pub node_name: String,
    pub node_version: String,
    pub token_symbol: String,
    pub token_decimals: i32,
    pub ss58_format: i32,
    pub spec_name: String,
    pub runtime_version: i32,
    pub genesis_hash: String,
}

impl From<core::ChainMetadata> for Chain {
    fn from(m: core::ChainMetadata) -> Self {
        Self {
            name: m.chain_name,
            node_name: m.node_name,
            node_version: m.node_version,
            token_symbol: m.properties.token_symbol,
            token_decimals: m.properties.token_decimals as i32,
            ss58_format: m.properties.ss58_format as i32,
            spec_name: m.spec_name,
            runtime_version: m.runtime_version as i32,
            genesis_hash: to_hex(&m.genesis_hash.0),
        }
    }
}

/// Block type.
#[derive(async_graphql::SimpleObject)]
pub struct Block {
    pub number: i64,
    pub hash: String,
    pub author: Option<String>,
    pub extrinsic_count: i32,
    pub observed_at: DateTime<Utc>,
}

impl From<core::BlockSummary> for Block {
    fn from(b: core::BlockSummary) -> Self {
        Self {
            number: b.number as i64,
            hash: to_hex(&b.hash.0),
            author: b.author,
            extrinsic_count: b.extrinsic_count as i32,
            observed_at: b.observed_at,
        }
    }
}

/// Extrinsic type.
#[derive(async_graphql::SimpleObject)]
pub struct Extrinsic {
    pub id: String,
    pub block_number: i64,
    pub index: i32,
    pub hash: String,
    /// "Pallet.call".
    pub action: String,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

impl From<core::ExtrinsicSummary> for Extrinsic {
    fn from(e: core::ExtrinsicSummary) -> Self {
        Self {
            id: e.id.to_string(),
            block_number: e.block_number as i64,
            index: e.id.index as i32,
            hash: to_hex(&e.hash.0),
            action: e.action,
            success: matches!(e.outcome, core::ExtrinsicOutcome::Success),
            observed_at: e.observed_at,
        }
    }
}

/// Network metrics.
#[derive(async_graphql::SimpleObject)]
pub struct NetworkMetrics {
    pub finalized_height: i64,
    pub peer_count: i64,
    pub is_syncing: bool,
    pub active_validators: i64,
    pub uptime: String,
    pub avg_block_time: String,
    pub last_successful_poll_at: Option<DateTime<Utc>>,
}

impl From<core::MetricsSnapshot> for NetworkMetrics {
    fn from(m: core::MetricsSnapshot) -> Self {
        Self {
            finalized_height: m.finalized_height as i64,
            peer_count: m.peer_count as i64,
            is_syncing: m.is_syncing,
            active_validators: m.active_validators as i64,
            uptime: m.uptime_label,
            avg_block_time: m.avg_block_time_label,
            last_successful_poll_at: m.last_successful_poll_at,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
pub enum FeedState {
    Idle,
    Running,
    Stopped,
    Failed,
}

/// Live feed status.
#[derive(async_graphql::SimpleObject)]
pub struct Feed {
    pub state: FeedState,
    pub failure: Option<String>,
    pub heads_received: i64,
    pub fetch_failures: i64,
    pub extrinsics_observed: i64,
}

impl Feed {
    fn new(status: core::FeedStatus, counters: core::FeedCounters) -> Self {
        let (state, failure) = match status {
            core::FeedStatus::Idle => (FeedState::Idle, None),
            core::FeedStatus::Running => (FeedState::Running, None),
            core::FeedStatus::Stopped => (FeedState::Stopped, None),
            core::FeedStatus::Failed { reason } => (FeedState::Failed, Some(reason)),
        };
        Self {
            state,
            failure,
            heads_received: counters.heads_received as i64,
            fetch_failures: counters.fetch_failures as i64,
            extrinsics_observed: counters.extrinsics_observed as i64,
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers & Validation
// -----------------------------------------------------------------------------

/// Convert bytes to 0x-prefixed hex string.
fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Maximum length for hash strings (64 hex chars + "0x" prefix).
const MAX_HASH_LENGTH: usize = 66;
/// Maximum length for string filter parameters.
const MAX_FILTER_STRING_LENGTH: usize = 128;
/// Upper bound on list sizes; windows are never larger in practice.
const MAX_LIST_SIZE: i32 = 100;

/// Parse and validate a hash string.
fn parse_hash(s: &str) -> Result<[u8; 32]> {
    if s.len() > MAX_HASH_LENGTH {
        return Err(async_graphql::Error::new(format!(
            "Hash too long: maximum {} characters allowed",
            MAX_HASH_LENGTH
        )));
    }

    let s = s.strip_prefix("0x").unwrap_or(s);

    if !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(async_graphql::Error::new(
            "Invalid hash: must contain only hexadecimal characters",
        ));
    }

    let bytes =
        hex::decode(s).map_err(|e| async_graphql::Error::new(format!("Invalid hash: {}", e)))?;

    bytes
        .try_into()
        .map_err(|_| async_graphql::Error::new("Hash must be exactly 32 bytes (64 hex characters)"))
}

/// Validate a filter string parameter.
fn validate_filter_string(s: &Option<String>, field_name: &str) -> Result<()> {
    if let Some(value) = s {
        if value.len() > MAX_FILTER_STRING_LENGTH {
            return Err(async_graphql::Error::new(format!(
                "{} too long: maximum {} characters allowed",
                field_name, MAX_FILTER_STRING_LENGTH
            )));
        }
        if value.is_empty() {
            return Err(async_graphql::Error::new(format!(
                "{} cannot be empty",
                field_name
            )));
        }
    }
    Ok(())
}

/// Clamp an optional list size; absent means "everything in the window".
fn validate_limit(first: Option<i32>) -> usize {
    first.unwrap_or(MAX_LIST_SIZE).clamp(1, MAX_LIST_SIZE) as usize
}
