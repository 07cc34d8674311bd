//! Domain models published by the explorer core.
//!
//! Everything in here is immutable once built. Windows and snapshots hand
//! out clones of these values, never references into live state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectionErrorKind;

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `short()` - Abbreviated form for log lines
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// First four bytes as hex, for log fields.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte block hash (Blake2-256).
    BlockHash
);

hash32_newtype!(
    /// 32-byte extrinsic hash.
    ExtrinsicHash
);

// =============================================================================
// Connection & Chain Metadata
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, or the session was torn down.
    Disconnected,
    /// Transport and metadata requests are in progress.
    Connecting,
    /// Metadata retrieved, session usable.
    Connected,
    /// The connection attempt failed; a new `connect` call is required.
    Failed {
        kind: ConnectionErrorKind,
        reason: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Token and address properties advertised by `system_properties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProperties {
    pub token_symbol: String,
    pub token_decimals: u8,
    pub ss58_format: u16,
}

impl Default for ChainProperties {
    fn default() -> Self {
        Self {
            token_symbol: "DOT".to_string(),
            token_decimals: 10,
            ss58_format: 0,
        }
    }
}

impl ChainProperties {
    /// Parse the raw properties map returned by the node.
    ///
    /// Multi-token chains advertise `tokenSymbol`/`tokenDecimals` as arrays;
    /// the first entry is the native token. Missing or malformed keys fall
    /// back to the defaults.
    pub fn from_json(raw: &serde_json::Map<String, serde_json::Value>) -> Self {
        let defaults = Self::default();

        let token_symbol = raw
            .get("tokenSymbol")
            .and_then(first_of)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.token_symbol);

        let token_decimals = raw
            .get("tokenDecimals")
            .and_then(first_of)
            .and_then(|v| v.as_u64())
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(defaults.token_decimals);

        let ss58_format = raw
            .get("ss58Format")
            .and_then(|v| v.as_u64())
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(defaults.ss58_format);

        Self {
            token_symbol,
            token_decimals,
            ss58_format,
        }
    }
}

fn first_of(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Array(values) => values.first(),
        other => Some(other),
    }
}

/// Static chain metadata, fetched once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    /// Chain name (e.g., "Polkadot").
    pub chain_name: String,
    /// Node implementation name (e.g., "Parity Polkadot").
    pub node_name: String,
    /// Node implementation version.
    pub node_version: String,
    /// Token and address-format properties.
    pub properties: ChainProperties,
    /// Runtime spec name (e.g., "polkadot").
    pub spec_name: String,
    /// Runtime spec version.
    pub runtime_version: u32,
    /// Genesis block hash.
    pub genesis_hash: BlockHash,
}

// =============================================================================
// Blocks
// =============================================================================

/// Summary of a block observed through the head subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number (height).
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Number of extrinsics in this block.
    pub extrinsic_count: u32,
    /// Block author, when the node exposes it.
    pub author: Option<String>,
    /// When the head notification was received.
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Extrinsics
// =============================================================================

/// Composite extrinsic identifier: block number and position in the block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ExtrinsicId {
    pub block_number: u64,
    pub index: u32,
}

impl std::fmt::Display for ExtrinsicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.block_number, self.index)
    }
}

/// Dispatch outcome of an extrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtrinsicOutcome {
    Success,
    Failed,
}

/// Summary of one of the leading extrinsics of an accepted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrinsicSummary {
    /// Unique identifier: block_number-extrinsic_index.
    pub id: ExtrinsicId,
    /// Block number containing this extrinsic.
    pub block_number: u64,
    /// Extrinsic hash.
    pub hash: ExtrinsicHash,
    /// "Pallet.call" label (e.g., "Balances.transfer_keep_alive").
    pub action: String,
    /// Dispatch outcome.
    pub outcome: ExtrinsicOutcome,
    /// Inherited from the containing block.
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Live Feed
// =============================================================================

/// Lifecycle of a live feed, as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No feed has been started for the current session.
    Idle,
    Running,
    /// Stopped by its owner.
    Stopped,
    /// The head subscription ended or errored. Reported once.
    Failed { reason: String },
}

/// Running totals of a live feed since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCounters {
    pub heads_received: u64,
    pub fetch_failures: u64,
    /// Extrinsics contained in accepted blocks, not only the windowed ones.
    pub extrinsics_observed: u64,
}

// =============================================================================
// Metrics
// =============================================================================

/// Aggregate network statistics, replaced as a whole by the poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub finalized_height: u64,
    pub peer_count: u64,
    pub is_syncing: bool,
    pub active_validators: u64,
    pub uptime_label: String,
    pub avg_block_time_label: String,
    /// `None` until the first successful poll.
    pub last_successful_poll_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// The snapshot published before any poll has succeeded.
    pub fn empty(avg_block_time_label: impl Into<String>) -> Self {
        Self {
            finalized_height: 0,
            peer_count: 0,
            is_syncing: false,
            active_validators: 0,
            uptime_label: "n/a".to_string(),
            avg_block_time_label: avg_block_time_label.into(),
            last_successful_poll_at: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
