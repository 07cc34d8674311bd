//! Error types for the explorer core.
//!
//! This module defines one error type per failure domain:
//!
//! - [`ChainError`] - Errors reported by a chain node adapter
//! - [`ConnectionError`] - Fatal to a session, surfaced as a failed state
//! - [`FetchError`] - A single block body could not be resolved
//! - [`PollError`] - A metrics tick failed
//! - [`FeedError`] - Terminal failure of a live feed
//! - [`ConfigError`] - Rejected configuration
//! - [`ExplorerError`] - Anything that stops an explorer from starting
//!
//! Only [`ConnectionError`] and [`FeedError`] ever reach callers. Fetch and
//! poll errors are logged and absorbed where they happen.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Blockchain RPC and connectivity errors.
///
/// These errors occur when communicating with the Substrate node
/// via WebSocket RPC.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Head subscription failed or disconnected.
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Runtime metadata could not be fetched or parsed.
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// The node does not know the requested block.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// The node returned data that could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),
}

// =============================================================================
// Connection Errors
// =============================================================================

/// Coarse classification of a [`ConnectionError`], carried by
/// [`crate::models::ConnectionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    Unreachable,
    Timeout,
    MetadataUnavailable,
}

impl std::fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::MetadataUnavailable => "metadata_unavailable",
        };
        f.write_str(label)
    }
}

/// Failure to establish a session. Never retried by the core.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be opened.
    #[error("Endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// No response within the configured bound.
    #[error("Endpoint {endpoint} did not respond within {after:?}")]
    Timeout { endpoint: String, after: Duration },

    /// Transport opened, but chain metadata could not be retrieved.
    #[error("Metadata unavailable from {endpoint}: {reason}")]
    MetadataUnavailable { endpoint: String, reason: String },
}

impl ConnectionError {
    pub fn kind(&self) -> ConnectionErrorKind {
        match self {
            Self::Unreachable { .. } => ConnectionErrorKind::Unreachable,
            Self::Timeout { .. } => ConnectionErrorKind::Timeout,
            Self::MetadataUnavailable { .. } => ConnectionErrorKind::MetadataUnavailable,
        }
    }
}

// =============================================================================
// Fetch & Poll Errors
// =============================================================================

/// A block body could not be turned into summaries.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The node could not serve the body.
    #[error("Body of block {number} unavailable: {reason}")]
    BodyUnavailable { number: u64, reason: String },

    /// The node served a body that could not be decoded.
    #[error("Body of block {number} malformed: {reason}")]
    Malformed { number: u64, reason: String },
}

impl FetchError {
    /// Classify a chain error raised while fetching the body of `number`.
    pub fn from_chain(number: u64, err: ChainError) -> Self {
        match err {
            ChainError::DecodeError(reason) => Self::Malformed { number, reason },
            other => Self::BodyUnavailable {
                number,
                reason: other.to_string(),
            },
        }
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BodyUnavailable { .. } => "body_unavailable",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// A metrics tick failed. The previous snapshot stays published.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Query {query} failed: {source}")]
    QueryFailed {
        query: &'static str,
        #[source]
        source: ChainError,
    },
}

// =============================================================================
// Feed Errors
// =============================================================================

/// Terminal failures of a live feed. The caller decides whether to reconnect.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The session is not in the connected state.
    #[error("Session for {0} is not connected")]
    NotConnected(String),

    /// The head subscription could not be established.
    #[error("Head subscription failed: {0}")]
    SubscriptionFailed(#[from] ChainError),
}

/// Failure to bring an explorer up for an endpoint.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Invalid configuration, rejected before anything starts.
#[derive(Debug, Error)]
#[error("Configuration error: {field} {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for chain adapter operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result type for block body resolution.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for a metrics tick.
pub type PollResult<T> = Result<T, PollError>;

/// Result type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;
