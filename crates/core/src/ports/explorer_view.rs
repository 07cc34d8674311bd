//! Read-only surface consumed by presentation adapters.

use crate::models::{
    BlockSummary, ChainMetadata, ConnectionState, ExtrinsicSummary, FeedCounters, FeedStatus,
    MetricsSnapshot,
};

/// Everything a reader may see of a running explorer.
///
/// Every method returns an owned copy of the latest published state; nothing
/// here can mutate a window or a snapshot.
pub trait ExplorerView: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    /// Endpoint of the live session, if any.
    fn endpoint(&self) -> Option<String>;

    /// Reason of the last failed connection attempt.
    fn last_error(&self) -> Option<String>;

    /// `None` until connected.
    fn chain_metadata(&self) -> Option<ChainMetadata>;

    /// Newest first. Empty before a feed runs.
    fn recent_blocks(&self) -> Vec<BlockSummary>;

    /// Newest first. Empty before a feed runs.
    fn recent_extrinsics(&self) -> Vec<ExtrinsicSummary>;

    fn metrics_snapshot(&self) -> MetricsSnapshot;

    fn feed_status(&self) -> FeedStatus;

    fn feed_counters(&self) -> FeedCounters;
}
