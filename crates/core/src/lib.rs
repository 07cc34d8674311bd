//! Core domain layer for the Chainscope explorer.
//!
//! This crate turns a push-based stream of block heads from a Substrate node
//! into bounded, query-ready summaries: a rolling window of recent blocks, a
//! rolling window of recent extrinsics, and periodically polled network
//! metrics. It follows hexagonal architecture principles - this is the
//! innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    chainscope (binary)                      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     chainscope-graphql       │     chainscope-substrate     │
//! │       (read API)             │          (RPC)               │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                   chainscope-core  ← YOU ARE HERE           │
//! │              (models, ports, services, window)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (BlockSummary, ExtrinsicSummary, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Connection manager, live feed, metrics poller
//! - [`window`] - Bounded, ordered, deduplicated history
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! - [`ports::ChainConnector`] / [`ports::ChainNode`] - Talk to a chain node
//! - [`ports::ExplorerView`] - Read-only surface for presentation layers
//!
//! ## Ownership
//!
//! Each window has exactly one owner, the feed worker task. Fetch results are
//! sent to it over a channel and applied one at a time; readers get immutable
//! snapshots through `tokio::sync::watch`. Tearing down a session cancels the
//! feed and the poller through the session's
//! [`services::SubscriptionRegistry`], and any result arriving afterwards is
//! dropped.
//!
//! ## Explorer Lifecycle
//!
//! 1. Connect and fetch static chain metadata in one batch
//! 2. Subscribe to new heads and fetch each block body concurrently
//! 3. Insert completed blocks through the window guard
//! 4. Poll finalized height and peer count on a fixed cadence
//! 5. Tear everything down on disconnect

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;
pub mod window;

#[cfg(test)]
mod testing;
