//! Substrate RPC adapter for Chainscope.
//!
//! This crate implements the [`ChainConnector`] and [`ChainNode`] ports from
//! `chainscope-core`, providing connectivity to Substrate-based blockchains
//! via WebSocket RPC.
//!
//! # Features
//!
//! - Best-head subscription (`chain_subscribeNewHeads`)
//! - Block bodies by hash, decoded with the runtime metadata via subxt
//! - Extrinsic outcomes from `System.ExtrinsicSuccess`/`ExtrinsicFailed`
//! - Static chain metadata and `system_health` over the legacy RPC methods
//! - Active validator count from `Session.Validators` storage
//!
//! # Usage
//!
//! ```ignore
//! use chainscope_core::ports::ChainConnector;
//! use chainscope_substrate::SubstrateConnector;
//!
//! let node = SubstrateConnector::new().open("wss://rpc.polkadot.io").await?;
//! let chain = node.chain_name().await?;
//! let mut heads = node.subscribe_new_heads().await?;
//!
//! while let Some(head) = heads.next().await {
//!     // Fetch the body...
//! }
//! ```
//!
//! [`ChainConnector`]: chainscope_core::ports::ChainConnector
//! [`ChainNode`]: chainscope_core::ports::ChainNode

mod client;

pub use client::{SubstrateConnector, SubstrateNode};
