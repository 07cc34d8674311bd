//! GraphQL API for Chainscope.
//!
//! Serves a read-only view of a running explorer: connection state, chain
//! metadata, recent blocks and extrinsics, network metrics and feed status.
//!
//! ```ignore
//! use chainscope_graphql::{build_schema, serve_with_shutdown, ServerConfig};
//!
//! let schema = build_schema(explorer.clone());
//! serve_with_shutdown(schema, ServerConfig::default(), shutdown).await?;
//! ```

mod schema;
mod server;
mod types;

pub use schema::{ExplorerQuery, MAX_QUERY_COMPLEXITY, MAX_QUERY_DEPTH, build_schema};
pub use server::{ServerConfig, router, serve_with_shutdown};
pub use types::ExplorerSchema;
