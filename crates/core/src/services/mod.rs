//! Core services.
//!
//! - [`ConnectionManager`] - Owns the session lifecycle
//! - [`LiveFeed`] - Head subscription to bounded block/extrinsic windows
//! - [`MetricsPoller`] - Periodic network statistics
//! - [`SubscriptionRegistry`] - Cancellation for everything tied to a session
//! - [`Explorer`] - Wires the above together for one endpoint

mod connection;
mod explorer;
mod feed;
mod poller;
mod registry;

pub use connection::{ConnectionConfig, ConnectionManager, DEFAULT_ENDPOINT, Session};
pub use explorer::{Explorer, ExplorerConfig};
pub use feed::{FeedConfig, FeedHandle, FeedSnapshot, LiveFeed};
pub use poller::{MetricsPoller, PollerConfig, PollerHandle, PollerStats};
pub use registry::{FetchTicket, Liveness, SubscriptionRegistry};
