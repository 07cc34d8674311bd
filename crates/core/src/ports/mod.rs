mod chain_node;
mod explorer_view;

pub use chain_node::*;
pub use explorer_view::*;
