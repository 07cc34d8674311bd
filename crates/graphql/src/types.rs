//! GraphQL type definitions.

use async_graphql::{EmptyMutation, EmptySubscription, Schema};

use crate::schema::ExplorerQuery;

/// The explorer GraphQL schema type.
pub type ExplorerSchema = Schema<ExplorerQuery, EmptyMutation, EmptySubscription>;
