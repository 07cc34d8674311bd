//! GraphQL HTTP server.

use std::future::Future;

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};
use tracing::info;

use crate::types::ExplorerSchema;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_playground: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            enable_playground: true,
        }
    }
}

/// Routes: `POST /graphql`, `GET /health`, and the GraphiQL UI on `GET /graphql`
/// (plus `/` when the playground is enabled).
pub fn router(schema: ExplorerSchema, enable_playground: bool) -> Router {
    let mut app = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .route("/health", get(health_check))
        .with_state(schema);

    if enable_playground {
        app = app.route("/", get(graphql_playground));
    }
    app
}

/// Start the GraphQL server with graceful shutdown support.
pub async fn serve_with_shutdown<F>(
    schema: ExplorerSchema,
    config: ServerConfig,
    shutdown_signal: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(schema, config.enable_playground);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("⚡ GraphQL server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
}

/// GraphQL query handler.
async fn graphql_handler(State(schema): State<ExplorerSchema>, req: GraphQLRequest) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

/// GraphQL Playground UI.
async fn graphql_playground() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
