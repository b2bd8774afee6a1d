//! HTTP server setup and configuration.

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::{Config, ServerConfig};
use crate::credentials::{ConfigCredentials, CredentialResolver};
use crate::router::ProviderRegistry;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id assigned to every request by [`assign_request_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub credentials: Arc<dyn CredentialResolver>,
    /// Largest request body the relay routes will buffer.
    pub max_body_bytes: usize,
}

impl AppState {
    /// State for a loaded config: one adapter per provider, keys taken from
    /// the config snapshot.
    pub fn from_config(config: Config, http_client: &Client) -> Self {
        let registry = ProviderRegistry::from_config(&config, http_client);
        let credentials = ConfigCredentials::from_config(&config);
        Self {
            registry: Arc::new(registry),
            credentials: Arc::new(credentials),
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);

    Router::new()
        // Relay endpoints
        .route(
            "/api/proxy",
            post(handlers::proxy_default)
                .fallback(handlers::method_not_allowed)
                .layer(body_limit.clone()),
        )
        .route(
            "/api/proxy/:provider",
            post(handlers::proxy_named)
                .fallback(handlers::method_not_allowed)
                .layer(body_limit),
        )
        // Operational endpoints
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        // State and middleware
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// HTTP client shared by every adapter.
///
/// No total request timeout is set: streams may run as long as the upstream
/// keeps sending. Idle gaps between reads are bounded instead.
pub fn build_http_client(server: &ServerConfig) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(server.connect_timeout())
        .read_timeout(server.read_timeout())
        .build()
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let http_client = build_http_client(&config.server)?;
    let state = AppState::from_config(config, &http_client);

    for provider in state.registry.providers() {
        tracing::info!(
            provider = %provider.name,
            kind = %provider.kind,
            schema = %provider.schema,
            key_configured = state.credentials.is_configured(&provider.name),
            "Provider ready"
        );
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
