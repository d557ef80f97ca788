//! API server implementation.
//!
//! Provides health, ready, metrics and query-state endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use qstate_core::{
    Error, HierarchicalResourceGroupCatalog, InMemoryQueryRegistry, NodeDiscovery, NodeRole,
    QueryRegistry, ResourceGroupCatalog, Result, StaticNodeDiscovery,
};

use crate::config::Config;
use crate::proxy::ResourceManagerProxy;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    pub(crate) registry: Arc<dyn QueryRegistry>,
    pub(crate) catalog: Arc<dyn ResourceGroupCatalog>,
    pub(crate) discovery: Arc<dyn NodeDiscovery>,
    pub(crate) proxy: ResourceManagerProxy,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("registry", &"<QueryRegistry>")
            .field("catalog", &"<ResourceGroupCatalog>")
            .field("discovery", &"<NodeDiscovery>")
            .field("proxy", &self.proxy)
            .finish()
    }
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Ready when the registry can be read.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.list_queries() {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("query registry unavailable: {e}")),
            }),
        ),
    }
}

/// The query-state API server.
pub struct Server {
    config: Config,
    registry: Arc<dyn QueryRegistry>,
    catalog: Arc<dyn ResourceGroupCatalog>,
    discovery: Arc<dyn NodeDiscovery>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("registry", &"<QueryRegistry>")
            .field("catalog", &"<ResourceGroupCatalog>")
            .field("discovery", &"<NodeDiscovery>")
            .finish()
    }
}

impl Server {
    /// Creates a server with an empty in-memory registry and no peers.
    #[must_use]
    pub fn new(config: Config) -> Self {
        ServerBuilder::new().config(config).build()
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            catalog: Arc::clone(&self.catalog),
            discovery: Arc::clone(&self.discovery),
            proxy: ResourceManagerProxy::new(self.config.proxy_timeout()),
        }
    }

    fn create_router(&self) -> Router {
        let state = Arc::new(self.app_state());
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);
        let context_layer = middleware::from_fn(crate::context::context_middleware);
        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .nest("/v1", crate::routes::v1_routes().route_layer(auth_layer))
            // Metrics outermost for timing, then trace, then request context.
            .layer(context_layer)
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server cannot
    /// bind to the port.
    pub async fn serve(&self) -> Result<()> {
        self.validate_config()?;
        crate::metrics::init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            resource_manager_enabled = self.config.resource_manager_enabled,
            matching_timeout_ms = self.config.matching_timeout_millis,
            debug_auth = self.config.debug,
            "Starting qstate API server"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::internal(format!("failed to bind to {addr}: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::internal(format!("server error: {e}")))?;

        Ok(())
    }

    /// Creates the router without binding a port.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    fn validate_config(&self) -> Result<()> {
        if !self.config.debug && self.config.registry_seed_path.is_some() {
            return Err(Error::InvalidInput(
                "registry_seed_path is only allowed when debug=true".to_string(),
            ));
        }

        if !self.config.debug && self.config.jwt.hs256_secret.is_none() {
            return Err(Error::InvalidInput(
                "jwt.hs256_secret is required when debug=false".to_string(),
            ));
        }

        if self.config.resource_manager_enabled
            && self
                .discovery
                .peers_with_role(NodeRole::ResourceManager)
                .is_empty()
        {
            tracing::warn!(
                "Resource manager mode is enabled but no resource manager is known; \
                 forwarded requests will return 503"
            );
        }

        Ok(())
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    registry: Arc<dyn QueryRegistry>,
    catalog: Arc<dyn ResourceGroupCatalog>,
    discovery: Arc<dyn NodeDiscovery>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            registry: Arc::new(InMemoryQueryRegistry::new()),
            catalog: Arc::new(HierarchicalResourceGroupCatalog),
            discovery: Arc::new(StaticNodeDiscovery::default()),
        }
    }
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables debug mode.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Enables forwarding to resource managers.
    #[must_use]
    pub fn resource_manager_enabled(mut self, enabled: bool) -> Self {
        self.config.resource_manager_enabled = enabled;
        self
    }

    /// Sets the per-evaluation user-filter timeout.
    #[must_use]
    pub fn matching_timeout_millis(mut self, millis: u64) -> Self {
        self.config.matching_timeout_millis = millis;
        self
    }

    /// Sets the outbound forwarding timeout.
    #[must_use]
    pub fn proxy_timeout_secs(mut self, secs: u64) -> Self {
        self.config.proxy_timeout_secs = secs;
        self
    }

    /// Sets the HS256 secret used to verify bearer tokens.
    #[must_use]
    pub fn jwt_hs256_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt.hs256_secret = Some(secret.into());
        self
    }

    /// Sets the query registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn QueryRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the resource-group catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ResourceGroupCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets node discovery.
    #[must_use]
    pub fn discovery(mut self, discovery: Arc<dyn NodeDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server {
            config: self.config,
            registry: self.registry,
            catalog: self.catalog,
            discovery: self.discovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() -> Result<()> {
        let router = ServerBuilder::new().build().test_router();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.context("call router")?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .context("read response body")?;
        let health: HealthResponse = serde_json::from_slice(&body).context("parse JSON body")?;
        assert_eq!(health.status, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn test_ready_endpoint() -> Result<()> {
        let router = ServerBuilder::new().build().test_router();

        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.context("call router")?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .context("read response body")?;
        let ready: ReadyResponse = serde_json::from_slice(&body).context("parse JSON body")?;
        assert!(ready.ready);
        Ok(())
    }

    #[tokio::test]
    async fn test_request_id_echoed() -> Result<()> {
        let router = ServerBuilder::new().build().test_router();

        let request = Request::builder()
            .uri("/health")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.context("call router")?;

        assert_eq!(
            response.headers().get("x-request-id").map(|v| v.as_bytes()),
            Some(&b"req-42"[..])
        );
        Ok(())
    }

    #[test]
    fn test_seed_path_rejected_outside_debug() {
        let server = ServerBuilder::new()
            .config(Config {
                registry_seed_path: Some("/tmp/queries.json".to_string()),
                ..Config::default()
            })
            .jwt_hs256_secret("secret")
            .build();
        assert!(server.validate_config().is_err());

        let server = ServerBuilder::new()
            .config(Config {
                debug: true,
                registry_seed_path: Some("/tmp/queries.json".to_string()),
                ..Config::default()
            })
            .build();
        assert!(server.validate_config().is_ok());
    }

    #[test]
    fn test_resource_manager_mode_without_peers_is_allowed() {
        let server = ServerBuilder::new()
            .resource_manager_enabled(true)
            .jwt_hs256_secret("secret")
            .build();
        assert!(server.validate_config().is_ok());
    }

    #[test]
    fn test_jwt_secret_required_outside_debug() {
        let server = ServerBuilder::new().build();
        assert!(server.validate_config().is_err());

        let server = ServerBuilder::new().debug(true).build();
        assert!(server.validate_config().is_ok());
    }

    #[tokio::test]
    async fn test_health_does_not_require_roles() -> Result<()> {
        let router = ServerBuilder::new().debug(true).build().test_router();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.context("call router")?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_v1_rejects_callers_without_roles() -> Result<()> {
        let router = ServerBuilder::new().debug(true).build().test_router();

        let request = Request::builder()
            .uri("/v1/queryState")
            .header("x-request-id", "req-auth")
            .body(Body::empty())
            .context("build request")?;
        let response = router.oneshot(request).await.context("call router")?;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-request-id").map(|v| v.as_bytes()),
            Some(&b"req-auth"[..])
        );
        Ok(())
    }

    #[test]
    fn test_builder_setters() {
        let server = Server::builder()
            .http_port(9999)
            .debug(true)
            .matching_timeout_millis(250)
            .proxy_timeout_secs(5)
            .build();
        assert_eq!(server.config().http_port, 9999);
        assert!(server.config().debug);
        assert_eq!(server.config().matching_timeout_millis, 250);
        assert_eq!(server.config().proxy_timeout_secs, 5);
    }
}
