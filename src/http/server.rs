//! HTTP server with axum router and graceful shutdown.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::require_auth;
use super::handlers::{get_health, get_info, not_found, post_rpc, preflight, AppState};
use super::ServerError;
use crate::bridge::Bridge;
use crate::config::{AuthConfig, ServerConfig};

/// HTTP front end of the bridge.
pub struct HttpServer {
    /// Server configuration.
    config: ServerConfig,
    /// Application state shared across handlers.
    state: AppState,
    /// Triggers graceful shutdown.
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a server with default configuration.
    #[must_use]
    pub fn new(bridge: Arc<Bridge>, auth: AuthConfig) -> Self {
        let config = ServerConfig::default();
        let state = AppState::new(bridge, auth, &config.service_name);
        Self {
            config,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.state.service_name = Arc::from(config.service_name.as_str());
        self.config = config;
        self
    }

    /// Use `cancel` to trigger graceful shutdown (builder pattern).
    #[must_use]
    pub fn with_shutdown(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get the configured address as a string.
    #[must_use]
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Build the axum router with all routes and middleware.
    ///
    /// OPTIONS is answered with 200 on every path, before authentication.
    pub fn build_router(&self) -> Router {
        let rpc = Router::new()
            .route("/", get(get_info).post(post_rpc).options(preflight))
            .route("/mcp", get(get_info).post(post_rpc).options(preflight))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_auth,
            ));

        let router = Router::new()
            .route("/health", get(get_health).options(preflight))
            .merge(rpc)
            .fallback(not_found)
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(cors_layer(&self.state.auth.header_name))
        } else {
            router
        }
    }

    /// Bind to the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.address();
        let listener =
            TcpListener::bind(&address)
                .await
                .map_err(|source| ServerError::BindError {
                    address: address.clone(),
                    source,
                })?;

        tracing::info!(address = %address, "Bridge HTTP server listening");
        tracing::info!("JSON-RPC endpoint available at http://{address}/mcp");
        tracing::info!("Health check available at http://{address}/health");

        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let cancel = self.cancel.clone();
        let app = self.build_router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}

/// Any origin, GET/POST/OPTIONS, and the credentials header.
fn cors_layer(auth_header: &str) -> CorsLayer {
    let mut headers = vec![header::CONTENT_TYPE, header::AUTHORIZATION];
    match HeaderName::from_bytes(auth_header.as_bytes()) {
        Ok(name) if !headers.contains(&name) => headers.push(name),
        Ok(_) => {}
        Err(e) => tracing::warn!(header = %auth_header, error = %e, "Invalid auth header name"),
    }

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(headers)
}
