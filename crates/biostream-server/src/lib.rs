//! Biostream Server - coordinator, REST API and WebSocket stream
//!
//! Streams a filtered physiological signal to a bounded number of remote
//! viewers and reports the health of every viewer connection.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod source;
pub mod ws;

pub use coordinator::{Coordinator, CoordinatorHandle, StreamConfig};

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the coordinator task
    pub coordinator: CoordinatorHandle,
    /// Server configuration
    pub config: ServerConfig,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

impl AppState {
    pub fn new(coordinator: CoordinatorHandle, config: ServerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/auth", post(api::login).delete(api::logout))
        .route("/api/v1/sessions", get(api::list_sessions))
        .route("/api/v1/filter", get(api::get_filter).post(api::set_filter))
        .route("/api/v1/filter/apply", post(api::apply_filter))
        .route("/api/v1/data/push", post(api::push_data))
        .route("/api/v1/history", get(api::get_history))
        .route("/api/v1/history/clear", post(api::clear_history))
        .route("/api/v1/quality", get(api::get_quality))
        .route("/api/v1/quality/{client_id}", get(api::get_client_quality))
        .route("/api/v1/status", get(api::get_status))
        .route("/api/v1/pulse", get(api::get_pulse))
        .route("/api/v1/remote-url", get(api::get_remote_url))
        // WebSocket
        .route("/api/v1/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Start the web server
pub async fn start_server<F>(state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Biostream server listening");

    serve(listener, state, shutdown).await
}
