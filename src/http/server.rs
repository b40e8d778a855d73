//! HTTP application served by the `live-listener` binary.
//!
//! # Responsibilities
//! - Create the Axum Router for one configuration snapshot
//! - Wire up middleware (tracing, timeout)
//! - Bootstrap a listener's [`ServerSetter`] from [`ServiceConfig`]
//!
//! A router is built per start, so handlers see the configuration the server
//! was started with. A restart picks up the new one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::loader::BoxError;
use crate::config::schema::ServiceConfig;
use crate::config::validation::validate_config;
use crate::net::setter::ServerSetter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ServiceConfig) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
    };
    Router::new()
        .route("/", get(greeting))
        .route("/health", get(health))
        .route("/config", get(current_config))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Bootstrap function for listeners driven by [`ServiceConfig`].
pub fn bootstrap(config: &ServiceConfig, setter: &mut ServerSetter) -> Result<(), BoxError> {
    validate_config(config)?;

    let listener = &config.listener;
    setter.name = listener.name.clone();
    setter.address = listener.bind_address.clone();
    setter.protocol = listener.protocol;
    setter.tls = listener.tls.clone();
    setter.handler = Some(build_router(config));

    tracing::debug!(
        listener = %listener.name,
        address = %listener.bind_address,
        protocol = ?listener.protocol,
        "Listener bootstrapped"
    );
    Ok(())
}

async fn greeting(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> String {
    tracing::debug!(peer_addr = %peer, "Greeting requested");
    state.config.greeting.clone()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn current_config(State(state): State<AppState>) -> Json<ServiceConfig> {
    Json(ServiceConfig::clone(&state.config))
}
