//! Websocket endpoints
//!
//! Mounts two routes into an axum router: `/core` for workers (join +
//! notify, snapshot stream back) and `/watch` for read-only observers.
//! Endpoint routing and upgrade negotiation stay here; everything after the
//! upgrade lives in the session module.

use crate::config::ServerConfig;
use crate::session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use nixie_coordinator::Coordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state behind both websocket endpoints
pub struct CoordinatorHandler {
    pub(crate) coordinator: Coordinator,
    pub(crate) config: ServerConfig,
    pub(crate) root: CancellationToken,
}

impl CoordinatorHandler {
    /// Create the handler and its coordinator
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let coordinator = Coordinator::new(config.node_expired_duration);
        Arc::new(Self {
            coordinator,
            config,
            root: CancellationToken::new(),
        })
    }

    /// The coordinator behind the endpoints
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Begin graceful shutdown: every session sends a close frame and exits.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Build the router carrying both endpoints
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/core", get(writable_endpoint))
            .route("/watch", get(readonly_endpoint))
            .with_state(Arc::clone(self))
    }
}

async fn writable_endpoint(
    State(handler): State<Arc<CoordinatorHandler>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_session(handler, socket))
}

async fn readonly_endpoint(
    State(handler): State<Arc<CoordinatorHandler>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_readonly_session(handler, socket))
}
