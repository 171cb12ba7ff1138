//! HTTP surface: WebSocket upgrade plus read-only status endpoints.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::CoordinatorState;

/// Build the coordinator's router.
pub fn router(state: CoordinatorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/presence/:identity", get(presence_handler))
        .route("/doctors/online", get(online_doctors_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<CoordinatorState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "consult-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    Json(state.stats())
}

/// Presence of a single identity. Lets a page that holds no socket poll
/// whether its doctor is reachable.
async fn presence_handler(
    Path(identity): Path<String>,
    State(state): State<CoordinatorState>,
) -> impl IntoResponse {
    match state.registry.lookup(&identity) {
        Some(participant) => Json(json!({
            "identity": identity,
            "online": true,
            "role": participant.role,
        })),
        None => Json(json!({
            "identity": identity,
            "online": false,
        })),
    }
}

/// Doctors currently connected, sorted by display name.
async fn online_doctors_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    let doctors: Vec<_> = state
        .registry
        .online_doctors()
        .into_iter()
        .map(|d| {
            json!({
                "identity": d.identity,
                "displayName": d.display_name,
                "since": d.registered_at.to_rfc3339(),
            })
        })
        .collect();

    Json(json!({ "doctors": doctors }))
}
