//! HTTP and WebSocket adapter over the orchestrator.
//!
//! - `POST /api/messages` submits a message and returns the reply. A bearer
//!   token, when present, attributes the message to its session.
//! - `POST /api/sessions` opens a session.
//! - `GET /ws/{channel}` streams bus events for one channel as JSON text frames.
//! - `GET /health` reports liveness and background job stats.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::bus::{ChannelName, Subscription};
use crate::error::OrchestratorError;
use crate::model::{Message, RoleType};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn routes(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/messages", post(submit_message))
        .route("/api/sessions", post(create_session))
        .route("/ws/{channel}", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { orchestrator })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "care-orchestrator",
        "jobs": state.orchestrator.scheduler().stats().await,
    }))
}

// ── Messages ────────────────────────────────────────────────────────────

async fn submit_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(message): Json<Message>,
) -> Response {
    let result = match bearer_token(&headers) {
        Some(token) => state.orchestrator.handle_for_session(token, message).await,
        None => state.orchestrator.handle(message).await,
    };

    match result {
        Ok(reply) => (StatusCode::OK, Json(json!(reply))).into_response(),
        Err(e) => error_response(&e),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn error_response(error: &OrchestratorError) -> Response {
    let (status, message) = match error {
        OrchestratorError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many messages, please wait before sending more".to_string(),
        ),
        OrchestratorError::Routing(_) => (
            StatusCode::BAD_REQUEST,
            "Message could not be routed".to_string(),
        ),
        OrchestratorError::SessionExpired => (StatusCode::UNAUTHORIZED, error.to_string()),
        OrchestratorError::Failed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
        OrchestratorError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
}

// ── Sessions ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    user_id: String,
    role: RoleType,
}

async fn create_session(
    State(state): State<ApiState>,
    Json(request): Json<SessionRequest>,
) -> impl IntoResponse {
    let session = state
        .orchestrator
        .create_session(request.user_id, request.role)
        .await;
    (
        StatusCode::CREATED,
        Json(json!({
            "token": session.token,
            "userId": session.user_id,
            "role": session.role,
            "expiresInSecs": session.remaining().as_secs(),
        })),
    )
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<ApiState>,
) -> Response {
    let Some(channel) = ChannelName::parse(&channel) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Unknown channel: {channel}") })),
        )
            .into_response();
    };
    // Subscribe before the upgrade so nothing published meanwhile is missed.
    let subscription = state.orchestrator.bus().subscribe(&channel).await;
    info!(channel = %channel, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription) {
    let channel = subscription.channel().to_string();
    info!(channel = %channel, "WebSocket client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    debug!(channel = %channel, "Bus closed");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if socket.send(WsMessage::Text(json.into())).await.is_err() {
                            debug!(channel = %channel, "Client disconnected during send");
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "Failed to encode bus event"),
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(channel = %channel, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(channel = %channel, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(channel = %channel, "WebSocket connection closed");
}
