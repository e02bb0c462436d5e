// libs/waiting-room-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
    Json,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::bearer_token;

use crate::error::WaitingRoomError;
use crate::models::{AuthenticatedIdentity, ClientEvent, HandshakeCredentials, RoomSnapshot, ServerEvent};
use crate::services::{
    AuthenticationGate, ConsultationDirectory, JwtSessionVerifier, RouterLimits, SessionTokenVerifier,
    SignalingRouter, SupabaseConsultationDirectory, WaitingRoomHub,
};

#[derive(Clone)]
pub struct WaitingRoomState {
    pub config: Arc<AppConfig>,
    pub gate: Arc<AuthenticationGate>,
    pub hub: WaitingRoomHub,
}

impl WaitingRoomState {
    /// Wires the production collaborators and starts the hub. Must run inside a tokio runtime.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let directory: Arc<dyn ConsultationDirectory> = Arc::new(SupabaseConsultationDirectory::new(&config));
        let verifier: Arc<dyn SessionTokenVerifier> = Arc::new(JwtSessionVerifier::new(&config));
        Self::with_collaborators(config, verifier, directory)
    }

    pub fn with_collaborators(
        config: Arc<AppConfig>,
        verifier: Arc<dyn SessionTokenVerifier>,
        directory: Arc<dyn ConsultationDirectory>,
    ) -> Self {
        let router = SignalingRouter::new(RouterLimits::from_config(&config));
        let hub = WaitingRoomHub::spawn(router, Arc::clone(&directory));
        let gate = Arc::new(AuthenticationGate::new(verifier, directory));

        Self { config, gate, hub }
    }
}

// ==============================================================================
// HTTP HANDLERS
// ==============================================================================

pub async fn waiting_room_health(State(state): State<WaitingRoomState>) -> Json<Value> {
    match state.hub.stats().await {
        Some(stats) => Json(json!({
            "status": "healthy",
            "active_rooms": stats.active_rooms,
            "connections": stats.connections,
            "persistence_configured": state.config.is_configured(),
        })),
        None => Json(json!({
            "status": "unhealthy",
            "active_rooms": 0,
            "connections": 0,
            "persistence_configured": state.config.is_configured(),
        })),
    }
}

pub async fn get_room_snapshot(
    State(state): State<WaitingRoomState>,
    Path(room_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<RoomSnapshot>, AppError> {
    debug!("User {} requested snapshot of room {}", user.id, room_id);

    state
        .hub
        .snapshot(&room_id)
        .await
        .map(Json)
        .ok_or_else(|| WaitingRoomError::RoomNotFound(room_id).into())
}

/// Authenticates the handshake, then upgrades. Rejected handshakes never reach the hub.
pub async fn waiting_room_socket(
    State(state): State<WaitingRoomState>,
    Query(mut credentials): Query<HandshakeCredentials>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if credentials.token.is_none() {
        credentials.token = bearer_token(&headers).ok().map(str::to_string);
    }

    let principal = state.gate.authenticate(&credentials, Utc::now()).await?;
    let hub = state.hub.clone();

    Ok(ws.on_upgrade(move |socket| run_connection(socket, hub, principal)))
}

// ==============================================================================
// CONNECTION LIFECYCLE
// ==============================================================================

async fn run_connection(socket: WebSocket, hub: WaitingRoomHub, principal: AuthenticatedIdentity) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (transport, mut outbound) = mpsc::unbounded_channel::<ServerEvent>();

    info!("WebSocket {} opened for {}", connection_id, principal.identity);
    hub.connect(connection_id, principal, transport.clone());

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match encode_event(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} for {}: {}", e.code(), connection_id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => hub.dispatch(connection_id, event),
                Err(e) => {
                    debug!("Malformed event from {}: {}", connection_id, e);
                    let err = WaitingRoomError::Validation(format!("malformed event: {}", e));
                    let _ = transport.send(ServerEvent::Error(err.to_payload()));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket {} errored: {}", connection_id, e);
                break;
            }
        }
    }

    hub.disconnect(connection_id);
    writer.abort();
    info!("WebSocket {} closed", connection_id);
}

fn encode_event(event: &ServerEvent) -> Result<String, WaitingRoomError> {
    Ok(serde_json::to_string(event)?)
}
