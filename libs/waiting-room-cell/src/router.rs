// libs/waiting-room-cell/src/router.rs
use axum::{
    middleware,
    routing::get,
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_room_snapshot, waiting_room_health, waiting_room_socket, WaitingRoomState};

pub fn waiting_room_routes(state: WaitingRoomState) -> Router {
    // The socket authenticates its own handshake (query-string credentials)
    let public_routes = Router::new()
        .route("/health", get(waiting_room_health))
        .route("/ws", get(waiting_room_socket));

    let protected_routes = Router::new()
        .route("/rooms/{room_id}", get(get_room_snapshot))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
