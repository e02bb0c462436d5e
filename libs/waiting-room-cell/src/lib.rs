// libs/waiting-room-cell/src/lib.rs
//! # Waiting Room Cell
//!
//! Real-time waiting rooms for telehealth consultations. Patients wait in a room tied to
//! a consultation, complete device checks and signal readiness; the doctor sees who is
//! waiting, chats with the room, and the two sides exchange WebRTC negotiation messages
//! through the server.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Waiting Room Cell                   |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  WebSocket upgrade, HTTP handlers |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Room state & wire events         |
//! |  services/      |                                   |
//! |    auth_gate.rs |  Handshake authentication         |
//! |    directory.rs |  Consultation lookup              |
//! |    signaling.rs |  Event handling state machine     |
//! |    hub.rs       |  Task that owns all room state    |
//! |    rooms.rs     |  Room store                       |
//! |    registry.rs  |  Live sessions                    |
//! |    pending.rs   |  Events held until a doctor joins |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Endpoints
//!
//! - `GET /waiting-room/ws` - WebSocket. Credentials go in the query string:
//!   `token` + `role`, or `consultationToken` for consultation-link patients.
//! - `GET /waiting-room/rooms/{room_id}` - Snapshot of a live room (bearer auth)
//! - `GET /waiting-room/health` - Health check
//!
//! ## Wire format
//!
//! Every frame is `{"event": "<name>", "data": {...}}`. Failures are reported to the
//! sender only, as an `error` event carrying a `code`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waiting_room_cell::{router::waiting_room_routes, WaitingRoomState};
//! use shared_config::AppConfig;
//!
//! # async fn run() {
//! let config = Arc::new(AppConfig::from_env());
//! let app = axum::Router::new()
//!     .nest("/waiting-room", waiting_room_routes(WaitingRoomState::from_config(config)));
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{AuthError, WaitingRoomError};
pub use handlers::WaitingRoomState;
pub use models::{ClientEvent, ServerEvent};
