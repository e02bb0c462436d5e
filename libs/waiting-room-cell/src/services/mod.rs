// libs/waiting-room-cell/src/services/mod.rs

pub mod auth_gate;
pub mod directory;
pub mod hub;
pub mod pending;
pub mod registry;
pub mod rooms;
pub mod signaling;

pub use auth_gate::{AuthenticationGate, JwtSessionVerifier, SessionTokenVerifier};
pub use directory::{ConsultationDirectory, InMemoryConsultationDirectory, SupabaseConsultationDirectory};
pub use hub::WaitingRoomHub;
pub use pending::PendingNotificationQueue;
pub use registry::SessionRegistry;
pub use rooms::RoomStore;
pub use signaling::{Dispatch, RouterLimits, SignalingRouter};
