// libs/waiting-room-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

// ==============================================================================
// IDENTITY & CONNECTION MODELS
// ==============================================================================

pub type ConnectionId = Uuid;

/// Outbound half of a live connection. Events written here are serialized by the
/// connection's writer task.
pub type Transport = mpsc::UnboundedSender<ServerEvent>;
pub type TransportReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "patient")]
    Patient,
    #[serde(rename = "doctor")]
    Doctor,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }
}

/// Principal attached to a connection once the authentication gate accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub identity: String,
    pub role: Role,
    /// Set for consultation-link patients; restricts them to that consultation's room.
    pub consultation_id: Option<Uuid>,
}

impl AuthenticatedIdentity {
    pub fn is_consultation_link(&self) -> bool {
        self.consultation_id.is_some()
    }
}

/// Credentials presented during the WebSocket handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeCredentials {
    pub token: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "consultationToken")]
    pub consultation_token: Option<String>,
}

// ==============================================================================
// CONSULTATION RECORD (owned by the persistence collaborator)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationRecord {
    pub id: Uuid,
    pub room_id: String,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub consultation_token: Option<String>,
}

impl ConsultationRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires_at| expires_at <= now).unwrap_or(false)
    }

    pub fn summary(&self) -> AppointmentSummary {
        AppointmentSummary {
            consultation_id: self.id,
            appointment_id: self.appointment_id,
            patient_id: self.patient_id.clone(),
            doctor_id: self.doctor_id.clone(),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentSummary {
    pub consultation_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// ROOM STATE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTestResults {
    pub all_tests_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoctorOccupant {
    pub identity: String,
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientOccupant {
    pub identity: String,
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
    pub ready: bool,
    pub device_test_completed: bool,
    pub device_test_results: Option<DeviceTestResults>,
    pub is_consultation_link: bool,
}

impl PatientOccupant {
    pub fn new(
        identity: impl Into<String>,
        connection_id: ConnectionId,
        joined_at: DateTime<Utc>,
        is_consultation_link: bool,
    ) -> Self {
        Self {
            identity: identity.into(),
            connection_id,
            joined_at,
            ready: false,
            device_test_completed: false,
            device_test_results: None,
            is_consultation_link,
        }
    }

    pub fn summary(&self) -> PatientSummary {
        PatientSummary {
            patient_id: self.identity.clone(),
            joined_at: self.joined_at,
            ready: self.ready,
            device_test_completed: self.device_test_completed,
            device_test_results: self.device_test_results.clone(),
            is_consultation_link: self.is_consultation_link,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    pub sender_identity: String,
    pub role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub room_id: String,
    pub doctor: Option<DoctorOccupant>,
    /// Join order is preserved; identities are unique.
    pub patients: Vec<PatientOccupant>,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.into(),
            doctor: None,
            patients: Vec::new(),
            messages: Vec::new(),
            created_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty() && self.doctor.is_none()
    }

    pub fn patient(&self, identity: &str) -> Option<&PatientOccupant> {
        self.patients.iter().find(|p| p.identity == identity)
    }

    pub fn patient_mut(&mut self, identity: &str) -> Option<&mut PatientOccupant> {
        self.patients.iter_mut().find(|p| p.identity == identity)
    }

    /// Connections currently occupying the room, doctor first.
    pub fn occupant_connections(&self) -> Vec<ConnectionId> {
        self.doctor
            .iter()
            .map(|d| d.connection_id)
            .chain(self.patients.iter().map(|p| p.connection_id))
            .collect()
    }

    pub fn is_occupied_by(&self, connection_id: ConnectionId) -> bool {
        self.occupant_connections().contains(&connection_id)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            doctor_online: self.doctor.is_some(),
            doctor_id: self.doctor.as_ref().map(|d| d.identity.clone()),
            patients: self.patients.iter().map(PatientOccupant::summary).collect(),
            message_count: self.messages.len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub patient_id: String,
    pub joined_at: DateTime<Utc>,
    pub ready: bool,
    pub device_test_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_test_results: Option<DeviceTestResults>,
    pub is_consultation_link: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub doctor_online: bool,
    pub doctor_id: Option<String>,
    pub patients: Vec<PatientSummary>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubStats {
    pub active_rooms: usize,
    pub connections: usize,
}

// ==============================================================================
// CLIENT -> SERVER EVENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: String,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
}

/// A join whose consultation lookup is in flight. Only the connection's latest ticket
/// is honored when the lookup returns.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTicket {
    pub sequence: u64,
    pub request: JoinRoomPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTestPayload {
    pub room_id: String,
    pub results: DeviceTestResults,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientReadyPayload {
    pub room_id: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub room_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    pub room_id: String,
    pub payload: Value,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Wire envelope: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinWaitingRoom(JoinRoomPayload),
    LeaveWaitingRoom(RoomPayload),
    DeviceTestResults(DeviceTestPayload),
    PatientReady(PatientReadyPayload),
    WaitingRoomMessage(ChatPayload),
    WebrtcOffer(SignalPayload),
    WebrtcAnswer(SignalPayload),
    IceCandidate(SignalPayload),
    DoctorStartVideoCall(RoomPayload),
    DoctorEndVideoCall(RoomPayload),
}

impl ClientEvent {
    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::JoinWaitingRoom(p) => &p.room_id,
            ClientEvent::LeaveWaitingRoom(p)
            | ClientEvent::DoctorStartVideoCall(p)
            | ClientEvent::DoctorEndVideoCall(p) => &p.room_id,
            ClientEvent::DeviceTestResults(p) => &p.room_id,
            ClientEvent::PatientReady(p) => &p.room_id,
            ClientEvent::WaitingRoomMessage(p) => &p.room_id,
            ClientEvent::WebrtcOffer(p)
            | ClientEvent::WebrtcAnswer(p)
            | ClientEvent::IceCandidate(p) => &p.room_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinWaitingRoom(_) => "join-waiting-room",
            ClientEvent::LeaveWaitingRoom(_) => "leave-waiting-room",
            ClientEvent::DeviceTestResults(_) => "device-test-results",
            ClientEvent::PatientReady(_) => "patient-ready",
            ClientEvent::WaitingRoomMessage(_) => "waiting-room-message",
            ClientEvent::WebrtcOffer(_) => "webrtc-offer",
            ClientEvent::WebrtcAnswer(_) => "webrtc-answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::DoctorStartVideoCall(_) => "doctor-start-video-call",
            ClientEvent::DoctorEndVideoCall(_) => "doctor-end-video-call",
        }
    }
}

// ==============================================================================
// SERVER -> CLIENT EVENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRoomJoinedPayload {
    pub room_id: String,
    pub appointment: AppointmentSummary,
    /// Only populated for the doctor.
    pub waiting_patients: Vec<PatientSummary>,
    pub patient_count: usize,
    pub doctor_online: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientJoinedPayload {
    pub room_id: String,
    pub patient: PatientSummary,
    pub patient_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientLeftPayload {
    pub room_id: String,
    pub patient_id: String,
    pub remaining_patients: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoctorPresencePayload {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTestCompletedPayload {
    pub room_id: String,
    pub patient_id: String,
    pub results: DeviceTestResults,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadyStatusPayload {
    pub room_id: String,
    pub patient_id: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub room_id: String,
    pub payload: Value,
    pub role: Role,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoCallPayload {
    pub room_id: String,
    pub doctor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    WaitingRoomJoined(WaitingRoomJoinedPayload),
    PatientJoinedWaitingRoom(PatientJoinedPayload),
    PatientLeftWaitingRoom(PatientLeftPayload),
    DoctorJoinedWaitingRoom(DoctorPresencePayload),
    DoctorLeftWaitingRoom(DoctorPresencePayload),
    PatientDeviceTestCompleted(DeviceTestCompletedPayload),
    PatientReadyStatusChanged(ReadyStatusPayload),
    WaitingRoomMessage(ChatMessage),
    WebrtcOffer(RelayedSignal),
    WebrtcAnswer(RelayedSignal),
    IceCandidate(RelayedSignal),
    DoctorWantsVideoCall(VideoCallPayload),
    DoctorEndedVideoCall(VideoCallPayload),
    Error(ErrorPayload),
}

/// One outbound event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub connection_id: ConnectionId,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn new(connection_id: ConnectionId, event: ServerEvent) -> Self {
        Self { connection_id, event }
    }
}

// ==============================================================================
// PENDING NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    #[serde(rename = "patient-joined")]
    PatientJoined,
    #[serde(rename = "device-test-completed")]
    DeviceTestCompleted,
    #[serde(rename = "ready-status-changed")]
    ReadyStatusChanged,
}

/// A doctor-bound event held back until a doctor is present in the room.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub kind: NotificationKind,
    pub payload: ServerEvent,
    pub queued_at: DateTime<Utc>,
}

impl PendingNotification {
    pub fn patient_joined(payload: PatientJoinedPayload, queued_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::PatientJoined,
            payload: ServerEvent::PatientJoinedWaitingRoom(payload),
            queued_at,
        }
    }

    pub fn device_test_completed(payload: DeviceTestCompletedPayload, queued_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::DeviceTestCompleted,
            payload: ServerEvent::PatientDeviceTestCompleted(payload),
            queued_at,
        }
    }

    pub fn ready_status_changed(payload: ReadyStatusPayload, queued_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::ReadyStatusChanged,
            payload: ServerEvent::PatientReadyStatusChanged(payload),
            queued_at,
        }
    }
}
