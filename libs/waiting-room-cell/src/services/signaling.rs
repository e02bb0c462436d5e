// libs/waiting-room-cell/src/services/signaling.rs
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, DEFAULT_MAX_MESSAGE_LENGTH};

use crate::error::{AuthError, WaitingRoomError};
use crate::models::{
    AuthenticatedIdentity, ChatMessage, ChatPayload, ClientEvent, ConnectionId, ConsultationRecord,
    Delivery, DeviceTestCompletedPayload, DeviceTestPayload, DoctorOccupant, DoctorPresencePayload,
    HubStats, JoinTicket, PatientJoinedPayload, PatientLeftPayload, PatientOccupant,
    PatientReadyPayload, PendingNotification, ReadyStatusPayload, RelayedSignal, Role, RoomSnapshot,
    ServerEvent, SignalPayload, Transport, VideoCallPayload, WaitingRoomJoinedPayload,
};
use crate::services::auth_gate::authorize_join;
use crate::services::pending::PendingNotificationQueue;
use crate::services::registry::SessionRegistry;
use crate::services::rooms::RoomStore;

#[derive(Debug, Clone)]
pub struct RouterLimits {
    pub max_message_length: usize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl RouterLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_message_length: config.max_message_length,
        }
    }
}

/// What the caller must do after an event has been handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Write these events to their connections.
    Deliver(Vec<Delivery>),
    /// Look up the consultation backing the room, then call [`SignalingRouter::complete_join`].
    Lookup(JoinTicket),
}

/// Waiting-room state machine. Every handler runs to completion without I/O and reports
/// the events to send; the hub owning the router performs the writes.
#[derive(Debug, Default)]
pub struct SignalingRouter {
    rooms: RoomStore,
    sessions: SessionRegistry,
    pending: PendingNotificationQueue,
    limits: RouterLimits,
}

impl SignalingRouter {
    pub fn new(limits: RouterLimits) -> Self {
        Self::with_parts(RoomStore::new(), SessionRegistry::new(), PendingNotificationQueue::new(), limits)
    }

    pub fn with_parts(
        rooms: RoomStore,
        sessions: SessionRegistry,
        pending: PendingNotificationQueue,
        limits: RouterLimits,
    ) -> Self {
        Self { rooms, sessions, pending, limits }
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn pending(&self) -> &PendingNotificationQueue {
        &self.pending
    }

    pub fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(|room| room.snapshot())
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_rooms: self.rooms.len(),
            connections: self.sessions.len(),
        }
    }

    pub fn connect(&mut self, connection_id: ConnectionId, principal: AuthenticatedIdentity, transport: Transport) {
        info!("Connection {} attached as {} {}", connection_id, principal.role.as_str(), principal.identity);
        self.sessions.register(connection_id, principal, transport);
    }

    /// Removes the connection from its room (notifying the counterpart) and forgets it.
    /// Safe to call for connections that are unknown or already gone.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<Delivery> {
        let deliveries = match self.sessions.current_room(connection_id).map(str::to_string) {
            Some(room_id) => self.leave(connection_id, &room_id),
            None => Vec::new(),
        };

        if let Some(session) = self.sessions.unregister(connection_id) {
            info!("Connection {} ({}) disconnected", connection_id, session.identity());
        }

        deliveries
    }

    pub fn handle(
        &mut self,
        connection_id: ConnectionId,
        event: ClientEvent,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, WaitingRoomError> {
        if event.room_id().trim().is_empty() {
            return Err(WaitingRoomError::Validation(format!("{} requires a roomId", event.name())));
        }

        if !self.sessions.is_registered(connection_id) {
            warn!("Dropping {} from unregistered connection {}", event.name(), connection_id);
            return Ok(Dispatch::Deliver(Vec::new()));
        }

        debug!("Handling {} from {}", event.name(), connection_id);

        let deliveries = match event {
            ClientEvent::JoinWaitingRoom(request) => {
                return Ok(match self.sessions.begin_join(connection_id, &request.room_id) {
                    Some(sequence) => Dispatch::Lookup(JoinTicket { sequence, request }),
                    None => Dispatch::Deliver(Vec::new()),
                });
            }
            ClientEvent::LeaveWaitingRoom(p) => {
                self.sessions.cancel_join(connection_id, &p.room_id);
                self.leave(connection_id, &p.room_id)
            }
            ClientEvent::DeviceTestResults(p) => self.device_test_results(connection_id, p, now),
            ClientEvent::PatientReady(p) => self.patient_ready(connection_id, p, now),
            ClientEvent::WaitingRoomMessage(p) => self.waiting_room_message(connection_id, p, now)?,
            ClientEvent::WebrtcOffer(p) => self.relay(connection_id, p, ServerEvent::WebrtcOffer),
            ClientEvent::WebrtcAnswer(p) => self.relay(connection_id, p, ServerEvent::WebrtcAnswer),
            ClientEvent::IceCandidate(p) => self.relay(connection_id, p, ServerEvent::IceCandidate),
            ClientEvent::DoctorStartVideoCall(p) => {
                self.video_call(connection_id, &p.room_id, ServerEvent::DoctorWantsVideoCall)?
            }
            ClientEvent::DoctorEndVideoCall(p) => {
                self.video_call(connection_id, &p.room_id, ServerEvent::DoctorEndedVideoCall)?
            }
        };

        Ok(Dispatch::Deliver(deliveries))
    }

    /// Second half of `join-waiting-room`, applied once the consultation lookup returns.
    /// State may have moved on while the lookup was in flight, so everything is
    /// re-checked here before any mutation. A ticket superseded by a later join or
    /// cancelled by a leave is dropped without effect.
    pub fn complete_join(
        &mut self,
        connection_id: ConnectionId,
        ticket: JoinTicket,
        lookup: Result<Option<ConsultationRecord>, WaitingRoomError>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, WaitingRoomError> {
        let JoinTicket { sequence, request } = ticket;

        if !self.sessions.finish_join(connection_id, sequence) {
            debug!("Dropping stale join {} to {} from {}", sequence, request.room_id, connection_id);
            return Ok(Vec::new());
        }

        let Some(session) = self.sessions.get(connection_id).cloned() else {
            return Ok(Vec::new());
        };

        let room_id = request.room_id.as_str();

        let record = lookup?
            .filter(|record| record.room_id == room_id)
            .ok_or_else(|| WaitingRoomError::RoomNotFound(room_id.to_string()))?;

        if record.is_expired(now) {
            return Err(WaitingRoomError::ConsultationExpired(room_id.to_string()));
        }

        if let (Some(requested), Some(actual)) = (request.appointment_id, record.appointment_id) {
            if requested != actual {
                return Err(WaitingRoomError::Validation(format!(
                    "appointment {} does not belong to room {}",
                    requested, room_id
                )));
            }
        }

        authorize_join(&session.principal, &record)?;

        let mut deliveries = Vec::new();
        if let Some(current) = session.current_room.as_deref() {
            if current != room_id {
                deliveries.extend(self.leave(connection_id, current));
            }
        }

        self.rooms.ensure_room(room_id, now);

        match session.role() {
            Role::Patient => self.join_as_patient(connection_id, &session.principal, &record, now, &mut deliveries),
            Role::Doctor => self.join_as_doctor(connection_id, &session.principal, &record, now, &mut deliveries),
        }

        self.sessions.set_current_room(connection_id, Some(room_id.to_string()));
        info!("{} {} joined waiting room {}", session.role().as_str(), session.identity(), room_id);

        Ok(deliveries)
    }

    fn join_as_patient(
        &mut self,
        connection_id: ConnectionId,
        principal: &AuthenticatedIdentity,
        record: &ConsultationRecord,
        now: DateTime<Utc>,
        deliveries: &mut Vec<Delivery>,
    ) {
        let room_id = record.room_id.as_str();

        let superseded = self
            .rooms
            .get(room_id)
            .and_then(|room| room.patient(&principal.identity))
            .map(|p| p.connection_id)
            .filter(|previous| *previous != connection_id);

        self.rooms.add_or_update_patient(
            room_id,
            PatientOccupant::new(&principal.identity, connection_id, now, principal.is_consultation_link()),
        );

        if let Some(previous) = superseded {
            debug!("Patient {} re-joined {} from a new connection", principal.identity, room_id);
            self.sessions.set_current_room(previous, None);
        }

        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let Some(patient) = room.patient(&principal.identity) else {
            return;
        };

        deliveries.push(Delivery::new(
            connection_id,
            ServerEvent::WaitingRoomJoined(WaitingRoomJoinedPayload {
                room_id: room_id.to_string(),
                appointment: record.summary(),
                waiting_patients: Vec::new(),
                patient_count: room.patients.len(),
                doctor_online: room.doctor.is_some(),
                messages: room.messages.clone(),
            }),
        ));

        let notice = PatientJoinedPayload {
            room_id: room_id.to_string(),
            patient: patient.summary(),
            patient_count: room.patients.len(),
        };

        match room.doctor.as_ref().map(|d| d.connection_id) {
            Some(doctor_connection) => {
                deliveries.push(Delivery::new(doctor_connection, ServerEvent::PatientJoinedWaitingRoom(notice)));
            }
            None => self.pending.enqueue(room_id, PendingNotification::patient_joined(notice, now)),
        }
    }

    fn join_as_doctor(
        &mut self,
        connection_id: ConnectionId,
        principal: &AuthenticatedIdentity,
        record: &ConsultationRecord,
        now: DateTime<Utc>,
        deliveries: &mut Vec<Delivery>,
    ) {
        let room_id = record.room_id.as_str();

        let replaced = self.rooms.set_doctor(
            room_id,
            Some(DoctorOccupant {
                identity: principal.identity.clone(),
                connection_id,
                joined_at: now,
            }),
        );

        if let Some(previous) = replaced.removed.filter(|d| d.connection_id != connection_id) {
            info!("Doctor connection {} in room {} replaced by {}", previous.connection_id, room_id, connection_id);
            if self.sessions.current_room(previous.connection_id) == Some(room_id) {
                self.sessions.set_current_room(previous.connection_id, None);
            }
        }

        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        deliveries.push(Delivery::new(
            connection_id,
            ServerEvent::WaitingRoomJoined(WaitingRoomJoinedPayload {
                room_id: room_id.to_string(),
                appointment: record.summary(),
                waiting_patients: room.patients.iter().map(PatientOccupant::summary).collect(),
                patient_count: room.patients.len(),
                doctor_online: true,
                messages: room.messages.clone(),
            }),
        ));

        let queued = self.pending.drain(room_id);
        if !queued.is_empty() {
            debug!("Replaying {} pending notifications to doctor in room {}", queued.len(), room_id);
        }
        deliveries.extend(
            queued
                .into_iter()
                .map(|notification| Delivery::new(connection_id, notification.payload)),
        );

        let joined = ServerEvent::DoctorJoinedWaitingRoom(DoctorPresencePayload {
            room_id: room_id.to_string(),
            doctor_id: Some(principal.identity.clone()),
        });
        deliveries.extend(
            room.patients
                .iter()
                .map(|p| Delivery::new(p.connection_id, joined.clone())),
        );
    }

    /// Removes the connection from whichever side of the room it occupies. Connections
    /// that do not (or no longer) occupy the room are ignored.
    fn leave(&mut self, connection_id: ConnectionId, room_id: &str) -> Vec<Delivery> {
        let mut deliveries = Vec::new();

        if self.sessions.current_room(connection_id) == Some(room_id) {
            self.sessions.set_current_room(connection_id, None);
        }

        let Some(identity) = self.sessions.get(connection_id).map(|s| s.identity().to_string()) else {
            return deliveries;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return deliveries;
        };

        let is_doctor = room.doctor.as_ref().is_some_and(|d| d.connection_id == connection_id);
        let is_patient = room
            .patient(&identity)
            .is_some_and(|p| p.connection_id == connection_id);

        let room_deleted = if is_doctor {
            let patients: Vec<ConnectionId> = room.patients.iter().map(|p| p.connection_id).collect();
            let removal = self.rooms.set_doctor(room_id, None);

            let left = ServerEvent::DoctorLeftWaitingRoom(DoctorPresencePayload {
                room_id: room_id.to_string(),
                doctor_id: removal.removed.map(|d| d.identity),
            });
            deliveries.extend(patients.into_iter().map(|c| Delivery::new(c, left.clone())));

            info!("Doctor {} left waiting room {}", identity, room_id);
            removal.room_deleted
        } else if is_patient {
            let doctor_connection = room.doctor.as_ref().map(|d| d.connection_id);
            let removal = self.rooms.remove_patient(room_id, &identity);
            let remaining = self.rooms.get(room_id).map(|r| r.patients.len()).unwrap_or(0);

            if let Some(doctor_connection) = doctor_connection {
                deliveries.push(Delivery::new(
                    doctor_connection,
                    ServerEvent::PatientLeftWaitingRoom(PatientLeftPayload {
                        room_id: room_id.to_string(),
                        patient_id: identity.clone(),
                        remaining_patients: remaining,
                    }),
                ));
            }

            info!("Patient {} left waiting room {}", identity, room_id);
            removal.room_deleted
        } else {
            debug!("Connection {} is not an occupant of {}; leave ignored", connection_id, room_id);
            false
        };

        // Queued notifications never outlive their room
        if room_deleted {
            self.pending.discard(room_id);
        }

        deliveries
    }

    fn device_test_results(
        &mut self,
        connection_id: ConnectionId,
        request: DeviceTestPayload,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        let Some(patient) = self.caller_as_patient(connection_id, &request.room_id) else {
            return Vec::new();
        };

        let ready = request.results.all_tests_passed;
        patient.device_test_completed = true;
        patient.device_test_results = Some(request.results.clone());
        patient.ready = ready;

        let payload = DeviceTestCompletedPayload {
            room_id: request.room_id.clone(),
            patient_id: patient.identity.clone(),
            results: request.results,
            ready,
        };

        self.to_doctor_or_queue(
            &request.room_id,
            PendingNotification::device_test_completed(payload, now),
        )
    }

    fn patient_ready(
        &mut self,
        connection_id: ConnectionId,
        request: PatientReadyPayload,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        let Some(patient) = self.caller_as_patient(connection_id, &request.room_id) else {
            return Vec::new();
        };

        patient.ready = request.ready;

        let payload = ReadyStatusPayload {
            room_id: request.room_id.clone(),
            patient_id: patient.identity.clone(),
            ready: request.ready,
        };

        self.to_doctor_or_queue(
            &request.room_id,
            PendingNotification::ready_status_changed(payload, now),
        )
    }

    fn waiting_room_message(
        &mut self,
        connection_id: ConnectionId,
        request: ChatPayload,
        now: DateTime<Utc>,
    ) -> Result<Vec<Delivery>, WaitingRoomError> {
        let Some(session) = self.sessions.get(connection_id) else {
            return Ok(Vec::new());
        };
        let (sender_identity, role) = (session.identity().to_string(), session.role());

        let occupants = match self.rooms.get(&request.room_id) {
            Some(room) if room.is_occupied_by(connection_id) => room.occupant_connections(),
            _ => {
                debug!("Message from {} to {} ignored: not an occupant", connection_id, request.room_id);
                return Ok(Vec::new());
            }
        };

        let text = request.message.trim();
        if text.is_empty() {
            return Err(WaitingRoomError::Validation("message cannot be empty".to_string()));
        }
        if text.chars().count() > self.limits.max_message_length {
            return Err(WaitingRoomError::Validation(format!(
                "message exceeds {} characters",
                self.limits.max_message_length
            )));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: request.room_id.clone(),
            sender_identity,
            role,
            message: text.to_string(),
            timestamp: now,
        };

        self.rooms.append_message(&request.room_id, message.clone());

        let event = ServerEvent::WaitingRoomMessage(message);
        Ok(occupants
            .into_iter()
            .map(|c| Delivery::new(c, event.clone()))
            .collect())
    }

    /// Forwards negotiation payloads untouched to every other occupant.
    fn relay(
        &mut self,
        connection_id: ConnectionId,
        request: SignalPayload,
        wrap: fn(RelayedSignal) -> ServerEvent,
    ) -> Vec<Delivery> {
        let Some(session) = self.sessions.get(connection_id) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get(&request.room_id).filter(|r| r.is_occupied_by(connection_id)) else {
            debug!("Relay from {} to {} ignored: not an occupant", connection_id, request.room_id);
            return Vec::new();
        };

        if request.role.is_some_and(|declared| declared != session.role()) {
            debug!("Relay from {} declared a role that differs from its session; using the session role", connection_id);
        }

        let event = wrap(RelayedSignal {
            room_id: request.room_id.clone(),
            payload: request.payload,
            role: session.role(),
            from: session.identity().to_string(),
        });

        room.occupant_connections()
            .into_iter()
            .filter(|c| *c != connection_id)
            .map(|c| Delivery::new(c, event.clone()))
            .collect()
    }

    fn video_call(
        &mut self,
        connection_id: ConnectionId,
        room_id: &str,
        wrap: fn(VideoCallPayload) -> ServerEvent,
    ) -> Result<Vec<Delivery>, WaitingRoomError> {
        let Some(session) = self.sessions.get(connection_id) else {
            return Ok(Vec::new());
        };
        if session.role() != Role::Doctor {
            return Err(AuthError::NotAuthorized.into());
        }

        let Some(room) = self
            .rooms
            .get(room_id)
            .filter(|r| r.doctor.as_ref().is_some_and(|d| d.connection_id == connection_id))
        else {
            debug!("Video call signal from {} ignored: not the doctor of {}", connection_id, room_id);
            return Ok(Vec::new());
        };

        let event = wrap(VideoCallPayload {
            room_id: room_id.to_string(),
            doctor_id: session.identity().to_string(),
        });

        let mut deliveries = Vec::new();
        for patient in &room.patients {
            // The occupant's own connection, not the identity's newest tab
            if self.sessions.transport(patient.connection_id).is_some() {
                deliveries.push(Delivery::new(patient.connection_id, event.clone()));
            } else {
                warn!("Patient {} in room {} has no live connection", patient.identity, room_id);
            }
        }

        Ok(deliveries)
    }

    fn caller_as_patient(&mut self, connection_id: ConnectionId, room_id: &str) -> Option<&mut PatientOccupant> {
        let identity = self.sessions.get(connection_id)?.identity().to_string();
        let patient = self.rooms.patient_mut(room_id, &identity)?;

        if patient.connection_id != connection_id {
            debug!("Ignoring update for {} from superseded connection {}", identity, connection_id);
            return None;
        }
        Some(patient)
    }

    fn to_doctor_or_queue(&mut self, room_id: &str, notification: PendingNotification) -> Vec<Delivery> {
        match self.rooms.get(room_id).and_then(|r| r.doctor.as_ref()) {
            Some(doctor) => vec![Delivery::new(doctor.connection_id, notification.payload)],
            None => {
                self.pending.enqueue(room_id, notification);
                Vec::new()
            }
        }
    }
}
