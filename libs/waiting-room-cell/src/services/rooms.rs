// libs/waiting-room-cell/src/services/rooms.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{ChatMessage, DoctorOccupant, PatientOccupant, Room};

/// Result of a removal that may have emptied (and therefore deleted) the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal<T> {
    pub removed: Option<T>,
    pub room_deleted: bool,
}

/// In-memory room state keyed by room id. Rooms are created lazily and deleted as soon as
/// they have neither patients nor a doctor.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<String, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn patient_mut(&mut self, room_id: &str, identity: &str) -> Option<&mut PatientOccupant> {
        self.rooms.get_mut(room_id)?.patient_mut(identity)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn ensure_room(&mut self, room_id: &str, now: DateTime<Utc>) -> &mut Room {
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Creating waiting room {}", room_id);
            Room::new(room_id, now)
        })
    }

    /// Upserts by identity. A re-joining patient keeps its readiness and device-test
    /// state; only the connection and link flag are refreshed. Returns `true` when the
    /// patient was not previously in the room.
    pub fn add_or_update_patient(&mut self, room_id: &str, patient: PatientOccupant) -> Option<bool> {
        let room = self.rooms.get_mut(room_id)?;

        match room.patient_mut(&patient.identity) {
            Some(existing) => {
                existing.connection_id = patient.connection_id;
                existing.is_consultation_link = patient.is_consultation_link;
                Some(false)
            }
            None => {
                room.patients.push(patient);
                Some(true)
            }
        }
    }

    pub fn remove_patient(&mut self, room_id: &str, identity: &str) -> Removal<PatientOccupant> {
        let removed = self.rooms.get_mut(room_id).and_then(|room| {
            let index = room.patients.iter().position(|p| p.identity == identity)?;
            Some(room.patients.remove(index))
        });

        let room_deleted = removed.is_some() && self.delete_if_empty(room_id);
        Removal { removed, room_deleted }
    }

    /// Assigns (or with `None`, vacates) the doctor slot. Returns the previous occupant.
    pub fn set_doctor(&mut self, room_id: &str, doctor: Option<DoctorOccupant>) -> Removal<DoctorOccupant> {
        let vacating = doctor.is_none();
        let removed = match self.rooms.get_mut(room_id) {
            Some(room) => std::mem::replace(&mut room.doctor, doctor),
            None => None,
        };

        let room_deleted = vacating && self.delete_if_empty(room_id);
        Removal { removed, room_deleted }
    }

    pub fn append_message(&mut self, room_id: &str, message: ChatMessage) -> Option<&ChatMessage> {
        let room = self.rooms.get_mut(room_id)?;
        room.messages.push(message);
        room.messages.last()
    }

    /// Deletes the room when it has no occupants. Returns whether it was deleted.
    pub fn delete_if_empty(&mut self, room_id: &str) -> bool {
        let empty = self.rooms.get(room_id).map(Room::is_empty).unwrap_or(false);
        if empty {
            self.rooms.remove(room_id);
            info!("Deleted empty waiting room {}", room_id);
        }
        empty
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
