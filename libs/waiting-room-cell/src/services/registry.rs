// libs/waiting-room-cell/src/services/registry.rs
use std::collections::HashMap;

use tracing::debug;

use crate::models::{AuthenticatedIdentity, ConnectionId, Role, Transport};

#[derive(Debug, Clone)]
pub struct Session {
    pub principal: AuthenticatedIdentity,
    pub current_room: Option<String>,
    pub transport: Transport,
    /// Latest join still waiting on its consultation lookup.
    pub pending_join: Option<PendingJoin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJoin {
    pub sequence: u64,
    pub room_id: String,
}

impl Session {
    pub fn identity(&self) -> &str {
        &self.principal.identity
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }
}

/// Live connections, addressable by connection id and by identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    by_identity: HashMap<String, ConnectionId>,
    join_sequence: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the connection. A newer connection for the same identity takes over
    /// identity-based addressing; the older one stays registered until it disconnects.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        principal: AuthenticatedIdentity,
        transport: Transport,
    ) {
        if let Some(previous) = self.by_identity.insert(principal.identity.clone(), connection_id) {
            if previous != connection_id {
                debug!("Identity {} moved from connection {} to {}", principal.identity, previous, connection_id);
            }
        }

        self.sessions.insert(
            connection_id,
            Session {
                principal,
                current_room: None,
                transport,
                pending_join: None,
            },
        );
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection_id)
    }

    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    pub fn lookup_connection(&self, identity: &str) -> Option<ConnectionId> {
        self.by_identity.get(identity).copied()
    }

    pub fn lookup_transport(&self, identity: &str) -> Option<&Transport> {
        self.lookup_connection(identity)
            .and_then(|connection_id| self.transport(connection_id))
    }

    pub fn transport(&self, connection_id: ConnectionId) -> Option<&Transport> {
        self.sessions.get(&connection_id).map(|s| &s.transport)
    }

    pub fn current_room(&self, connection_id: ConnectionId) -> Option<&str> {
        self.sessions
            .get(&connection_id)
            .and_then(|s| s.current_room.as_deref())
    }

    pub fn set_current_room(&mut self, connection_id: ConnectionId, room_id: Option<String>) {
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.current_room = room_id;
        }
    }

    /// Marks a join to `room_id` as in flight, replacing any earlier one. Returns the
    /// sequence number the lookup result must present to be applied.
    pub fn begin_join(&mut self, connection_id: ConnectionId, room_id: &str) -> Option<u64> {
        let session = self.sessions.get_mut(&connection_id)?;
        self.join_sequence += 1;

        if let Some(previous) = session.pending_join.replace(PendingJoin {
            sequence: self.join_sequence,
            room_id: room_id.to_string(),
        }) {
            debug!("Join {} to {} from {} superseded", previous.sequence, previous.room_id, connection_id);
        }

        Some(self.join_sequence)
    }

    /// Drops an in-flight join to `room_id`, if that is the one pending.
    pub fn cancel_join(&mut self, connection_id: ConnectionId, room_id: &str) {
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            if session.pending_join.as_ref().is_some_and(|p| p.room_id == room_id) {
                debug!("Pending join to {} from {} cancelled", room_id, connection_id);
                session.pending_join = None;
            }
        }
    }

    /// Clears the marker and returns `true` only when `sequence` is still the
    /// connection's latest pending join.
    pub fn finish_join(&mut self, connection_id: ConnectionId, sequence: u64) -> bool {
        let Some(session) = self.sessions.get_mut(&connection_id) else {
            return false;
        };

        if session.pending_join.as_ref().is_some_and(|p| p.sequence == sequence) {
            session.pending_join = None;
            true
        } else {
            false
        }
    }

    /// Removes the connection. Safe to call repeatedly.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Session> {
        let session = self.sessions.remove(&connection_id)?;

        if self.by_identity.get(session.identity()) == Some(&connection_id) {
            self.by_identity.remove(session.identity());
        }

        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
