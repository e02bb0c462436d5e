// libs/waiting-room-cell/src/services/pending.rs
use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::models::PendingNotification;

/// Per-room FIFO of doctor-bound events produced while no doctor was present.
#[derive(Debug, Default)]
pub struct PendingNotificationQueue {
    queues: HashMap<String, VecDeque<PendingNotification>>,
}

impl PendingNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, room_id: &str, notification: PendingNotification) {
        debug!("Queueing {:?} notification for room {}", notification.kind, room_id);
        self.queues
            .entry(room_id.to_string())
            .or_default()
            .push_back(notification);
    }

    /// Removes and returns everything queued for the room, oldest first.
    pub fn drain(&mut self, room_id: &str) -> Vec<PendingNotification> {
        self.queues
            .remove(room_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn discard(&mut self, room_id: &str) {
        if let Some(dropped) = self.queues.remove(room_id) {
            debug!("Discarded {} pending notifications for room {}", dropped.len(), room_id);
        }
    }

    pub fn len(&self, room_id: &str) -> usize {
        self.queues.get(room_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, room_id: &str) -> bool {
        self.len(room_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{NotificationKind, ReadyStatusPayload};

    fn ready(room_id: &str, patient_id: &str, ready: bool) -> PendingNotification {
        PendingNotification::ready_status_changed(
            ReadyStatusPayload {
                room_id: room_id.to_string(),
                patient_id: patient_id.to_string(),
                ready,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_drain_preserves_enqueue_order() {
        let mut queue = PendingNotificationQueue::new();
        queue.enqueue("R1", ready("R1", "A", true));
        queue.enqueue("R1", ready("R1", "B", true));
        queue.enqueue("R1", ready("R1", "A", false));

        let drained = queue.drain("R1");
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|n| n.kind == NotificationKind::ReadyStatusChanged));
        assert_eq!(drained[0], ready_at(&drained[0], "A", true));
        assert_eq!(drained[1], ready_at(&drained[1], "B", true));
        assert_eq!(drained[2], ready_at(&drained[2], "A", false));
    }

    fn ready_at(original: &PendingNotification, patient_id: &str, flag: bool) -> PendingNotification {
        let mut expected = ready("R1", patient_id, flag);
        expected.queued_at = original.queued_at;
        expected
    }

    #[test]
    fn test_drain_is_exactly_once() {
        let mut queue = PendingNotificationQueue::new();
        queue.enqueue("R1", ready("R1", "A", true));

        assert_eq!(queue.drain("R1").len(), 1);
        assert!(queue.drain("R1").is_empty());
        assert!(queue.is_empty("R1"));
    }

    #[test]
    fn test_rooms_are_isolated() {
        let mut queue = PendingNotificationQueue::new();
        queue.enqueue("R1", ready("R1", "A", true));
        queue.enqueue("R2", ready("R2", "B", true));

        queue.discard("R1");
        assert_eq!(queue.len("R1"), 0);
        assert_eq!(queue.len("R2"), 1);
    }
}
