use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use waiting_room_cell::error::WaitingRoomError;
use waiting_room_cell::models::*;
use waiting_room_cell::services::{
    ConsultationDirectory, InMemoryConsultationDirectory, RouterLimits, SignalingRouter, WaitingRoomHub,
};

const WAIT: Duration = Duration::from_secs(2);

fn record(room_id: &str, expires_in: ChronoDuration) -> ConsultationRecord {
    ConsultationRecord {
        id: Uuid::new_v4(),
        room_id: room_id.to_string(),
        appointment_id: None,
        patient_id: None,
        doctor_id: None,
        expires_at: Some(Utc::now() + expires_in),
        consultation_token: None,
    }
}

fn start_hub(records: Vec<ConsultationRecord>) -> (WaitingRoomHub, Arc<InMemoryConsultationDirectory>) {
    let directory = Arc::new(InMemoryConsultationDirectory::with_records(records));
    let hub = WaitingRoomHub::spawn(SignalingRouter::new(RouterLimits::default()), directory.clone());
    (hub, directory)
}

fn attach(hub: &WaitingRoomHub, identity: &str, role: Role) -> (ConnectionId, TransportReceiver) {
    let connection_id = Uuid::new_v4();
    let (transport, receiver) = mpsc::unbounded_channel();
    hub.connect(
        connection_id,
        AuthenticatedIdentity {
            identity: identity.to_string(),
            role,
            consultation_id: None,
        },
        transport,
    );
    (connection_id, receiver)
}

fn join(room_id: &str) -> ClientEvent {
    ClientEvent::JoinWaitingRoom(JoinRoomPayload {
        room_id: room_id.to_string(),
        appointment_id: None,
    })
}

/// Answers lookups for one room only after a delay.
struct SlowDirectory {
    inner: InMemoryConsultationDirectory,
    slow_room: String,
    delay: Duration,
}

#[async_trait]
impl ConsultationDirectory for SlowDirectory {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        if room_id == self.slow_room {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.find_by_room(room_id).await
    }

    async fn find_by_link_token(&self, token: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        self.inner.find_by_link_token(token).await
    }
}

fn start_slow_hub(records: Vec<ConsultationRecord>, slow_room: &str) -> WaitingRoomHub {
    let directory = Arc::new(SlowDirectory {
        inner: InMemoryConsultationDirectory::with_records(records),
        slow_room: slow_room.to_string(),
        delay: Duration::from_millis(200),
    });
    WaitingRoomHub::spawn(SignalingRouter::new(RouterLimits::default()), directory)
}

fn leave(room_id: &str) -> ClientEvent {
    ClientEvent::LeaveWaitingRoom(RoomPayload { room_id: room_id.to_string() })
}

async fn next_event(receiver: &mut TransportReceiver) -> ServerEvent {
    timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for event")
        .expect("transport closed")
}

#[tokio::test]
async fn test_join_through_hub() {
    let (hub, _) = start_hub(vec![record("R1", ChronoDuration::hours(1))]);
    let (patient, mut patient_rx) = attach(&hub, "patient-a", Role::Patient);
    let (doctor, mut doctor_rx) = attach(&hub, "doctor-d", Role::Doctor);

    hub.dispatch(patient, join("R1"));
    assert_matches!(next_event(&mut patient_rx).await, ServerEvent::WaitingRoomJoined(p) if !p.doctor_online);

    hub.dispatch(doctor, join("R1"));
    assert_matches!(next_event(&mut doctor_rx).await, ServerEvent::WaitingRoomJoined(p) if p.waiting_patients.len() == 1);
    assert_matches!(next_event(&mut doctor_rx).await, ServerEvent::PatientJoinedWaitingRoom(_));
    assert_matches!(next_event(&mut patient_rx).await, ServerEvent::DoctorJoinedWaitingRoom(_));

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.active_rooms, 1);
    assert_eq!(stats.connections, 2);
}

#[tokio::test]
async fn test_errors_go_only_to_sender() {
    let (hub, _) = start_hub(vec![
        record("R1", ChronoDuration::hours(1)),
        record("R2", ChronoDuration::minutes(-5)),
    ]);
    let (a, mut a_rx) = attach(&hub, "patient-a", Role::Patient);
    let (b, mut b_rx) = attach(&hub, "patient-b", Role::Patient);

    hub.dispatch(a, join("R1"));
    next_event(&mut a_rx).await;

    hub.dispatch(b, join("R2"));
    assert_matches!(next_event(&mut b_rx).await, ServerEvent::Error(e) if e.code == "consultation_expired");

    hub.dispatch(b, join("missing"));
    assert_matches!(next_event(&mut b_rx).await, ServerEvent::Error(e) if e.code == "room_not_found");

    // b stays connected and can still join a valid room
    hub.dispatch(b, join("R1"));
    assert_matches!(next_event(&mut b_rx).await, ServerEvent::WaitingRoomJoined(p) if p.patient_count == 2);

    assert!(a_rx.try_recv().is_err());
    assert!(hub.snapshot("R2").await.is_none());
}

#[tokio::test]
async fn test_join_revalidated_after_disconnect() {
    let (hub, _) = start_hub(vec![record("R1", ChronoDuration::hours(1))]);
    let (a, _a_rx) = attach(&hub, "patient-a", Role::Patient);

    // The lookup is in flight when the connection drops
    hub.dispatch(a, join("R1"));
    hub.disconnect(a);

    // Let the lookup land after the disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.active_rooms, 0);
}

#[tokio::test]
async fn test_disconnect_notifies_counterpart() {
    let (hub, _) = start_hub(vec![record("R1", ChronoDuration::hours(1))]);
    let (a, mut a_rx) = attach(&hub, "patient-a", Role::Patient);
    let (d, mut d_rx) = attach(&hub, "doctor-d", Role::Doctor);

    hub.dispatch(d, join("R1"));
    next_event(&mut d_rx).await;
    hub.dispatch(a, join("R1"));
    next_event(&mut a_rx).await;
    next_event(&mut d_rx).await;

    hub.disconnect(d);
    assert_matches!(next_event(&mut a_rx).await, ServerEvent::DoctorLeftWaitingRoom(_));

    let snapshot = hub.snapshot("R1").await.unwrap();
    assert!(!snapshot.doctor_online);
    assert_eq!(snapshot.patients.len(), 1);

    hub.disconnect(a);
    assert!(hub.snapshot("R1").await.is_none());
}

#[tokio::test]
async fn test_closed_transport_does_not_stop_delivery() {
    let (hub, _) = start_hub(vec![record("R1", ChronoDuration::hours(1))]);
    let (a, a_rx) = attach(&hub, "patient-a", Role::Patient);
    let (b, mut b_rx) = attach(&hub, "patient-b", Role::Patient);

    hub.dispatch(b, join("R1"));
    next_event(&mut b_rx).await;
    hub.dispatch(a, join("R1"));
    drop(a_rx);

    hub.dispatch(
        b,
        ClientEvent::WaitingRoomMessage(ChatPayload {
            room_id: "R1".to_string(),
            message: "anyone there?".to_string(),
        }),
    );

    assert_matches!(next_event(&mut b_rx).await, ServerEvent::WaitingRoomMessage(m) if m.message == "anyone there?");
    assert!(hub.stats().await.is_some());
}

#[tokio::test]
async fn test_leave_cancels_join_still_looking_up() {
    let hub = start_slow_hub(vec![record("R1", ChronoDuration::hours(1))], "R1");
    let (a, mut a_rx) = attach(&hub, "patient-a", Role::Patient);

    hub.dispatch(a, join("R1"));
    hub.dispatch(a, leave("R1"));

    // Outlast the slow lookup
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(hub.snapshot("R1").await.is_none());
    assert_eq!(hub.stats().await.unwrap().active_rooms, 0);
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_later_join_wins_over_slow_earlier_join() {
    let hub = start_slow_hub(
        vec![record("R1", ChronoDuration::hours(1)), record("R2", ChronoDuration::hours(1))],
        "R1",
    );
    let (a, mut a_rx) = attach(&hub, "patient-a", Role::Patient);

    hub.dispatch(a, join("R1"));
    hub.dispatch(a, join("R2"));
    assert_matches!(next_event(&mut a_rx).await, ServerEvent::WaitingRoomJoined(p) if p.room_id == "R2");

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(hub.snapshot("R1").await.is_none());
    assert_eq!(hub.snapshot("R2").await.unwrap().patients.len(), 1);
    assert!(a_rx.try_recv().is_err());
}
