// libs/waiting-room-cell/src/services/hub.rs
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::WaitingRoomError;
use crate::models::{
    AuthenticatedIdentity, ClientEvent, ConnectionId, ConsultationRecord, Delivery, HubStats,
    JoinTicket, RoomSnapshot, ServerEvent, Transport,
};
use crate::services::directory::ConsultationDirectory;
use crate::services::signaling::{Dispatch, SignalingRouter};

type LookupOutcome = (
    ConnectionId,
    JoinTicket,
    Result<Option<ConsultationRecord>, WaitingRoomError>,
);

enum HubCommand {
    Connect {
        connection_id: ConnectionId,
        principal: AuthenticatedIdentity,
        transport: Transport,
    },
    Client {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Snapshot {
        room_id: String,
        reply: oneshot::Sender<Option<RoomSnapshot>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the task that owns the [`SignalingRouter`].
///
/// Every command is applied by that single task, one at a time, so room and session
/// state never needs a lock. Consultation lookups run as separate tasks and re-enter the
/// loop when they finish.
#[derive(Clone)]
pub struct WaitingRoomHub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl WaitingRoomHub {
    pub fn spawn(router: SignalingRouter, directory: Arc<dyn ConsultationDirectory>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(router, directory, inbox));
        info!("Waiting room hub started");
        Self { commands }
    }

    pub fn connect(&self, connection_id: ConnectionId, principal: AuthenticatedIdentity, transport: Transport) {
        self.send(HubCommand::Connect { connection_id, principal, transport });
    }

    pub fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) {
        self.send(HubCommand::Client { connection_id, event });
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.send(HubCommand::Disconnect { connection_id });
    }

    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Snapshot { room_id: room_id.to_string(), reply });
        response.await.ok().flatten()
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Stats { reply });
        response.await.ok()
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            error!("Waiting room hub is not running; command dropped");
        }
    }
}

async fn run_hub(
    mut router: SignalingRouter,
    directory: Arc<dyn ConsultationDirectory>,
    mut inbox: mpsc::UnboundedReceiver<HubCommand>,
) {
    let mut lookups: JoinSet<LookupOutcome> = JoinSet::new();

    loop {
        tokio::select! {
            command = inbox.recv() => {
                let Some(command) = command else { break };
                apply(&mut router, &directory, &mut lookups, command);
            }
            Some(finished) = lookups.join_next(), if !lookups.is_empty() => {
                match finished {
                    Ok((connection_id, ticket, lookup)) => {
                        let result = router.complete_join(connection_id, ticket, lookup, Utc::now());
                        settle(&router, connection_id, result);
                    }
                    Err(e) => error!("Consultation lookup task failed: {}", e),
                }
            }
        }
    }

    info!("Waiting room hub stopped");
}

fn apply(
    router: &mut SignalingRouter,
    directory: &Arc<dyn ConsultationDirectory>,
    lookups: &mut JoinSet<LookupOutcome>,
    command: HubCommand,
) {
    match command {
        HubCommand::Connect { connection_id, principal, transport } => {
            router.connect(connection_id, principal, transport);
        }
        HubCommand::Client { connection_id, event } => {
            match router.handle(connection_id, event, Utc::now()) {
                Ok(Dispatch::Deliver(deliveries)) => deliver(router, deliveries),
                Ok(Dispatch::Lookup(ticket)) => {
                    let directory = Arc::clone(directory);
                    lookups.spawn(async move {
                        let lookup = directory.find_by_room(&ticket.request.room_id).await;
                        (connection_id, ticket, lookup)
                    });
                }
                Err(e) => settle(router, connection_id, Err(e)),
            }
        }
        HubCommand::Disconnect { connection_id } => {
            let deliveries = router.disconnect(connection_id);
            deliver(router, deliveries);
        }
        HubCommand::Snapshot { room_id, reply } => {
            let _ = reply.send(router.room_snapshot(&room_id));
        }
        HubCommand::Stats { reply } => {
            let _ = reply.send(router.stats());
        }
    }
}

/// Sends the successful outcome, or reports the failure to the originating connection only.
fn settle(router: &SignalingRouter, connection_id: ConnectionId, result: Result<Vec<Delivery>, WaitingRoomError>) {
    match result {
        Ok(deliveries) => deliver(router, deliveries),
        Err(e) => {
            warn!("Event from {} rejected: {}", connection_id, e);
            deliver(router, vec![Delivery::new(connection_id, ServerEvent::Error(e.to_payload()))]);
        }
    }
}

fn deliver(router: &SignalingRouter, deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        match router.sessions().transport(delivery.connection_id) {
            Some(transport) => {
                if transport.send(delivery.event).is_err() {
                    warn!("Transport for {} is closed; event dropped", delivery.connection_id);
                }
            }
            None => debug!("No live transport for {}; event dropped", delivery.connection_id),
        }
    }
}
