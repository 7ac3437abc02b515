//! Live connection membership and room fanout.
//!
//! Nothing here is persisted. A connection is registered when its socket
//! opens, joins zero or more conversation rooms, and is removed on close or
//! as soon as a send to it fails.

mod events;
mod sequencer;

pub use events::RoomEvent;
pub use sequencer::Sequencer;

use std::collections::{HashMap, HashSet};

use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};

use crate::ids::{ConnectionId, ConversationId, UserId};

struct Connection {
    user_id: UserId,
    sender: UnboundedSender<RoomEvent>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct Room {
    members: HashSet<ConnectionId>,
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<ConversationId, Room>,
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove_connection(&mut self, id: ConnectionId) -> Option<Departure> {
        let connection = self.connections.remove(&id)?;

        for room_id in &connection.rooms {
            if let Some(room) = self.rooms.get_mut(room_id) {
                room.members.remove(&id);
                if room.members.is_empty() {
                    self.rooms.remove(room_id);
                }
            }
        }

        let went_offline = match self.users.get_mut(&connection.user_id) {
            Some(live) => {
                live.remove(&id);
                live.is_empty()
            }
            None => true,
        };
        if went_offline {
            self.users.remove(&connection.user_id);
        }

        Some(Departure { user_id: connection.user_id, went_offline })
    }
}

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    /// That was the user's last live connection.
    pub went_offline: bool,
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    /// Connections found closed during this publish and removed.
    pub dropped: usize,
    reached: HashSet<UserId>,
}

impl PublishReport {
    /// At least one of the user's connections got the event.
    pub fn reached(&self, user_id: UserId) -> bool {
        self.reached.contains(&user_id)
    }
}

#[derive(Default)]
pub struct FanoutRouter {
    inner: RwLock<Registry>,
}

impl FanoutRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection for `user_id`. Events for every room it
    /// joins arrive on the returned receiver in publish order.
    pub async fn connect(&self, user_id: UserId) -> (ConnectionId, UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();

        let mut registry = self.inner.write().await;
        registry.connections.insert(
            id,
            Connection { user_id, sender: tx, rooms: HashSet::new() },
        );
        let live = registry.users.entry(user_id).or_default();
        live.insert(id);

        tracing::debug!(connection_id = %id, %user_id, live = live.len(), "connection registered");
        (id, rx)
    }

    /// Adds the connection to the room. `false` if the connection is gone.
    pub async fn join(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut registry = self.inner.write().await;
        let Some(connection) = registry.connections.get_mut(&connection_id) else {
            tracing::debug!(%connection_id, %conversation_id, "join from unknown connection ignored");
            return false;
        };

        connection.rooms.insert(conversation_id);
        registry
            .rooms
            .entry(conversation_id)
            .or_default()
            .members
            .insert(connection_id);

        tracing::debug!(%connection_id, %conversation_id, "joined room");
        true
    }

    /// Drops every membership of the connection.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<Departure> {
        let departure = self.inner.write().await.remove_connection(connection_id)?;

        if departure.went_offline {
            tracing::debug!(user_id = %departure.user_id, "user went offline");
        }
        Some(departure)
    }

    /// Sends `event` once to every connection currently in the room. A closed
    /// connection does not affect the others; it is removed instead.
    ///
    /// The write lock is held for the whole fanout, so publishes to a room
    /// are observed by each member in the order they were made.
    pub async fn publish(&self, conversation_id: ConversationId, event: RoomEvent) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.inner.write().await;

        let Some(room) = registry.rooms.get(&conversation_id) else {
            return report;
        };

        let mut dead = Vec::new();
        for connection_id in &room.members {
            let Some(connection) = registry.connections.get(connection_id) else {
                continue;
            };

            if connection.sender.send(event.clone()).is_ok() {
                report.delivered += 1;
                report.reached.insert(connection.user_id);
            } else {
                dead.push(*connection_id);
            }
        }

        for connection_id in dead {
            if let Some(departure) = registry.remove_connection(connection_id) {
                tracing::debug!(
                    %connection_id,
                    user_id = %departure.user_id,
                    %conversation_id,
                    "send failed, connection dropped"
                );
                report.dropped += 1;
            }
        }

        report
    }

    pub async fn live_connections(&self, user_id: UserId) -> usize {
        self.inner.read().await.users.get(&user_id).map_or(0, HashSet::len)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.live_connections(user_id).await > 0
    }

    pub async fn room_size(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&conversation_id)
            .map_or(0, |room| room.members.len())
    }
}
