use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::dto::events::ServerEvent;

/// Delivery failure towards a single connection. Real-time push is best-effort.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("connection `{0}` is not available")]
    Unavailable(Uuid),
}

/// Room addressed by session id.
pub fn session_room(session_id: Uuid) -> String {
    format!("session:{session_id}")
}

/// Room addressed by join code.
pub fn code_room(join_code: &str) -> String {
    format!("code:{}", join_code.trim().to_uppercase())
}

/// Rooms a session-wide event is mirrored to.
pub fn session_rooms(session_id: Uuid, join_code: Option<&str>) -> Vec<String> {
    let mut rooms = vec![session_room(session_id)];
    rooms.extend(join_code.map(code_room));
    rooms
}

struct Connection {
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RoomHubInner {
    connections: DashMap<Uuid, Connection>,
    rooms: DashMap<String, HashSet<Uuid>>,
}

/// Registry of socket connections grouped into rooms.
///
/// Every connection owns one unbounded channel drained by its writer task, so events sent to a
/// connection keep their order.
#[derive(Clone, Default)]
pub struct RoomHub {
    inner: Arc<RoomHubInner>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and the channel feeding its writer task.
    pub fn connect(&self, connection: Uuid, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.inner.connections.insert(
            connection,
            Connection {
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Forget a connection and leave every room it had joined.
    pub fn disconnect(&self, connection: Uuid) {
        let Some((_, removed)) = self.inner.connections.remove(&connection) else {
            return;
        };
        for room in removed.rooms {
            self.remove_member(&room, connection);
        }
    }

    pub fn is_connected(&self, connection: Uuid) -> bool {
        self.inner.connections.contains_key(&connection)
    }

    /// Add the connection to `room`. Returns `false` for an unknown connection.
    pub fn join(&self, connection: Uuid, room: &str) -> bool {
        let Some(mut entry) = self.inner.connections.get_mut(&connection) else {
            return false;
        };
        entry.rooms.insert(room.to_owned());
        drop(entry);
        self.inner
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection);
        true
    }

    pub fn leave(&self, connection: Uuid, room: &str) {
        if let Some(mut entry) = self.inner.connections.get_mut(&connection) {
            entry.rooms.remove(room);
        }
        self.remove_member(room, connection);
    }

    pub fn members(&self, room: &str) -> Vec<Uuid> {
        self.inner
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Deliver to every member of `room`. Returns how many connections accepted the event.
    pub fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
        self.deliver(self.members(room), event)
    }

    /// Deliver once to every connection that belongs to at least one of `rooms`.
    pub fn broadcast_many(&self, rooms: &[String], event: &ServerEvent) -> usize {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        for room in rooms {
            for member in self.members(room) {
                if seen.insert(member) {
                    targets.push(member);
                }
            }
        }
        self.deliver(targets, event)
    }

    /// Deliver to a single connection.
    pub fn send_to(&self, connection: Uuid, event: ServerEvent) -> Result<(), BroadcastError> {
        let sent = self
            .inner
            .connections
            .get(&connection)
            .map(|entry| entry.tx.send(event).is_ok());
        match sent {
            Some(true) => Ok(()),
            Some(false) => {
                self.disconnect(connection);
                Err(BroadcastError::Unavailable(connection))
            }
            None => Err(BroadcastError::Unavailable(connection)),
        }
    }

    fn deliver(&self, targets: Vec<Uuid>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for connection in targets {
            match self.send_to(connection, event.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => debug!(event = %event.event, error = %err, "dropping event"),
            }
        }
        delivered
    }

    fn remove_member(&self, room: &str, connection: Uuid) {
        let now_empty = self
            .inner
            .rooms
            .get_mut(room)
            .map(|mut members| {
                members.remove(&connection);
                members.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            self.inner.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::json(name, &json!({ "n": name })).unwrap()
    }

    #[test]
    fn broadcast_many_delivers_one_copy_per_connection() {
        let hub = RoomHub::new();
        let session = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        hub.connect(a, tx_a);
        hub.connect(b, tx_b);
        hub.join(a, &session_room(session));
        hub.join(a, &code_room("abc123"));
        hub.join(b, &code_room("ABC123"));

        let rooms = session_rooms(session, Some("abc123"));
        assert_eq!(hub.broadcast_many(&rooms, &event("quiz:question")), 2);

        assert_eq!(rx_a.try_recv().unwrap().event, "quiz:question");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().event, "quiz:question");
    }

    #[test]
    fn events_keep_their_order_per_connection() {
        let hub = RoomHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();
        hub.connect(connection, tx);
        hub.join(connection, "room");

        for name in ["first", "second", "third"] {
            hub.broadcast("room", &event(name));
        }

        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.event)
            .collect();
        assert_eq!(received, ["first", "second", "third"]);
    }

    #[test]
    fn closed_connection_is_dropped_from_its_rooms() {
        let hub = RoomHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();
        hub.connect(connection, tx);
        hub.join(connection, "room");
        drop(rx);

        assert_eq!(hub.broadcast("room", &event("x")), 0);
        assert!(!hub.is_connected(connection));
        assert!(hub.members("room").is_empty());
        assert_eq!(
            hub.send_to(connection, event("y")),
            Err(BroadcastError::Unavailable(connection))
        );
    }
}
