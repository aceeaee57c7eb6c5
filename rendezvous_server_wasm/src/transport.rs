//! Delivery capability used by the router, and the in-memory mailbox transport
//!
//! The router only ever asks a transport to deliver an event to one
//! connection, deliver an event to a room, or change room membership. The
//! long-polling server backs that with per-connection event queues that
//! clients drain on every poll. A connection that stops polling is only
//! noticed by its last-seen time, see [`Mailboxes::idle`].

use rendezvous_protocol::{ConnectionId, OutboundEvent, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Room identifier; every session has a room named after its ID
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl From<&SessionId> for RoomId {
    fn from(id: &SessionId) -> Self {
        RoomId(id.0.clone())
    }
}

/// Fire-and-forget delivery to connections and rooms
pub trait Transport {
    /// Deliver `event` to one connection; unknown connections are ignored
    fn send(&mut self, to: ConnectionId, event: OutboundEvent);

    /// Deliver `event` to every current member of `room` except `except`
    fn broadcast(&mut self, room: &RoomId, except: ConnectionId, event: OutboundEvent);

    fn join(&mut self, connection: ConnectionId, room: RoomId);

    fn leave(&mut self, connection: ConnectionId, room: &RoomId);

    /// Remove every member from `room`
    fn clear_room(&mut self, room: &RoomId);

    fn is_member(&self, connection: ConnectionId, room: &RoomId) -> bool;
}

/// Per-connection state with pending events
#[derive(Debug, Default, Serialize, Deserialize)]
struct Mailbox {
    rooms: HashSet<RoomId>,
    /// Pending events to be delivered to this connection
    events: VecDeque<OutboundEvent>,
    /// Unix time in milliseconds of the last request from this connection
    last_seen_ms: u64,
}

/// In-memory transport: open connections, their queued events, and rooms
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Mailboxes {
    connections: HashMap<ConnectionId, Mailbox>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection at `now_ms` and return its ID
    pub fn open(&mut self, now_ms: u64) -> ConnectionId {
        let id = ConnectionId::new_v4();
        self.connections.insert(
            id,
            Mailbox {
                last_seen_ms: now_ms,
                ..Mailbox::default()
            },
        );
        id
    }

    /// Record activity from `connection`; false if it is not open
    pub fn touch(&mut self, connection: ConnectionId, now_ms: u64) -> bool {
        match self.connections.get_mut(&connection) {
            Some(mailbox) => {
                mailbox.last_seen_ms = mailbox.last_seen_ms.max(now_ms);
                true
            }
            None => false,
        }
    }

    /// Connections not seen since `cutoff_ms`
    pub fn idle(&self, cutoff_ms: u64) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, mailbox)| mailbox.last_seen_ms < cutoff_ms)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    /// Take every pending event for `connection`, oldest first
    pub fn drain(&mut self, connection: ConnectionId) -> Option<Vec<OutboundEvent>> {
        self.connections
            .get_mut(&connection)
            .map(|mailbox| mailbox.events.drain(..).collect())
    }

    /// Drop a connection, its pending events and all its room memberships
    pub fn close(&mut self, connection: ConnectionId) -> bool {
        let Some(mailbox) = self.connections.remove(&connection) else {
            return false;
        };
        for room in &mailbox.rooms {
            self.remove_member(connection, room);
        }
        true
    }

    /// Current members of a room
    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&mut self, connection: ConnectionId, room: &RoomId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

impl Transport for Mailboxes {
    fn send(&mut self, to: ConnectionId, event: OutboundEvent) {
        match self.connections.get_mut(&to) {
            Some(mailbox) => mailbox.events.push_back(event),
            None => debug!(%to, "dropping event for unknown connection"),
        }
    }

    fn broadcast(&mut self, room: &RoomId, except: ConnectionId, event: OutboundEvent) {
        let Some(members) = self.rooms.get(room) else {
            debug!(room = %room.0, "dropping broadcast to empty room");
            return;
        };
        for member in members.iter().filter(|m| **m != except) {
            if let Some(mailbox) = self.connections.get_mut(member) {
                mailbox.events.push_back(event.clone());
            }
        }
    }

    fn join(&mut self, connection: ConnectionId, room: RoomId) {
        let Some(mailbox) = self.connections.get_mut(&connection) else {
            return;
        };
        mailbox.rooms.insert(room.clone());
        self.rooms.entry(room).or_default().insert(connection);
    }

    fn leave(&mut self, connection: ConnectionId, room: &RoomId) {
        if let Some(mailbox) = self.connections.get_mut(&connection) {
            mailbox.rooms.remove(room);
        }
        self.remove_member(connection, room);
    }

    fn is_member(&self, connection: ConnectionId, room: &RoomId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection))
    }

    fn clear_room(&mut self, room: &RoomId) {
        let Some(members) = self.rooms.remove(room) else {
            return;
        };
        for member in members {
            if let Some(mailbox) = self.connections.get_mut(&member) {
                mailbox.rooms.remove(room);
            }
        }
    }
}
