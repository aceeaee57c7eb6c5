//! Signal routing: host registration, client verification, relay and cleanup
//!
//! The router owns the session registry and drives a [`Transport`]. Every
//! handler runs to completion without yielding, so callers only need to
//! serialise calls to get atomic check-then-act behaviour.

use crate::error::SignalingError;
use crate::registry::SessionRegistry;
use crate::transport::{RoomId, Transport};
use rendezvous_protocol::{
    ConnectionId, Credentials, OutboundEvent, SessionId, SignalEnvelope, VerifyRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where a signal is headed
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Connection(ConnectionId),
    Room(RoomId),
}

/// `to` wins when present and non-empty; otherwise fall back to `room`.
/// A `to` that is not a connection ID resolves to nothing.
fn resolve(envelope: &SignalEnvelope) -> Option<Target> {
    match envelope.to.as_deref().filter(|to| !to.is_empty()) {
        Some(to) => to.parse().ok().map(Target::Connection),
        None => envelope
            .room
            .as_deref()
            .filter(|room| !room.is_empty())
            .map(|room| Target::Room(RoomId(room.to_string()))),
    }
}

#[derive(Serialize, Deserialize)]
pub struct SignalRouter<T> {
    registry: SessionRegistry,
    transport: T,
}

impl<T: Transport> SignalRouter<T> {
    pub fn new(registry: SessionRegistry, transport: T) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Make `connection` the host of a new session.
    ///
    /// The credentials are returned and also delivered to the connection as
    /// `host-credentials`. A connection that already hosts a session gets its
    /// existing credentials again.
    pub fn handle_host_request(
        &mut self,
        connection: ConnectionId,
    ) -> Result<Credentials, SignalingError> {
        let credentials = match self.registry.find_by_host(connection) {
            Some(session) => {
                debug!(session = %session.id, %connection, "host already registered");
                session.credentials()
            }
            None => {
                let credentials = self.registry.create_session(connection)?;
                self.transport
                    .join(connection, RoomId::from(&credentials.id));
                info!(session = %credentials.id, %connection, "host registered");
                credentials
            }
        };

        self.transport
            .send(connection, OutboundEvent::HostCredentials(credentials.clone()));
        Ok(credentials)
    }

    /// Admit `connection` as a client of the session named in `request`.
    ///
    /// Unknown sessions and wrong passwords fail identically.
    pub fn handle_verify(
        &mut self,
        connection: ConnectionId,
        request: &VerifyRequest,
    ) -> Result<(), SignalingError> {
        let host = match self.registry.lookup(&request.id) {
            Some(session) if session.accepts(&request.password) => session.host,
            _ => {
                warn!(session = %request.id, %connection, "failed connection attempt");
                return Err(SignalingError::InvalidCredentials);
            }
        };

        self.transport.join(connection, RoomId::from(&request.id));
        self.transport.send(
            host,
            OutboundEvent::ClientConnected {
                caller_id: connection,
            },
        );
        info!(session = %request.id, client = %connection, "client verified");
        Ok(())
    }

    /// Relay a signal, stamping the true sender.
    ///
    /// Unroutable signals are dropped, and a sender never receives its own
    /// signal back. Only members of a room may broadcast to it.
    pub fn handle_signal(&mut self, connection: ConnectionId, mut envelope: SignalEnvelope) {
        envelope.from = Some(connection);

        match resolve(&envelope) {
            Some(Target::Connection(to)) if to == connection => {
                debug!(%connection, "ignoring signal addressed to its sender");
            }
            Some(Target::Connection(to)) => {
                debug!(from = %connection, %to, "relaying signal");
                self.transport.send(to, OutboundEvent::Signal(envelope));
            }
            Some(Target::Room(room)) if !self.transport.is_member(connection, &room) => {
                debug!(from = %connection, room = %room.0, "dropping room signal from non-member");
            }
            Some(Target::Room(room)) => {
                debug!(from = %connection, room = %room.0, "broadcasting signal");
                self.transport
                    .broadcast(&room, connection, OutboundEvent::Signal(envelope));
            }
            None => debug!(from = %connection, "dropping unroutable signal"),
        }
    }

    /// Clean up after a connection went away.
    ///
    /// If it hosted a session, the session is removed, the rest of its room
    /// is told the host is gone, and the room is dissolved. The connection's
    /// own teardown is left to the transport.
    pub fn handle_disconnect(&mut self, connection: ConnectionId) -> Option<SessionId> {
        self.end_session(connection)
    }

    /// Give up the session hosted by `connection` while staying connected
    pub fn handle_release(&mut self, connection: ConnectionId) -> Option<SessionId> {
        self.end_session(connection)
    }

    /// Clients verified against a dead session must not carry over into a
    /// later session that draws the same ID, so the room goes with it.
    fn end_session(&mut self, connection: ConnectionId) -> Option<SessionId> {
        let id = self.registry.remove_by_host_connection(connection)?;
        info!(session = %id, host = %connection, "host session removed");
        let room = RoomId::from(&id);
        self.transport
            .broadcast(&room, connection, OutboundEvent::HostDisconnected);
        self.transport.clear_room(&room);
        Some(id)
    }
}
