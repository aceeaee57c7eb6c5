//! Server state shared by every request
//!
//! One [`SignalRouter`] over the [`Mailboxes`] transport, behind a single
//! lock. Each public method holds the lock for its whole duration, so
//! registry check-then-act sequences stay atomic even when requests are
//! served from several threads.
//!
//! `wasmtime serve` runs every request in a fresh component instance, so the
//! deployed server keeps the router in a JSON file and loads/saves it around
//! each operation. Tests and embedders can keep it in memory instead.

use crate::config::ServerConfig;
use crate::error::SignalingError;
use crate::registry::SessionRegistry;
use crate::router::SignalRouter;
use crate::transport::Mailboxes;
use parking_lot::Mutex;
use rendezvous_protocol::{ConnectionId, InboundEvent, OutboundEvent, SessionId, VerifyOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Milliseconds since the Unix epoch
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// What the sender of an inbound event gets back directly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Accepted; any results arrive as queued events
    Ack,
    /// Answer to `verify-connection`
    Verification(VerifyOutcome),
}

enum Store {
    Memory(SignalRouter<Mailboxes>),
    File(PathBuf),
}

/// Load the router from `path`, or start empty if there is nothing usable
fn load(path: &Path, max_id_attempts: u32) -> SignalRouter<Mailboxes> {
    let mut router = match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), "discarding unreadable state file: {e}");
            SignalRouter::new(SessionRegistry::new(max_id_attempts), Mailboxes::new())
        }),
        Err(_) => SignalRouter::new(SessionRegistry::new(max_id_attempts), Mailboxes::new()),
    };
    router.registry_mut().set_max_id_attempts(max_id_attempts);
    router
}

fn save(path: &Path, router: &SignalRouter<Mailboxes>) {
    match serde_json::to_string(router) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(path = %path.display(), "failed to save state: {e}");
            }
        }
        Err(e) => warn!("failed to encode state: {e}"),
    }
}

/// Cheaply cloneable handle to the server state
#[derive(Clone)]
pub struct ServerState {
    store: Arc<Mutex<Store>>,
    max_id_attempts: u32,
    idle_timeout_ms: u64,
    clock: Clock,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Create an in-memory server state with default settings
    pub fn new() -> Self {
        Self::in_memory(&ServerConfig::default())
    }

    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::build(
            Store::Memory(SignalRouter::new(
                SessionRegistry::new(config.max_id_attempts),
                Mailboxes::new(),
            )),
            config,
        )
    }

    /// Keep state in `config.state_file`, reloading it on every call
    pub fn persistent(config: &ServerConfig) -> Self {
        Self::build(Store::File(config.state_file.clone()), config)
    }

    /// In-memory state around a prepared registry, with default settings
    pub fn with_registry(registry: SessionRegistry) -> Self {
        Self::build(
            Store::Memory(SignalRouter::new(registry, Mailboxes::new())),
            &ServerConfig::default(),
        )
    }

    /// Replace the time source used for connection liveness
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn build(store: Store, config: &ServerConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            max_id_attempts: config.max_id_attempts,
            idle_timeout_ms: config.idle_timeout_secs.saturating_mul(1000),
            clock: Arc::new(system_clock),
        }
    }

    /// Run `op` against the router after expiring idle connections
    fn with_router<R>(&self, op: impl FnOnce(&mut SignalRouter<Mailboxes>, u64) -> R) -> R {
        let now = (self.clock)();
        let mut store = self.store.lock();
        match &mut *store {
            Store::Memory(router) => {
                self.expire_idle(router, now);
                op(router, now)
            }
            Store::File(path) => {
                let mut router = load(path, self.max_id_attempts);
                self.expire_idle(&mut router, now);
                let result = op(&mut router, now);
                save(path, &router);
                result
            }
        }
    }

    /// Treat connections silent for longer than the idle timeout as disconnected
    fn expire_idle(&self, router: &mut SignalRouter<Mailboxes>, now: u64) {
        if self.idle_timeout_ms == 0 {
            return;
        }
        let cutoff = now.saturating_sub(self.idle_timeout_ms);
        for connection in router.transport().idle(cutoff) {
            info!(%connection, "closing idle connection");
            router.handle_disconnect(connection);
            router.transport_mut().close(connection);
        }
    }

    /// Open a connection or poll an existing one for events
    ///
    /// If `connection` is None or unknown, a new connection is opened.
    /// Returns (connection_id, pending_events)
    pub fn connect_or_poll(
        &self,
        connection: Option<ConnectionId>,
    ) -> (ConnectionId, Vec<OutboundEvent>) {
        self.with_router(|router, now| {
            let transport = router.transport_mut();
            if let Some(id) = connection {
                if transport.touch(id, now) {
                    return (id, transport.drain(id).unwrap_or_default());
                }
            }

            let id = transport.open(now);
            debug!(connection = %id, "connection opened");
            (id, Vec::new())
        })
    }

    /// Route one inbound event from `connection`
    pub fn dispatch(
        &self,
        connection: ConnectionId,
        event: InboundEvent,
    ) -> Result<Reply, SignalingError> {
        self.with_router(|router, now| {
            if !router.transport_mut().touch(connection, now) {
                return Err(SignalingError::UnknownConnection);
            }

            match event {
                InboundEvent::RequestHostCredentials => {
                    router.handle_host_request(connection)?;
                    Ok(Reply::Ack)
                }
                InboundEvent::ReleaseHostCredentials => {
                    router.handle_release(connection);
                    Ok(Reply::Ack)
                }
                InboundEvent::VerifyConnection(request) => {
                    match router.handle_verify(connection, &request) {
                        Ok(()) => Ok(Reply::Verification(VerifyOutcome::accepted())),
                        Err(err @ SignalingError::InvalidCredentials) => {
                            Ok(Reply::Verification(VerifyOutcome::rejected(err.to_string())))
                        }
                        Err(err) => Err(err),
                    }
                }
                InboundEvent::Signal(envelope) => {
                    router.handle_signal(connection, envelope);
                    Ok(Reply::Ack)
                }
            }
        })
    }

    /// Transport-level disconnect: session cleanup, then drop the connection
    pub fn disconnect(&self, connection: ConnectionId) -> Result<Option<SessionId>, SignalingError> {
        self.with_router(|router, _| {
            if !router.transport().contains(connection) {
                return Err(SignalingError::UnknownConnection);
            }

            let removed = router.handle_disconnect(connection);
            router.transport_mut().close(connection);
            debug!(%connection, "connection closed");
            Ok(removed)
        })
    }

    pub fn session_count(&self) -> usize {
        self.with_router(|router, _| router.registry().len())
    }

    pub fn connection_count(&self) -> usize {
        self.with_router(|router, _| router.transport().connection_count())
    }
}
