//! Session registry
//!
//! Maps each active session ID to its password and the connection hosting it.
//! A session lives exactly as long as its host registration.

use crate::credentials;
use crate::error::SignalingError;
use rand::CryptoRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rendezvous_protocol::{ConnectionId, Credentials, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default bound on session ID draws before giving up
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 1024;

/// One active session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    secret: String,
    pub host: ConnectionId,
}

impl Session {
    /// Exact, case-sensitive password check
    pub fn accepts(&self, secret: &str) -> bool {
        self.secret == secret
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            id: self.id.clone(),
            password: self.secret.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Owner of all active sessions and of the generator their credentials come from
///
/// Only the sessions are serialized; a deserialized registry draws from the
/// operating system's generator with the default retry bound.
#[derive(Serialize, Deserialize)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    #[serde(skip, default = "system_rng")]
    rng: Box<dyn CryptoRng + Send>,
    #[serde(skip, default = "default_max_id_attempts")]
    max_id_attempts: u32,
}

fn system_rng() -> Box<dyn CryptoRng + Send> {
    Box::new(OsRng.unwrap_err())
}

fn default_max_id_attempts() -> u32 {
    DEFAULT_MAX_ID_ATTEMPTS
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ID_ATTEMPTS)
    }
}

impl SessionRegistry {
    /// Create an empty registry drawing from the operating system's generator
    pub fn new(max_id_attempts: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            rng: system_rng(),
            max_id_attempts: max_id_attempts.max(1),
        }
    }

    /// Create an empty registry drawing from `rng`
    pub fn with_rng(rng: impl CryptoRng + Send + 'static, max_id_attempts: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            rng: Box::new(rng),
            max_id_attempts: max_id_attempts.max(1),
        }
    }

    /// Register a new session hosted by `host` and return its credentials.
    ///
    /// Session IDs are redrawn until one is free; after `max_id_attempts`
    /// collisions the registry is left untouched and an error is returned.
    pub fn create_session(&mut self, host: ConnectionId) -> Result<Credentials, SignalingError> {
        let id = self.allocate_id()?;
        let secret = credentials::password(&mut *self.rng);
        let session = Session {
            id: id.clone(),
            secret,
            host,
        };
        let credentials = session.credentials();
        self.sessions.insert(id, session);
        Ok(credentials)
    }

    fn allocate_id(&mut self) -> Result<SessionId, SignalingError> {
        for _ in 0..self.max_id_attempts {
            let candidate = SessionId(credentials::session_id(&mut *self.rng));
            if !self.sessions.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(SignalingError::SessionIdsExhausted {
            attempts: self.max_id_attempts,
        })
    }

    pub fn lookup(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// The session hosted by `connection`, if any
    pub fn find_by_host(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.values().find(|s| s.host == connection)
    }

    /// Remove the session hosted by `connection` and return its ID
    pub fn remove_by_host_connection(&mut self, connection: ConnectionId) -> Option<SessionId> {
        let id = self.find_by_host(connection)?.id.clone();
        self.sessions.remove(&id);
        Some(id)
    }

    pub fn set_max_id_attempts(&mut self, max_id_attempts: u32) {
        self.max_id_attempts = max_id_attempts.max(1);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Generator that repeats one word forever, so every session ID draw collides
#[cfg(test)]
pub(crate) struct Repeating(pub u64);

#[cfg(test)]
impl rand::RngCore for Repeating {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.0.to_le_bytes()[i % 8];
        }
    }
}

#[cfg(test)]
impl CryptoRng for Repeating {}
