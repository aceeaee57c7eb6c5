//! Error types for the WASM rendezvous server

use thiserror::Error;

/// Errors that can occur during signaling
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Unknown session or wrong password; deliberately indistinguishable
    #[error("Invalid ID or Password")]
    InvalidCredentials,

    /// Session ID allocation gave up after the configured number of draws
    #[error("No free session ID after {attempts} attempts")]
    SessionIdsExhausted { attempts: u32 },

    /// Unknown connection
    #[error("Unknown connection")]
    UnknownConnection,
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Missing or malformed `X-Connection-Id` header
    #[error("Missing or invalid X-Connection-Id header")]
    MissingConnectionId,

    /// Request body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),

    /// Body is not a valid inbound event
    #[error("Invalid request: {0}")]
    Protocol(#[from] rendezvous_protocol::ProtocolError),
}

/// Errors from reading the environment configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set but does not parse
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
