//! Wire types for the rendezvous signaling server
//!
//! Every event travels as an adjacently tagged JSON object:
//!
//! ```json
//! {"event": "verify-connection", "data": {"id": "123456789", "password": "a1b2c3d4"}}
//! ```
//!
//! Events without a payload omit `data` entirely, e.g. `{"event": "host-disconnected"}`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while decoding wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed connection ID
    #[error("Invalid connection ID: {0}")]
    ConnectionId(#[from] uuid::Error),
}

/// Stable identifier of one transport connection for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Allocate a fresh random connection ID
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Nine-digit session identifier handed out to hosts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A session ID and the password clients must present to join it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub id: SessionId,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Payload of a `verify-connection` request
pub type VerifyRequest = Credentials;

/// Reply to a `verify-connection` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerifyOutcome {
    pub fn accepted() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// An opaque negotiation message plus its addressing metadata
///
/// Everything except `from`, `to` and `room` is carried in `payload` and
/// relayed untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sender attribution, always overwritten by the server before relaying.
    /// A claimed value that is not a connection ID decodes as `None`.
    #[serde(
        default,
        deserialize_with = "lenient_connection_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub from: Option<ConnectionId>,

    /// Recipient connection for point-to-point delivery
    #[serde(
        default,
        deserialize_with = "lenient_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<String>,

    /// Session group for broadcast delivery, used when `to` is absent.
    /// Numeric session IDs are accepted and read as their decimal string.
    #[serde(
        default,
        deserialize_with = "lenient_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub room: Option<String>,

    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

fn lenient_connection_id<'de, D>(deserializer: D) -> Result<Option<ConnectionId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().and_then(|s| s.parse().ok())))
}

/// Strings pass through, numbers become their decimal form, anything else
/// (null, bool, array, object) is treated as absent.
fn lenient_address<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Events a connection sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Ask to become a host; answered with [`OutboundEvent::HostCredentials`]
    RequestHostCredentials,
    /// Give up the hosted session without closing the connection
    ReleaseHostCredentials,
    /// Join a session as a client
    VerifyConnection(VerifyRequest),
    /// Relay a negotiation message
    Signal(SignalEnvelope),
}

/// Events the server delivers to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Credentials for the session the receiver now hosts
    HostCredentials(Credentials),
    /// A client verified against the receiver's session
    ClientConnected {
        #[serde(rename = "callerId")]
        caller_id: ConnectionId,
    },
    /// A relayed negotiation message
    Signal(SignalEnvelope),
    /// The host of the receiver's session went away
    HostDisconnected,
}

macro_rules! json_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }

        impl FromStr for $ty {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(serde_json::from_str(s)?)
            }
        }
    };
}

json_display!(InboundEvent);
json_display!(OutboundEvent);
json_display!(VerifyOutcome);
