//! WASI-compatible rendezvous and relay server using wstd
//!
//! A host asks for credentials (a nine-digit session ID and an eight-character
//! password), a client presents them to join the host's session, and from then
//! on the server relays opaque negotiation messages between them until they
//! connect directly or the host goes away. Payloads are never inspected.
//!
//! # Protocol
//!
//! Connections are HTTP long-polling clients:
//!
//! - **GET /poll?connection_id={id}** - Open a connection (no id) or poll for events
//! - **POST /emit** - Send an event (X-Connection-Id header required)
//! - **POST /disconnect** - Close a connection (X-Connection-Id header required)
//! - **GET /health** - Health check
//!
//! ## Events (client → server)
//!
//! - `{"event": "request-host-credentials"}`
//! - `{"event": "release-host-credentials"}`
//! - `{"event": "verify-connection", "data": {"id": "...", "password": "..."}}`,
//!   answered inline with `{"success": true}` or
//!   `{"success": false, "message": "Invalid ID or Password"}`
//! - `{"event": "signal", "data": {"to": "<connection id>", ...}}` or
//!   `{"event": "signal", "data": {"room": "<session id>", ...}}`
//!
//! ## Events (server → client)
//!
//! Delivered in the `events` array of poll responses:
//!
//! - `host-credentials` - `{"id", "password"}` for the session you host
//! - `client-connected` - `{"callerId"}` of a client that joined your session
//! - `signal` - a relayed message with `from` set to the sender's connection ID
//! - `host-disconnected` - the host of your session is gone
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common --dir . --addr 0.0.0.0:3000 rendezvous-signaling-wasm.wasm
//!
//! # Open a connection (returns connection_id)
//! curl http://127.0.0.1:3000/poll
//!
//! # Become a host, then poll for the credentials
//! curl -X POST -H "X-Connection-Id: <host-id>" \
//!   -d '{"event":"request-host-credentials"}' http://127.0.0.1:3000/emit
//! curl "http://127.0.0.1:3000/poll?connection_id=<host-id>"
//!
//! # Join as a client
//! curl -X POST -H "X-Connection-Id: <client-id>" \
//!   -d '{"event":"verify-connection","data":{"id":"123456789","password":"a1b2c3d4"}}' \
//!   http://127.0.0.1:3000/emit
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod router;
pub mod state;
pub mod transport;

pub use config::ServerConfig;
pub use error::{ClientRequestError, ConfigError, SignalingError};
pub use handler::handle_request;
pub use registry::{Session, SessionRegistry};
pub use router::SignalRouter;
pub use state::{Reply, ServerState};
pub use transport::{Mailboxes, RoomId, Transport};
