//! HTTP long-polling handlers for the WASM rendezvous server
//!
//! Each HTTP client is one connection. It polls for queued events, posts
//! inbound events, and posts a disconnect when it goes away.

use crate::error::{ClientRequestError, SignalingError};
use crate::state::{Reply, ServerState};
use rendezvous_protocol::{ConnectionId, InboundEvent, OutboundEvent, VerifyOutcome};
use serde::Serialize;
use tracing::{debug, error};
use wstd::http::{Body, Method, Request, Response};

/// Header carrying the sender's connection ID
pub const CONNECTION_HEADER: &str = "x-connection-id";

/// Body of a poll response
#[derive(Debug, Serialize)]
struct PollResponse {
    connection_id: ConnectionId,
    events: Vec<OutboundEvent>,
}

/// A response before it becomes a `Response<Body>`
#[derive(Debug, Clone, PartialEq, Eq)]
struct HttpReply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
}

impl HttpReply {
    fn into_response(self) -> Response<Body> {
        let mut response = Response::builder().status(self.status);
        for (name, value) in self.headers {
            response = response.header(name, value);
        }
        let body = if self.body.is_empty() {
            Body::empty()
        } else {
            Body::from(self.body)
        };
        response.body(body).unwrap_or_else(|e| {
            error!("failed to build response: {e}");
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = wstd::http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

/// The request fields the router looks at
struct Incoming<'a> {
    method: &'a Method,
    path: &'a str,
    query: Option<&'a str>,
    connection: Option<&'a str>,
    body: &'a str,
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// Connection ID from the request header, if present and well formed
fn connection_id(header: Option<&str>) -> Result<ConnectionId, ClientRequestError> {
    header
        .and_then(|s| s.trim().parse().ok())
        .ok_or(ClientRequestError::MissingConnectionId)
}

/// Read the sender and the inbound event out of an emit request
fn read_event(incoming: &Incoming<'_>) -> Result<(ConnectionId, InboundEvent), ClientRequestError> {
    let sender = connection_id(incoming.connection)?;
    let event: InboundEvent = incoming.body.parse()?;
    Ok((sender, event))
}

fn respond(status: u16, content_type: &'static str, body: String) -> HttpReply {
    HttpReply {
        status,
        headers: vec![
            ("content-type", content_type),
            ("access-control-allow-origin", "*"),
        ],
        body,
    }
}

fn text(status: u16, body: &str) -> HttpReply {
    respond(status, "text/plain", body.to_string())
}

fn json(body: impl Serialize) -> HttpReply {
    match serde_json::to_string(&body) {
        Ok(body) => respond(200, "application/json", body),
        Err(e) => {
            error!("failed to encode response: {e}");
            text(500, "Internal Server Error")
        }
    }
}

fn signaling_error(err: &SignalingError) -> HttpReply {
    match err {
        SignalingError::UnknownConnection => text(404, "Connection not found"),
        SignalingError::SessionIdsExhausted { .. } => {
            error!("{err}");
            text(503, "No session IDs available")
        }
        // `dispatch` already folds failed verification into a reply; answer
        // the same way should it ever surface here.
        SignalingError::InvalidCredentials => json(VerifyOutcome::rejected(err.to_string())),
    }
}

/// Open or poll a connection - returns connection ID and pending events
fn handle_poll(connection: Option<ConnectionId>, state: &ServerState) -> HttpReply {
    let (connection_id, events) = state.connect_or_poll(connection);
    json(PollResponse {
        connection_id,
        events,
    })
}

/// Handle an inbound event POST request
fn handle_emit(incoming: &Incoming<'_>, state: &ServerState) -> HttpReply {
    let (sender, event) = match read_event(incoming) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("rejecting emit: {e}");
            return text(400, &e.to_string());
        }
    };

    match state.dispatch(sender, event) {
        Ok(Reply::Ack) => text(200, "OK"),
        Ok(Reply::Verification(outcome)) => json(outcome),
        Err(e) => signaling_error(&e),
    }
}

/// Handle a disconnect POST request
fn handle_disconnect(incoming: &Incoming<'_>, state: &ServerState) -> HttpReply {
    let connection = match connection_id(incoming.connection) {
        Ok(id) => id,
        Err(e) => return text(400, &e.to_string()),
    };

    match state.disconnect(connection) {
        Ok(_) => text(200, "OK"),
        Err(e) => signaling_error(&e),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight() -> HttpReply {
    HttpReply {
        status: 204,
        headers: vec![
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "GET, POST, OPTIONS"),
            ("access-control-allow-headers", "content-type, x-connection-id"),
            ("access-control-max-age", "86400"),
        ],
        body: String::new(),
    }
}

const INFO_PAGE: &str = "Rendezvous WASI Signaling Server (Long-Polling)\n\
    \n\
    Endpoints:\n\
    - GET /health - Health check\n\
    - GET /poll?connection_id={id} - Open a connection or poll it for events\n\
    - POST /emit - Send an event (X-Connection-Id header required)\n\
    - POST /disconnect - Close a connection (X-Connection-Id header required)\n\
    \n\
    Events (POST /emit body):\n\
    - {\"event\":\"request-host-credentials\"}\n\
    - {\"event\":\"release-host-credentials\"}\n\
    - {\"event\":\"verify-connection\",\"data\":{\"id\":\"...\",\"password\":\"...\"}}\n\
    - {\"event\":\"signal\",\"data\":{\"to\":\"<connection id>\",...}} or {\"room\":\"<session id>\",...}\n\
    \n\
    Response format: {\"connection_id\": \"uuid\", \"events\": [...]}\n";

fn route(incoming: &Incoming<'_>, state: &ServerState) -> HttpReply {
    let method = incoming.method;

    // CORS preflight
    if method == Method::OPTIONS {
        return handle_cors_preflight();
    }

    match incoming.path {
        "/health" if method == Method::GET => text(200, "OK"),
        "/poll" if method == Method::GET => {
            let connection = get_query_param(incoming.query, "connection_id")
                .and_then(|s| s.parse::<ConnectionId>().ok());
            handle_poll(connection, state)
        }
        "/emit" if method == Method::POST => handle_emit(incoming, state),
        "/disconnect" if method == Method::POST => handle_disconnect(incoming, state),
        "/" if method == Method::GET => text(200, INFO_PAGE),
        _ => text(404, "Not Found"),
    }
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let (parts, mut body) = request.into_parts();

    let contents = if parts.method == Method::POST && parts.uri.path() == "/emit" {
        match body.str_contents().await {
            Ok(contents) => contents.to_string(),
            Err(e) => {
                let err = ClientRequestError::Body(format!("{e:?}"));
                debug!("rejecting emit: {err}");
                return Ok(text(400, &err.to_string()).into_response());
            }
        }
    } else {
        String::new()
    };

    let incoming = Incoming {
        method: &parts.method,
        path: parts.uri.path(),
        query: parts.uri.query(),
        connection: parts
            .headers
            .get(CONNECTION_HEADER)
            .and_then(|v| v.to_str().ok()),
        body: &contents,
    };
    Ok(route(&incoming, state).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Repeating, SessionRegistry};

    impl HttpReply {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find_map(|(k, v)| (*k == name).then_some(*v))
        }
    }

    fn request<'a>(
        method: &'a Method,
        path: &'a str,
        connection: Option<&'a str>,
        body: &'a str,
    ) -> Incoming<'a> {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        Incoming {
            method,
            path,
            query,
            connection,
            body,
        }
    }

    fn open(state: &ServerState) -> String {
        let reply = route(&request(&Method::GET, "/poll", None, ""), state);
        assert_eq!(reply.status, 200);
        let body: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
        body["connection_id"].as_str().unwrap().to_string()
    }

    fn emit(state: &ServerState, connection: &str, body: &str) -> HttpReply {
        route(&request(&Method::POST, "/emit", Some(connection), body), state)
    }

    #[test]
    fn query_param_lookup() {
        let query = Some("a=1&connection_id=abc&b=");
        assert_eq!(get_query_param(query, "connection_id"), Some("abc"));
        assert_eq!(get_query_param(query, "b"), Some(""));
        assert_eq!(get_query_param(query, "missing"), None);
        assert_eq!(get_query_param(None, "a"), None);
    }

    #[test]
    fn poll_response_shape() {
        let id = ConnectionId::new_v4();
        let body = serde_json::to_value(PollResponse {
            connection_id: id,
            events: vec![OutboundEvent::HostDisconnected],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "connection_id": id.to_string(),
                "events": [{"event": "host-disconnected"}],
            })
        );
    }

    #[test]
    fn emit_without_valid_connection_header_is_bad_request() {
        let state = ServerState::new();
        let body = r#"{"event":"request-host-credentials"}"#;

        let missing = route(&request(&Method::POST, "/emit", None, body), &state);
        assert_eq!(missing.status, 400);
        assert_eq!(missing.body, "Missing or invalid X-Connection-Id header");

        let garbled = emit(&state, "not-a-uuid", body);
        assert_eq!(garbled.status, 400);

        let disconnect = route(&request(&Method::POST, "/disconnect", None, ""), &state);
        assert_eq!(disconnect.status, 400);
    }

    #[test]
    fn unparseable_event_is_bad_request() {
        let state = ServerState::new();
        let connection = open(&state);

        assert_eq!(emit(&state, &connection, "not json").status, 400);
        assert_eq!(emit(&state, &connection, r#"{"event":"shout"}"#).status, 400);
        assert_eq!(state.session_count(), 0);
    }

    #[test]
    fn unknown_connection_is_not_found() {
        let state = ServerState::new();
        let stranger = ConnectionId::new_v4().to_string();

        let reply = emit(&state, &stranger, r#"{"event":"request-host-credentials"}"#);
        assert_eq!(reply.status, 404);
        assert_eq!(reply.body, "Connection not found");

        let reply = route(
            &request(&Method::POST, "/disconnect", Some(&stranger), ""),
            &state,
        );
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn exhausted_session_ids_are_service_unavailable() {
        let state =
            ServerState::with_registry(SessionRegistry::with_rng(Repeating(0x1234_5678_9abc_def0), 1));
        let first = open(&state);
        let second = open(&state);
        let host_request = r#"{"event":"request-host-credentials"}"#;

        assert_eq!(emit(&state, &first, host_request).status, 200);
        let reply = emit(&state, &second, host_request);
        assert_eq!(reply.status, 503);
        assert_eq!(reply.body, "No session IDs available");
        assert_eq!(state.session_count(), 1);
    }

    #[test]
    fn preflight_advertises_cors() {
        let state = ServerState::new();
        let reply = route(&request(&Method::OPTIONS, "/emit", None, ""), &state);

        assert_eq!(reply.status, 204);
        assert!(reply.body.is_empty());
        assert_eq!(reply.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            reply.header("access-control-allow-methods"),
            Some("GET, POST, OPTIONS")
        );
        assert_eq!(
            reply.header("access-control-allow-headers"),
            Some("content-type, x-connection-id")
        );
    }

    #[test]
    fn verify_is_answered_in_the_response_body() {
        let state = ServerState::new();
        let host = open(&state);
        let client = open(&state);
        emit(&state, &host, r#"{"event":"request-host-credentials"}"#);

        let poll = route(
            &request(&Method::GET, &format!("/poll?connection_id={host}"), None, ""),
            &state,
        );
        let body: serde_json::Value = serde_json::from_str(&poll.body).unwrap();
        let credentials = &body["events"][0]["data"];

        let wrong = serde_json::json!({
            "event": "verify-connection",
            "data": {"id": credentials["id"], "password": "wrong123"},
        });
        let reply = emit(&state, &client, &wrong.to_string());
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("content-type"), Some("application/json"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&reply.body).unwrap(),
            serde_json::json!({"success": false, "message": "Invalid ID or Password"})
        );

        let right = serde_json::json!({"event": "verify-connection", "data": credentials});
        let reply = emit(&state, &client, &right.to_string());
        assert_eq!(reply.status, 200);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&reply.body).unwrap(),
            serde_json::json!({"success": true})
        );
    }

    #[test]
    fn rejected_credentials_error_maps_to_failed_outcome() {
        let reply = signaling_error(&SignalingError::InvalidCredentials);
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.body,
            r#"{"success":false,"message":"Invalid ID or Password"}"#
        );
    }

    #[test]
    fn unknown_routes_are_not_found() {
        let state = ServerState::new();

        assert_eq!(route(&request(&Method::GET, "/nope", None, ""), &state).status, 404);
        assert_eq!(route(&request(&Method::POST, "/poll", None, ""), &state).status, 404);
        assert_eq!(route(&request(&Method::GET, "/emit", None, ""), &state).status, 404);
        assert_eq!(route(&request(&Method::GET, "/health", None, ""), &state).body, "OK");
        assert_eq!(state.connection_count(), 0);
    }
}
