//! End-to-end flows through `ServerState`, the way the HTTP handlers drive it.

use rendezvous_protocol::{
    ConnectionId, Credentials, InboundEvent, OutboundEvent, SignalEnvelope, VerifyOutcome,
};
use rendezvous_server_wasm::{Reply, ServerConfig, ServerState};
use serde_json::json;
use std::collections::HashSet;

fn connect(state: &ServerState) -> ConnectionId {
    state.connect_or_poll(None).0
}

fn poll(state: &ServerState, connection: ConnectionId) -> Vec<OutboundEvent> {
    let (id, events) = state.connect_or_poll(Some(connection));
    assert_eq!(id, connection, "connection should still be open");
    events
}

fn emit(state: &ServerState, connection: ConnectionId, event: &str) -> Reply {
    state.dispatch(connection, event.parse().unwrap()).unwrap()
}

fn become_host(state: &ServerState, host: ConnectionId) -> Credentials {
    assert_eq!(emit(state, host, r#"{"event":"request-host-credentials"}"#), Reply::Ack);
    match poll(state, host).as_slice() {
        [OutboundEvent::HostCredentials(credentials)] => credentials.clone(),
        other => panic!("expected host credentials, got {other:?}"),
    }
}

fn verify(state: &ServerState, client: ConnectionId, credentials: &Credentials) -> Reply {
    let event = json!({
        "event": "verify-connection",
        "data": {"id": credentials.id, "password": credentials.password},
    });
    emit(state, client, &event.to_string())
}

#[test]
fn host_client_negotiation_and_teardown() {
    let state = ServerState::new();
    let host = connect(&state);
    let client = connect(&state);

    let credentials = become_host(&state, host);
    assert_eq!(credentials.id.as_str().len(), 9);
    assert_eq!(credentials.password.len(), 8);

    assert_eq!(
        verify(&state, client, &credentials),
        Reply::Verification(VerifyOutcome::accepted())
    );
    assert_eq!(
        poll(&state, host),
        vec![OutboundEvent::ClientConnected { caller_id: client }]
    );

    let offer = json!({
        "event": "signal",
        "data": {"to": host.to_string(), "from": "spoofed", "sdp": "..."},
    });
    assert_eq!(emit(&state, client, &offer.to_string()), Reply::Ack);

    let mut payload = serde_json::Map::new();
    payload.insert("sdp".to_string(), json!("..."));
    assert_eq!(
        poll(&state, host),
        vec![OutboundEvent::Signal(SignalEnvelope {
            from: Some(client),
            to: Some(host.to_string()),
            room: None,
            payload,
        })]
    );

    assert_eq!(state.disconnect(host).unwrap(), Some(credentials.id.clone()));
    assert_eq!(poll(&state, client), vec![OutboundEvent::HostDisconnected]);

    let retry = verify(&state, client, &credentials);
    assert_eq!(
        retry,
        Reply::Verification(VerifyOutcome::rejected("Invalid ID or Password"))
    );
}

#[test]
fn failed_verification_does_not_reveal_which_part_was_wrong() {
    let state = ServerState::new();
    let host = connect(&state);
    let client = connect(&state);
    let credentials = become_host(&state, host);

    let wrong_password = Credentials {
        id: credentials.id.clone(),
        password: credentials.password.to_uppercase(),
    };
    let missing_session = Credentials {
        id: "100000000".into(),
        password: credentials.password.clone(),
    };
    let missing_session = if missing_session.id == credentials.id {
        Credentials {
            id: "100000001".into(),
            ..missing_session
        }
    } else {
        missing_session
    };

    let a = verify(&state, client, &wrong_password);
    let b = verify(&state, client, &missing_session);
    assert_eq!(a, b);
    assert!(poll(&state, host).is_empty());
}

#[test]
fn room_broadcast_reaches_every_client_and_cleanup_notifies_each_once() {
    let state = ServerState::new();
    let host = connect(&state);
    let clients: Vec<ConnectionId> = (0..3).map(|_| connect(&state)).collect();
    let outsider = connect(&state);
    let credentials = become_host(&state, host);

    for client in &clients {
        verify(&state, *client, &credentials);
    }
    assert_eq!(poll(&state, host).len(), clients.len());

    let broadcast = json!({"event": "signal", "data": {"room": credentials.id, "type": "offer"}});
    emit(&state, host, &broadcast.to_string());

    for client in &clients {
        let events = poll(&state, *client);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OutboundEvent::Signal(e) if e.from == Some(host)));
    }
    assert!(poll(&state, host).is_empty());

    // A departing client leaves the session intact.
    state.disconnect(clients[0]).unwrap();
    assert_eq!(state.session_count(), 1);

    state.disconnect(host).unwrap();
    assert_eq!(state.session_count(), 0);
    for client in &clients[1..] {
        assert_eq!(poll(&state, *client), vec![OutboundEvent::HostDisconnected]);
    }
    assert!(poll(&state, outsider).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hosts_get_distinct_sessions() {
    let state = ServerState::new();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let state = state.clone();
            tokio::spawn(async move {
                let host = connect(&state);
                (0..8)
                    .map(|_| {
                        let other = connect(&state);
                        become_host(&state, other).id
                    })
                    .chain(std::iter::once(become_host(&state, host).id))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(ids.insert(id), "duplicate session id");
        }
    }
    assert_eq!(ids.len(), 64 * 9);
    assert_eq!(state.session_count(), 64 * 9);
}

#[test]
fn every_request_may_run_in_a_fresh_instance() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        state_file: dir.path().join("rendezvous_state.json"),
        ..ServerConfig::default()
    };
    // One handle per request, as under `wasmtime serve`
    let instance = || ServerState::persistent(&config);

    let host = connect(&instance());
    let client = connect(&instance());
    let credentials = become_host(&instance(), host);

    assert_eq!(
        verify(&instance(), client, &credentials),
        Reply::Verification(VerifyOutcome::accepted())
    );
    assert_eq!(
        poll(&instance(), host),
        vec![OutboundEvent::ClientConnected { caller_id: client }]
    );

    let answer = json!({"event": "signal", "data": {"to": host.to_string(), "sdp": "answer"}});
    assert_eq!(emit(&instance(), client, &answer.to_string()), Reply::Ack);
    match poll(&instance(), host).as_slice() {
        [OutboundEvent::Signal(SignalEnvelope { from, payload, .. })] => {
            assert_eq!(*from, Some(client));
            assert_eq!(payload["sdp"], "answer");
        }
        other => panic!("expected one signal, got {other:?}"),
    }

    instance().disconnect(host).unwrap();
    assert_eq!(poll(&instance(), client), vec![OutboundEvent::HostDisconnected]);
    assert_eq!(instance().session_count(), 0);
}
