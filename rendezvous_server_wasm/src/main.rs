//! WASI HTTP server entry point for the long-polling rendezvous server
//!
//! This module provides the main entry point when running as a WASI HTTP component
//! using `wasmtime serve`.

use rendezvous_server_wasm::config::DEFAULT_LOG_LEVEL;
use rendezvous_server_wasm::{ServerConfig, ServerState, handle_request, logging};
use std::cell::OnceCell;
use tracing::{info, warn};
use wstd::http::{Body, Request, Response};

// Thread-local handle for the server (WASI is single-threaded); the state
// itself lives in the state file because instances may be per request
thread_local! {
    static STATE: OnceCell<ServerState> = const { OnceCell::new() };
}

fn init_state() -> ServerState {
    let config = ServerConfig::from_env();
    logging::init_subscriber(
        config
            .as_ref()
            .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level.as_str()),
    );
    let config = config.unwrap_or_else(|e| {
        warn!("{e}; using default configuration");
        ServerConfig::default()
    });

    info!(
        port = config.port,
        idle_timeout_secs = config.idle_timeout_secs,
        state_file = %config.state_file.display(),
        "rendezvous signaling server running"
    );
    ServerState::persistent(&config)
}

fn get_or_init_state() -> ServerState {
    STATE.with(|s| s.get_or_init(init_state).clone())
}

/// The main HTTP handler for WASI
///
/// This function is called by the WASI runtime for each incoming HTTP request.
#[wstd::http_server]
async fn main(request: Request<Body>) -> Result<Response<Body>, wstd::http::Error> {
    let state = get_or_init_state();
    handle_request(request, &state).await
}
