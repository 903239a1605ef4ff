//! `gateway-server` entry point: the long-running HTTP server exposing the
//! LLM proxy routes plus the SSE and streamable-HTTP MCP transports (§2.11).
//! Unlike the stdio CLI, stdout carries nothing protocol-sensitive here, so
//! tracing goes to stdout.

mod config;
mod error;
mod handlers;
mod router;
mod state;

use config::Config;
use state::AppState;
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    tracing_subscriber::fmt().with_target(false).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(AppState::new(config));
    let app = router::build(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("[ERROR] failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, "gateway-server listening");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("[ERROR] server error: {e}");
        std::process::exit(1);
    }
}
