//! Minimal demo binary: connects to a server using `WS_*` environment
//! variables, logs inbound frames, and shuts down cleanly on Ctrl-C.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use ws_session::config::{self, SessionTuning};
use ws_session::error::SessionError;
use ws_session::session::{Session, SessionCallbacks};

struct PrintCallbacks;

impl SessionCallbacks for PrintCallbacks {
    fn handle_message(&self, payload: Vec<u8>) {
        match std::str::from_utf8(&payload) {
            Ok(text) => info!(%text, "received message"),
            Err(_) => info!(bytes = payload.len(), "received binary message"),
        }
    }

    fn notify_max_retries_reached(&self) {
        tracing::error!("giving up: max reconnect attempts exhausted");
    }
}

async fn run() -> Result<(), SessionError> {
    let config = config::resolve_from_env()?;
    let session = Session::new(config, SessionTuning::default(), Arc::new(PrintCallbacks));
    session.start().await;

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler, stopping immediately");
    }

    info!("shutting down");
    session.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        eprintln!("{}: {e}", e.classification());
        std::process::exit(e.classification() as i32);
    }
}
