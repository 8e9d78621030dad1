//! Prints every status change of a connection so reconnects and heartbeat failures can be
//! observed, e.g. by toggling the network while it runs.
//!
//! Run with:
//! ```sh
//! RUST_LOG=live_room_client=debug cargo run --example reconnect --features tracing
//! ```

use std::time::Duration;

use live_room_client::ws::config::{Config, ReconnectConfig};
use live_room_client::{Client, DEFAULT_ENDPOINT, ENDPOINT_VAR};
use tokio::time::timeout;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::var(ENDPOINT_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());

    let mut reconnect = ReconnectConfig::default();
    reconnect.max_attempts = None;
    let config = Config::builder()
        .heartbeat_interval(Duration::from_secs(5))
        .reconnect(reconnect)
        .build();

    let client = Client::new(&endpoint, config)?;
    client.set_listener(|text: &str| info!(%text, "Message received"));
    client.connect();

    let mut status = client.status_receiver();
    while let Ok(Ok(())) = timeout(Duration::from_secs(120), status.changed()).await {
        let current = *status.borrow_and_update();
        info!(
            state = ?current.state,
            retries = current.retry_count,
            heartbeat_failures = current.heartbeat_failures,
            "Status changed"
        );

        if current.state.is_connected()
            && let Err(e) = client.send("online_increase")
        {
            warn!(error = %e, "Send failed");
        }
    }

    client.shutdown();
    Ok(())
}
