//! Joins a live room, posts a few comments and watches the online counter move.
//!
//! The default endpoint is a public echo server, so every comment announcement comes
//! straight back and bumps the counter. Point `LIVE_ROOM_ENDPOINT` at another server to try
//! a real room.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug cargo run --example live_room --features tracing
//! ```

use std::time::Duration;

use live_room_client::room::LiveRoom;
use live_room_client::ws::config::Config;
use live_room_client::{Client, DEFAULT_ENDPOINT, ENDPOINT_VAR};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::var(ENDPOINT_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
    let client = Client::new(&endpoint, Config::default())?;
    let room = LiveRoom::join(client);
    info!(%endpoint, online = room.online_count(), "Joined room");

    let mut status = room.client().status_receiver();
    if timeout(Duration::from_secs(10), status.wait_for(|s| s.state.is_connected()))
        .await
        .is_err()
    {
        warn!("Not connected yet, comments will be counted locally");
    }

    let mut online = room.online_count_receiver();
    tokio::spawn(async move {
        while online.changed().await.is_ok() {
            info!(online = *online.borrow_and_update(), "Online count changed");
        }
    });

    for comment in ["hello", "what a goal", "", "bye"] {
        match room.post_comment(comment) {
            Ok(announcement) => info!(comment, ?announcement, "Comment posted"),
            Err(e) => warn!(comment, error = %e, "Comment rejected"),
        }
        sleep(Duration::from_secs(1)).await;
    }

    // The viewer switches apps for a moment
    room.on_background();
    sleep(Duration::from_secs(3)).await;
    room.on_foreground();

    room.on_stop(true);
    room.on_destroy();
    info!(online = room.online_count(), "Left room");

    Ok(())
}
