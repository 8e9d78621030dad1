//! Live-room features built on top of the persistent connection.
//!
//! The room keeps an online-viewer counter that grows whenever a viewer posts a comment:
//! the poster broadcasts [`ONLINE_COUNT_INCREASE_MSG`] and every client in the room,
//! the poster included, bumps its counter when the message comes back.

use tokio::sync::watch;

use crate::client::Client;
use crate::error::Error;
use crate::{Result, ws::WsError};

/// Message that asks every viewer to bump the online counter.
pub const ONLINE_COUNT_INCREASE_MSG: &str = "online_increase";

/// Online count shown before any update arrives.
pub const ONLINE_COUNT_INIT_VALUE: u32 = 100;

/// Longest comment accepted, in characters.
pub const COMMENT_MAX_LENGTH: usize = 128;

/// How a comment announcement reached the online counter.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    /// Broadcast over the connection; the counter moves when the message comes back
    Broadcast,
    /// The connection was down, so only the local counter was bumped
    LocalFallback,
}

/// Reject empty comments and comments longer than [`COMMENT_MAX_LENGTH`] characters.
pub fn validate_comment(comment: &str) -> Result<()> {
    if comment.trim().is_empty() {
        return Err(Error::validation("comment is empty"));
    }

    let length = comment.chars().count();
    if length > COMMENT_MAX_LENGTH {
        return Err(Error::validation(format!(
            "comment has {length} characters, at most {COMMENT_MAX_LENGTH} allowed"
        )));
    }

    Ok(())
}

/// A viewer's session in a live room.
///
/// Owns the [`Client`] and maps the host's screen lifecycle onto it.
pub struct LiveRoom {
    client: Client,
    online_count: watch::Sender<u32>,
}

impl LiveRoom {
    /// Join the room: start counting online viewers and connect.
    #[must_use]
    pub fn join(client: Client) -> Self {
        let (online_count, _) = watch::channel(ONLINE_COUNT_INIT_VALUE);

        let counter = online_count.clone();
        client.set_listener(move |text: &str| {
            if text == ONLINE_COUNT_INCREASE_MSG {
                counter.send_modify(|count| *count = count.saturating_add(1));
            }
        });
        client.connect();

        Self {
            client,
            online_count,
        }
    }

    /// The current online count.
    #[must_use]
    pub fn online_count(&self) -> u32 {
        *self.online_count.borrow()
    }

    /// Subscribe to online count changes.
    #[must_use]
    pub fn online_count_receiver(&self) -> watch::Receiver<u32> {
        self.online_count.subscribe()
    }

    /// The underlying connection.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Tell the room that a comment was posted.
    ///
    /// When the connection is down the count is bumped locally so the viewer still sees
    /// their comment counted.
    pub fn announce_comment(&self) -> Announcement {
        match self.client.send(ONLINE_COUNT_INCREASE_MSG) {
            Ok(()) => Announcement::Broadcast,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Online count broadcast failed, counting locally");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                self.online_count
                    .send_modify(|count| *count = count.saturating_add(1));
                Announcement::LocalFallback
            }
        }
    }

    /// Validate `comment` and announce it.
    pub fn post_comment(&self, comment: &str) -> Result<Announcement> {
        validate_comment(comment)?;
        if self.client.is_shut_down() {
            return Err(WsError::ShutDown.into());
        }
        Ok(self.announce_comment())
    }

    /// The screen became visible again: reconnect if a previous stop disconnected.
    pub fn on_start(&self) {
        self.client.connect();
    }

    /// The screen is in the foreground: deliver messages again.
    pub fn on_foreground(&self) {
        self.client.resume();
    }

    /// The screen went to the background: keep the connection, stop delivering.
    pub fn on_background(&self) {
        self.client.pause();
    }

    /// The screen is no longer visible. Only a finishing screen drops the connection; a
    /// temporary trip to the background keeps it open.
    pub fn on_stop(&self, finishing: bool) {
        if finishing {
            self.client.disconnect();
        }
    }

    /// Final teardown.
    pub fn on_destroy(&self) {
        self.client.shutdown();
    }
}
