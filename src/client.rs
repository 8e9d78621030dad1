use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use url::Url;

use crate::error::Error;
use crate::ws::config::Config;
use crate::ws::connection::{Command, ConnectionManager, ConnectionState, Status};
use crate::ws::dispatch::{DeliveryQueue, Dispatcher};
use crate::ws::error::WsError;
use crate::ws::traits::{MessageListener, Transport};
use crate::ws::transport::WsTransport;
use crate::{DEFAULT_ENDPOINT, Result};

/// The handle the rest of the application holds on to.
///
/// One [`Client`] manages exactly one logical connection for its whole lifetime. It is
/// created once, connected, paused and resumed across foreground/background transitions,
/// and shut down exactly once. Dropping it shuts it down as well.
///
/// None of the methods block or panic: failures either show up in [`Client::status`] or are
/// reported by [`Client::send`].
///
/// ```rust,no_run
/// use live_room_client::Client;
/// use live_room_client::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> live_room_client::Result<()> {
///     let client = Client::new("wss://echo.websocket.org/", Config::default())?;
///     client.set_listener(|text: &str| println!("received {text}"));
///     client.connect();
///
///     let mut status = client.status_receiver();
///     status.wait_for(|status| status.state.is_connected()).await.ok();
///
///     client.send("online_increase")?;
///     Ok(())
/// }
/// ```
pub struct Client {
    connection: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
    shut_down: AtomicBool,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(DEFAULT_ENDPOINT, Config::default())
            .expect("Client with default endpoint should succeed")
    }
}

impl Client {
    /// Create a client for `endpoint` using the `tokio-tungstenite` transport.
    ///
    /// Must be called from within a Tokio runtime. The connection is not opened until
    /// [`Client::connect`].
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_transport(endpoint, config, WsTransport)
    }

    /// Create a client on top of a custom [`Transport`]. Messages are delivered from a
    /// task spawned on the current runtime.
    pub fn with_transport<T: Transport>(
        endpoint: &str,
        config: Config,
        transport: T,
    ) -> Result<Self> {
        let (client, queue) = Self::with_delivery_queue(endpoint, config, transport)?;
        tokio::spawn(queue.run());
        Ok(client)
    }

    /// Create a client whose messages are delivered by whoever drains the returned
    /// [`DeliveryQueue`], typically the host's main loop.
    pub fn with_delivery_queue<T: Transport>(
        endpoint: &str,
        config: Config,
        transport: T,
    ) -> Result<(Self, DeliveryQueue)> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported WebSocket scheme `{}`",
                endpoint.scheme()
            )));
        }

        let (dispatcher, queue) = Dispatcher::new(config.heartbeat_payload.clone());
        let dispatcher = Arc::new(dispatcher);
        let connection =
            ConnectionManager::spawn(endpoint, config, transport, Arc::clone(&dispatcher));

        let client = Self {
            connection,
            dispatcher,
            shut_down: AtomicBool::new(false),
        };

        Ok((client, queue))
    }

    /// Start connecting. A no-op while already connecting, connected or reconnecting.
    ///
    /// After automatic retries were exhausted this is the only way to resume.
    pub fn connect(&self) {
        if self.is_shut_down() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connect requested after shutdown, ignoring");
            return;
        }

        _ = self.connection.command(Command::Connect);
    }

    /// Queue `text` for sending.
    ///
    /// Only accepted while connected; the frame is written in the background so a slow
    /// network never stalls the caller. Nothing is queued or replayed for later.
    ///
    /// `Ok(())` means the frame was handed to the connection, not that it was written. If
    /// the connection drops before the frame reaches the socket, the frame is discarded.
    ///
    /// # Errors
    ///
    /// - [`WsError::NotConnected`] when the connection is not established
    /// - [`WsError::ShutDown`] after [`Client::shutdown`]
    /// - a validation error for an empty message
    pub fn send(&self, text: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(WsError::ShutDown.into());
        }
        if text.is_empty() {
            return Err(Error::validation("message is empty"));
        }
        if !self.state().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!("WebSocket not connected, message not sent");
            return Err(WsError::NotConnected.into());
        }

        if self.connection.command(Command::Send(text.to_owned())) {
            Ok(())
        } else {
            Err(WsError::ShutDown.into())
        }
    }

    /// Stop delivering messages to the listener. The connection and its heartbeat keep
    /// running; messages arriving while paused are dropped, not buffered.
    pub fn pause(&self) {
        self.dispatcher.pause();
    }

    /// Resume delivery of newly arriving messages.
    pub fn resume(&self) {
        self.dispatcher.resume();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.dispatcher.is_paused()
    }

    /// Close the connection and cancel any scheduled reconnect. The client can be
    /// connected again later.
    pub fn disconnect(&self) {
        _ = self.connection.command(Command::Disconnect);
    }

    /// Disconnect for good, release every timer and drop the listener.
    ///
    /// Idempotent. Every other method is a no-op afterwards.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispatcher.close();
        _ = self.connection.command(Command::Shutdown);
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Replace the listener for application messages.
    pub fn set_listener<L: MessageListener>(&self, listener: L) {
        if self.is_shut_down() {
            return;
        }
        self.dispatcher.set_listener(Arc::new(listener));
    }

    /// Detach the current listener; later messages are dropped.
    pub fn clear_listener(&self) {
        self.dispatcher.clear_listener();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.status().state
    }

    /// Get the current state together with the retry and heartbeat counters.
    #[must_use]
    pub fn status(&self) -> Status {
        self.connection.status()
    }

    /// Subscribe to status changes.
    ///
    /// Only the latest status is kept, so short-lived intermediate states may be skipped.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.connection.status_receiver()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}
