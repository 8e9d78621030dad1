#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::dispatch::{Dispatcher, Route};
use super::error::WsError;
use super::heartbeat::{HeartbeatMonitor, HeartbeatSignal};
use super::retry::RetrySchedule;
use super::traits::{
    ABNORMAL_CLOSURE, FrameSink, Link, NORMAL_CLOSURE, Transport, TransportEvent,
};
use crate::Result;

/// Close code sent when the client gives up on a connection that stopped answering.
const GOING_AWAY: u16 = 1001;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no attempt is scheduled
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting for the backoff delay before the next attempt
    Reconnecting {
        /// Current reconnection attempt number, starting at 1
        attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if no attempt is running or scheduled.
    #[must_use]
    pub const fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Snapshot of everything observable about the connection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connect
    pub retry_count: u32,
    /// Consecutive heartbeat probes without a reply
    pub heartbeat_failures: u32,
    /// Whether the manager has been shut down for good
    pub shut_down: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            heartbeat_failures: 0,
            shut_down: false,
        }
    }
}

/// Requests from the public handle to the state machine.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send(String),
    Disconnect,
    Shutdown,
}

/// Everything that reaches the state machine from its own background work. Each event
/// carries the generation it was created under and is ignored once that generation is over.
enum Event {
    Opened { generation: u64, result: Result<Link> },
    Transport { generation: u64, event: TransportEvent },
    Heartbeat { generation: u64, signal: HeartbeatSignal },
    RetryDue { generation: u64 },
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: &'static str },
}

/// Work scheduled on behalf of the current generation.
enum Pending {
    Idle,
    Attempt(JoinHandle<()>),
    Retry(CancellationToken),
}

/// Resources of an established connection.
struct ActiveLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: HeartbeatMonitor,
    /// How long the writer may take to flush and send the close frame
    close_grace: Duration,
}

impl ActiveLink {
    /// Tear the link down. With `close`, the writer gets `close_grace` to send a close
    /// frame before it is aborted; otherwise it is aborted right away. Either way the sink
    /// is dropped, even when the network stopped accepting writes.
    fn release(self, close: Option<(u16, &'static str)>) {
        self.heartbeat.stop();
        self.reader.abort();

        let Some((code, reason)) = close else {
            self.writer.abort();
            return;
        };

        _ = self.outbound.send(Outbound::Close { code, reason });
        let grace = self.close_grace;
        let mut writer = self.writer;
        tokio::spawn(async move {
            if timeout(grace, &mut writer).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!(?grace, "Writer did not finish closing in time, aborting it");
                writer.abort();
            }
        });
    }
}

/// Handle to the connection state machine running in the background.
///
/// All mutable connection state lives in a single task; this handle only sends commands
/// and reads the published [`Status`].
pub(crate) struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<Status>,
}

impl ConnectionManager {
    /// Spawn the state machine. Nothing is opened until [`Command::Connect`] arrives.
    pub(crate) fn spawn<T: Transport>(
        endpoint: Url,
        config: Config,
        transport: T,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::default());

        let machine = Machine {
            endpoint,
            retry: RetrySchedule::from(&config.reconnect),
            config,
            transport: Arc::new(transport),
            dispatcher,
            events_tx,
            status_tx,
            root: CancellationToken::new(),
            state: ConnectionState::Disconnected,
            generation: 0,
            heartbeat_failures: 0,
            link: None,
            pending: Pending::Idle,
        };

        tokio::spawn(machine.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            status_rx,
        }
    }

    /// Queue a command. Returns `false` once the state machine has stopped.
    pub(crate) fn command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub(crate) fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    pub(crate) fn status_receiver(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }
}

struct Machine<T: Transport> {
    endpoint: Url,
    config: Config,
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<Status>,
    /// Parent of every timer token; cancelled on shutdown
    root: CancellationToken,
    state: ConnectionState,
    /// Bumped whenever scheduled work must be invalidated
    generation: u64,
    retry: RetrySchedule,
    heartbeat_failures: u32,
    link: Option<ActiveLink>,
    pending: Pending,
}

impl<T: Transport> Machine<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    // A dropped handle is a shutdown as well
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Send(text) => self.send(text),
            Command::Disconnect => self.disconnect(),
            Command::Shutdown => self.shutdown(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Opened { generation, result } => self.on_opened(generation, result),
            Event::Transport { generation, event } => self.on_transport(generation, event),
            Event::Heartbeat { generation, signal } => self.on_heartbeat(generation, signal),
            Event::RetryDue { generation } => {
                if generation == self.generation
                    && matches!(self.state, ConnectionState::Reconnecting { .. })
                {
                    self.begin_attempt();
                }
            }
        }
    }

    fn connect(&mut self) {
        if !self.state.is_disconnected() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                state = ?self.state,
                "Connect requested while already active, ignoring"
            );
            return;
        }

        // Exhausted retries only resume through an explicit connect
        if self.retry.is_exhausted() {
            self.retry.reset();
        }

        self.begin_attempt();
    }

    fn send(&self, text: String) {
        match &self.link {
            Some(link) if self.state.is_connected() => {
                _ = link.outbound.send(Outbound::Text(text));
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Connection lost before message could be sent, dropping it");
                #[cfg(not(feature = "tracing"))]
                let _ = &text;
            }
        }
    }

    fn disconnect(&mut self) {
        self.generation += 1;
        self.cancel_pending();
        if let Some(link) = self.link.take() {
            link.release(Some((NORMAL_CLOSURE, "client disconnect")));
        }
        if self.config.reconnect.reset_attempts_on_disconnect {
            self.retry.reset();
        }
        self.transition(ConnectionState::Disconnected);
    }

    fn shutdown(&mut self) {
        if self.status_tx.borrow().shut_down {
            return;
        }

        self.disconnect();
        self.root.cancel();
        self.dispatcher.close();

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection manager shut down");

        self.status_tx.send_modify(|status| status.shut_down = true);
    }

    /// Enter `Connecting`, invalidating whatever the previous generation scheduled.
    fn begin_attempt(&mut self) {
        self.generation += 1;
        self.cancel_pending();

        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;
        let events_tx = self.events_tx.clone();

        let attempt = tokio::spawn(async move {
            let result = match timeout(connect_timeout, transport.open(&endpoint)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(WsError::Timeout.into()),
            };
            _ = events_tx.send(Event::Opened { generation, result });
        });

        self.pending = Pending::Attempt(attempt);
        self.transition(ConnectionState::Connecting);
    }

    fn on_opened(&mut self, generation: u64, result: Result<Link>) {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            // A superseded attempt; dropping the link closes it
            return;
        }
        self.pending = Pending::Idle;

        match result {
            Ok(link) => self.establish(link),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to connect: {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.schedule_retry();
            }
        }
    }

    fn establish(&mut self, link: Link) {
        let Link { sink, events } = link;
        let generation = self.generation;

        self.retry.reset();
        self.heartbeat_failures = 0;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(generation, events, self.events_tx.clone()));

        let events_tx = self.events_tx.clone();
        let heartbeat = HeartbeatMonitor::start(
            self.config.heartbeat_interval,
            self.config.max_heartbeat_failures,
            self.root.child_token(),
            move |signal| {
                events_tx
                    .send(Event::Heartbeat { generation, signal })
                    .is_ok()
            },
        );

        self.link = Some(ActiveLink {
            outbound: outbound_tx,
            reader,
            writer,
            heartbeat,
            close_grace: self.config.connect_timeout,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "WebSocket connected");

        self.transition(ConnectionState::Connected {
            since: Instant::now(),
        });
    }

    fn on_transport(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation || !self.state.is_connected() {
            return;
        }

        match event {
            TransportEvent::Message(text) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%text, "Received WebSocket text message");

                if self.dispatcher.route(text) == Route::Heartbeat
                    && let Some(link) = &self.link
                {
                    link.heartbeat.acknowledge();
                }
            }
            TransportEvent::Closed { code, reason } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(code, %reason, "WebSocket closed by peer");
                #[cfg(not(feature = "tracing"))]
                let _ = (code, &reason);

                self.drop_link(None);
                self.schedule_retry();
            }
            TransportEvent::Failure(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "WebSocket connection failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;

                self.drop_link(None);
                self.schedule_retry();
            }
        }
    }

    fn on_heartbeat(&mut self, generation: u64, signal: HeartbeatSignal) {
        if generation != self.generation || !self.state.is_connected() {
            return;
        }

        match signal {
            HeartbeatSignal::Probe => {
                if let Some(link) = &self.link {
                    let probe = self.config.heartbeat_payload.clone();
                    _ = link.outbound.send(Outbound::Text(probe));
                }
            }
            HeartbeatSignal::Recovered => {
                self.heartbeat_failures = 0;
                self.publish();
            }
            HeartbeatSignal::Missed { failures } => {
                self.heartbeat_failures = failures;
                self.publish();
            }
            HeartbeatSignal::Expired { failures } => {
                let error = WsError::HeartbeatTimeout { failures };
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Connection considered dead");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;

                self.drop_link(Some((GOING_AWAY, "heartbeat timeout")));
                self.schedule_retry();
            }
        }
    }

    /// Enter `Reconnecting` with the next backoff delay, or give up with `Disconnected`.
    fn schedule_retry(&mut self) {
        self.generation += 1;
        self.cancel_pending();

        let Some(delay) = self.retry.next_backoff() else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempts = self.retry.attempts(),
                "Reconnection attempts exhausted, staying disconnected"
            );
            self.transition(ConnectionState::Disconnected);
            return;
        };

        let generation = self.generation;
        let token = self.root.child_token();
        let timer_token = token.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = timer_token.cancelled() => {}
                () = sleep(delay) => {
                    _ = events_tx.send(Event::RetryDue { generation });
                }
            }
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.retry.attempts(), ?delay, "Scheduling reconnect");

        self.pending = Pending::Retry(token);
        self.transition(ConnectionState::Reconnecting {
            attempt: self.retry.attempts(),
        });
    }

    fn drop_link(&mut self, close: Option<(u16, &'static str)>) {
        if let Some(link) = self.link.take() {
            link.release(close);
        }
        self.heartbeat_failures = 0;
    }

    fn cancel_pending(&mut self) {
        match mem::replace(&mut self.pending, Pending::Idle) {
            Pending::Idle => {}
            Pending::Attempt(handle) => handle.abort(),
            Pending::Retry(token) => token.cancel(),
        }
    }

    fn transition(&mut self, state: ConnectionState) {
        if !state.is_connected() {
            self.heartbeat_failures = 0;
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let shut_down = self.status_tx.borrow().shut_down;
        self.status_tx.send_replace(Status {
            state: self.state,
            retry_count: self.retry.attempts(),
            heartbeat_failures: self.heartbeat_failures,
            shut_down,
        });
    }
}

/// Forward transport events to the state machine until the link ends.
async fn read_loop(
    generation: u64,
    mut events: BoxStream<'static, TransportEvent>,
    events_tx: mpsc::UnboundedSender<Event>,
) {
    while let Some(event) = events.next().await {
        let terminal = !matches!(event, TransportEvent::Message(_));
        if events_tx
            .send(Event::Transport { generation, event })
            .is_err()
            || terminal
        {
            return;
        }
    }

    _ = events_tx.send(Event::Transport {
        generation,
        event: TransportEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: "stream ended".to_owned(),
        },
    });
}

/// Own the write half so slow sends never hold up the state machine.
async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(text).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Failed to send WebSocket message");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
            Outbound::Close { code, reason } => {
                if let Err(e) = sink.close(code, reason).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Failed to close WebSocket cleanly");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
                break;
            }
        }
    }
}
