#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper in this module"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as stream_channel;
use live_room_client::Client;
use live_room_client::Result;
use live_room_client::ws::{FrameSink, Link, Status, Transport, TransportEvent, WsError};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

/// Endpoint handed to clients built on [`ScriptedTransport`]; never dialled.
pub const ENDPOINT: &str = "ws://live.test/room";

/// How long a test waits for something that should happen, in (possibly paused) time.
pub const PATIENCE: Duration = Duration::from_secs(600);

/// What the next call to [`Transport::open`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Hand out a working link
    Accept,
    /// Fail right away
    Refuse,
    /// Never complete
    Hang,
    /// Hand out a link whose writes never complete, like a socket on a dead network
    Stall,
}

/// A frame the client wrote to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

struct Script {
    outcomes: Mutex<VecDeque<Outcome>>,
    /// Used once `outcomes` is empty
    fallback: Outcome,
    /// Whether links echo every text frame back, like an echo server
    echo: bool,
    opens: AtomicUsize,
    /// Sinks handed out and not dropped yet
    live_sinks: AtomicUsize,
    remotes: mpsc::UnboundedSender<Remote>,
}

/// Transport that plays back a fixed list of outcomes and exposes every accepted link
/// through a [`Remote`].
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Script>,
}

impl ScriptedTransport {
    pub fn new<I: IntoIterator<Item = Outcome>>(outcomes: I) -> (Self, Remotes) {
        Self::build(outcomes, Outcome::Refuse, false)
    }

    /// Like [`ScriptedTransport::new`], with links that echo every frame back.
    pub fn echoing<I: IntoIterator<Item = Outcome>>(outcomes: I) -> (Self, Remotes) {
        Self::build(outcomes, Outcome::Refuse, true)
    }

    /// Every attempt ends the same way.
    pub fn always(outcome: Outcome) -> (Self, Remotes) {
        Self::build([], outcome, false)
    }

    fn build<I: IntoIterator<Item = Outcome>>(
        outcomes: I,
        fallback: Outcome,
        echo: bool,
    ) -> (Self, Remotes) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        let script = Script {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback,
            echo,
            opens: AtomicUsize::new(0),
            live_sinks: AtomicUsize::new(0),
            remotes: remotes_tx,
        };

        (
            Self {
                script: Arc::new(script),
            },
            Remotes { rx: remotes_rx },
        )
    }

    /// Number of times the client tried to open a link.
    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    /// Number of link sinks the client still holds on to.
    pub fn live_sinks(&self) -> usize {
        self.script.live_sinks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _endpoint: &Url) -> Result<Link> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.script.fallback);

        match outcome {
            Outcome::Refuse => Err(WsError::ConnectionClosed.into()),
            Outcome::Hang => futures::future::pending().await,
            Outcome::Accept | Outcome::Stall => {
                let (events_tx, events_rx) = stream_channel::unbounded();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();

                self.script.live_sinks.fetch_add(1, Ordering::SeqCst);
                let sink = ScriptedSink {
                    sent: sent_tx,
                    echo: self.script.echo.then(|| events_tx.clone()),
                    stalled: outcome == Outcome::Stall,
                    script: Arc::clone(&self.script),
                };
                _ = self.script.remotes.send(Remote {
                    events: events_tx,
                    sent: sent_rx,
                });

                Ok(Link::new(sink, events_rx))
            }
        }
    }
}

struct ScriptedSink {
    sent: mpsc::UnboundedSender<Frame>,
    echo: Option<stream_channel::UnboundedSender<TransportEvent>>,
    stalled: bool,
    script: Arc<Script>,
}

impl Drop for ScriptedSink {
    fn drop(&mut self) {
        self.script.live_sinks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSink for ScriptedSink {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.stalled {
            return futures::future::pending().await;
        }
        if let Some(echo) = &self.echo {
            _ = echo.unbounded_send(TransportEvent::Message(text.clone()));
        }
        _ = self.sent.send(Frame::Text(text));
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if self.stalled {
            return futures::future::pending().await;
        }
        _ = self.sent.send(Frame::Close {
            code,
            reason: reason.to_owned(),
        });
        Ok(())
    }
}

/// Links accepted by a [`ScriptedTransport`], in order.
pub struct Remotes {
    rx: mpsc::UnboundedReceiver<Remote>,
}

impl Remotes {
    pub async fn next(&mut self) -> Remote {
        timeout(PATIENCE, self.rx.recv())
            .await
            .expect("no link was accepted in time")
            .unwrap()
    }
}

/// The far end of one accepted link.
pub struct Remote {
    events: stream_channel::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<Frame>,
}

impl Remote {
    /// Deliver a text frame to the client.
    pub fn push(&self, text: &str) {
        _ = self
            .events
            .unbounded_send(TransportEvent::Message(text.to_owned()));
    }

    /// Close the link from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        _ = self.events.unbounded_send(TransportEvent::Closed {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Break the link with a transport error.
    pub fn fail(&self, error: &str) {
        _ = self
            .events
            .unbounded_send(TransportEvent::Failure(error.to_owned()));
    }

    /// Wait for the next frame the client writes.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        timeout(PATIENCE, self.sent.recv()).await.ok().flatten()
    }

    /// Frames written so far that were not taken yet.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Wait until the published status matches `predicate` and return it.
pub async fn wait_for<F>(client: &Client, predicate: F) -> Status
where
    F: FnMut(&Status) -> bool,
{
    let mut status = client.status_receiver();
    let matched = timeout(PATIENCE, status.wait_for(predicate))
        .await
        .expect("status did not reach the expected value in time")
        .unwrap();
    *matched
}

/// Messages a listener received, in order.
#[derive(Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Inbox {
    /// Attach this inbox to `client` as its listener.
    pub fn listen(&self, client: &Client) {
        let messages = Arc::clone(&self.messages);
        client.set_listener(move |text: &str| messages.lock().unwrap().push(text.to_owned()));
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

/// Let every spawned task run until it blocks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
