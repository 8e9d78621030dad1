//! Core traits for the connection infrastructure.
//!
//! The connection manager never talks to a socket directly. It opens a [`Link`] through a
//! [`Transport`], writes through the link's [`FrameSink`] and reads [`TransportEvent`]s from
//! its stream. Tests plug in scripted transports; production uses
//! [`WsTransport`](super::transport::WsTransport).

use async_trait::async_trait;
use futures::Stream;
use futures::stream::{BoxStream, StreamExt as _};
use url::Url;

use crate::Result;

/// Close code sent when the client closes the connection on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the event stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Something that happened on an open link.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A UTF-8 text frame
    Message(String),
    /// The peer closed the connection
    Closed { code: u16, reason: String },
    /// The link broke, e.g. a reset or a protocol violation
    Failure(String),
}

/// Write half of an open link.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send a text frame. Failures are reported but never retried by the caller.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the link with the given close code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// An open connection: write half plus a stream of inbound events.
#[non_exhaustive]
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub events: BoxStream<'static, TransportEvent>,
}

impl Link {
    #[must_use]
    pub fn new<S, E>(sink: S, events: E) -> Self
    where
        S: FrameSink,
        E: Stream<Item = TransportEvent> + Send + 'static,
    {
        Self {
            sink: Box::new(sink),
            events: events.boxed(),
        }
    }
}

/// Factory for links to a remote endpoint.
///
/// # Example
///
/// ```ignore
/// pub struct Loopback;
///
/// #[async_trait]
/// impl Transport for Loopback {
///     async fn open(&self, _endpoint: &Url) -> Result<Link> {
///         let (tx, rx) = mpsc::unbounded_channel();
///         Ok(Link::new(EchoSink(tx), UnboundedReceiverStream::new(rx)))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new link. Returning an error counts as a failed connection attempt.
    async fn open(&self, endpoint: &Url) -> Result<Link>;
}

/// Receiver of application messages.
///
/// Invoked from a single delivery context, one message at a time, in transport order.
/// Heartbeat replies are filtered out before they get here.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message_received(&self, text: &str);
}

impl<F> MessageListener for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn on_message_received(&self, text: &str) {
        self(text);
    }
}
