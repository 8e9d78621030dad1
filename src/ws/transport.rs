//! [`Transport`] backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt as _};
use futures::{SinkExt as _, future};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::traits::{FrameSink, Link, Transport, TransportEvent};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Text-only WebSocket transport.
///
/// Binary frames are dropped. Protocol-level PING frames are answered by tungstenite and
/// never surface as events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &Url) -> Result<Link> {
        let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
        let (write, read) = ws_stream.split();

        let events = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => {
                    Some(TransportEvent::Message(text.as_str().to_owned()))
                }
                Ok(Message::Close(frame)) => Some(match frame {
                    Some(frame) => TransportEvent::Closed {
                        code: frame.code.into(),
                        reason: frame.reason.as_str().to_owned(),
                    },
                    None => TransportEvent::Closed {
                        code: CloseCode::Status.into(),
                        reason: String::new(),
                    },
                }),
                Err(e) => Some(TransportEvent::Failure(e.to_string())),
                // Binary, PING and PONG frames carry nothing for the listener
                Ok(_) => None,
            })
        });

        Ok(Link::new(WsSink { write }, events))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.write.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}
