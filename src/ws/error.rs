#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The connection is not currently established, so the frame was not sent
    NotConnected,
    /// The manager has been shut down and can no longer be used
    ShutDown,
    /// Opening the connection did not complete in time
    Timeout,
    /// The peer stopped answering liveness probes
    HeartbeatTimeout {
        /// Number of consecutive probes without a reply
        failures: u32,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::NotConnected => write!(f, "WebSocket is not connected, message not sent"),
            Self::ShutDown => write!(f, "WebSocket manager has been shut down"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::HeartbeatTimeout { failures } => {
                write!(f, "No heartbeat reply after {failures} consecutive probes")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
