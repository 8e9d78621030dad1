//! Core WebSocket infrastructure.
//!
//! This module keeps a single long-lived text connection alive across flaky networks.
//!
//! # Architecture
//!
//! - [`connection`]: state machine that owns the link, retries with capped exponential
//!   backoff and publishes a [`Status`]
//! - `heartbeat`: application-level probes that detect silent connection death
//! - [`dispatch`]: filters heartbeat replies and hands application messages to the
//!   [`MessageListener`] through a [`DeliveryQueue`]
//! - [`Transport`]: the seam to the network; [`WsTransport`] is the `tokio-tungstenite`
//!   implementation
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new("wss://echo.websocket.org/", Config::default())?;
//! client.set_listener(|text: &str| println!("received {text}"));
//! client.connect();
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
mod heartbeat;
pub mod retry;
pub mod traits;
pub mod transport;

pub use connection::{ConnectionState, Status};
pub use dispatch::DeliveryQueue;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use retry::BackoffPolicy;
pub use traits::*;
pub use transport::WsTransport;
