#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub mod room;
pub mod ws;

pub use client::Client;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Public echo endpoint used by the live room for its online counter.
pub const DEFAULT_ENDPOINT: &str = "wss://echo.websocket.org/";

/// Environment variable the demos read to override [`DEFAULT_ENDPOINT`].
pub const ENDPOINT_VAR: &str = "LIVE_ROOM_ENDPOINT";
