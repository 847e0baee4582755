//! WebSocket transport to the central system

pub mod websocket;

pub use websocket::{LinkEvent, WebSocketLink};
