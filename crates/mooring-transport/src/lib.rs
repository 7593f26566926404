//! Transport layer for the mooring MCP client runtime.
//!
//! One [`Transport`] contract, four implementations:
//!
//! - [`subprocess::SubprocessTransport`]: newline-delimited JSON over a
//!   child process's stdio
//! - [`http::HttpTransport`]: plain POST request/response, no push
//! - [`sse::SseTransport`]: POST outbound, streamed Server-Sent Events
//!   inbound
//! - [`websocket::WebSocketTransport`]: full duplex with keepalive,
//!   reconnection, and replay of unacknowledged traffic
//!
//! All implementations take `&self` and use interior mutability, so a
//! `Box<dyn Transport>` can be shared behind an `Arc` by the connection
//! layer.

pub mod core;
pub mod error;
pub mod events;
pub mod http;
pub mod replay;
pub mod sse;
pub mod subprocess;
pub mod websocket;

pub use core::{Transport, TransportKind, TransportMessage, TransportState};
pub use error::{TransportError, TransportResult};
pub use events::{TransportEvent, TransportEventEmitter};
pub use http::{HttpConfig, HttpTransport};
pub use replay::{ReplayBuffer, ReplayEntry};
pub use sse::{SseConfig, SseTransport};
pub use subprocess::{SubprocessConfig, SubprocessTransport};
pub use websocket::{ReconnectConfig, WebSocketConfig, WebSocketTransport};
