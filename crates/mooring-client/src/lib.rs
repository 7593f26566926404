//! MCP client runtime: connection management, request correlation,
//! heartbeat, reconnection, and server-initiated sampling.
//!
//! The entry point is [`ConnectionManager`]: feed it an [`McpConfig`] of
//! server descriptors, connect by name, and issue requests. Each
//! connection runs its own dispatcher read loop and heartbeat; lost
//! connections are re-established per [`mooring_protocol::RetryPolicy`]
//! when the descriptor allows it. Servers that need LLM completions call
//! back through [`SamplingManager`].

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod manager;
pub mod sampling;

pub use config::{McpConfig, ServerDescriptor};
pub use connection::{ConnectionInfo, ConnectionState};
pub use dispatcher::Dispatcher;
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, ClientEventEmitter};
pub use manager::{ConnectionManager, ManagerConfig};
pub use sampling::{
    EchoSamplingHandler, SamplingHandler, SamplingManager, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_SAMPLING_TIMEOUT,
};
