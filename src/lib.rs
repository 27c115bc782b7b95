//! Paddock Realtime - WebSocket client for the paddock admin backend
//!
//! Keeps one logical connection to the realtime backend alive and
//! multiplexes every consumer over it.
//!
//! ## Architecture
//!
//! - **`client`**: Connection supervisor, dispatch, subscriptions
//! - **`protocol`**: Message vocabulary, routes, frame encode/decode
//! - **`security`**: Signed URLs, payload encryption, inbound guards
//! - **`perf`**: Batching, compression, transfer metrics
//!
//! ## Data Flow
//!
//! ```text
//! send() ──▶ sanitize ──▶ shrink ──▶ encrypt ──▶ batch ──▶ socket
//! socket ──▶ decrypt ──▶ guards ──▶ expand ──▶ validate ──▶ dispatch
//! ```
//!
//! Messages sent while disconnected queue up and flush, oldest first, on
//! the next transition to open. Subscription announcements replay on
//! every reconnect, so the server's view always matches the registry.
//!
//! ## Features
//!
//! - `compression` - LZ4 payload compression (a dictionary codec is the
//!   fallback tier without it)

pub mod client;
pub mod config;
pub mod error;
pub mod perf;
pub mod protocol;
pub mod security;

// Re-exports
pub use client::events::{
    ConnectCallback, DisconnectCallback, ErrorCallback, GlobalMessageCallback,
};
pub use client::registry::MessageHandler;
pub use client::state::ConnectionState;
pub use client::{ConnectionSnapshot, RealtimeClient};
pub use config::RealtimeConfig;
pub use error::RealtimeError;
pub use perf::batcher::NetworkQuality;
pub use perf::metrics::MetricsSnapshot;
pub use protocol::{routes, Message, MessageKind};
