//! Resilient WebSocket client - keeps a session alive across network failures.
//!
//! This library wraps a message-oriented socket in a client that reassembles
//! chunked reads into complete messages, classifies why a connection ended,
//! and re-establishes the session without ever running two reconnects at
//! once.
//!
//! # Architecture
//!
//! ```text
//! Socket chunks ──► Reassembler ──► IncomingMessage ──► messages stream
//!      │
//!      └─ close / failure ──► Classifier ──► disconnections stream
//!                                  │
//!                                  ▼
//!                             Supervisor ──► new Socket ──► Reassembler
//! ```
//!
//! Key design principles:
//!
//! - One background task per session reads and reassembles
//! - Binary payloads live in a fixed ring of reusable buffers
//! - Event subscribers run synchronously so they can veto a close or a reconnect
//! - Reconnects are serialized by a compare-and-swap on the supervisor state
//!
//! # Quick Start
//!
//! ```no_run
//! use resilient_websocket::{IncomingMessage, Result, WebsocketClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = WebsocketClient::builder()
//!         .url("wss://example.com/feed")
//!         .build()?;
//!
//!     client.messages().subscribe(|message: &IncomingMessage| match message {
//!         IncomingMessage::Text(text) => println!("text: {text}"),
//!         IncomingMessage::Binary(binary) => println!("binary: {} bytes", binary.len()),
//!     });
//!
//!     client.start_or_fail().await?;
//!     client.send_text("hello").await?;
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`WebsocketClient`], builder and options |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Messages, frames and lifecycle events |
//! | [`session`] | Reassembler, classifier, supervisor, retry policies, event streams |
//! | [`transport`] | Socket traits, tungstenite and scripted sockets, buffer pool |

// ============================================================================
// Modules
// ============================================================================

/// Client handle, builder and options.
///
/// Use [`WebsocketClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions and subscriptions.
pub mod identifiers;

/// Message, frame and event types.
pub mod protocol;

/// Session machinery: reassembly, classification, supervision.
pub mod session;

/// Socket boundary and buffer pool.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientBuilder, ClientOptions, WebsocketClient};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{SessionId, SubscriptionId};

// Protocol types
pub use protocol::{
    BinaryMessage, CloseStatus, DisconnectionEvent, DisconnectionType, IncomingMessage,
    OutgoingMessage, ReconnectionEvent, ReconnectionState, ReconnectionType, TextEncoding,
};

// Session types
pub use session::{EventStream, ExponentialBackoff, FixedDelay, NoRetry, RetryPolicy};

// Transport types
pub use transport::{Connector, ScriptedConnector, Script, TungsteniteConnector};
