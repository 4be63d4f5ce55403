//! Socket transport layer.
//!
//! This module defines the boundary to the underlying socket and the
//! buffers the receive path reuses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   connect()    ┌───────────────────────┐
//! │  WebsocketClient │───────────────►│ Connector             │
//! │                  │◄───────────────│  TungsteniteConnector │
//! │  read loop ──────┼── SocketReader │  ScriptedConnector    │
//! │  send path ──────┼── SocketWriter └───────────────────────┘
//! │                  │
//! │  BinaryBufferPool│  ring of reusable binary buffers
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `pool` | Ring of reusable binary message buffers |
//! | `scripted` | In-memory socket playing back a script |
//! | `socket` | Connector and socket half traits |
//! | `tungstenite` | Socket over `tokio-tungstenite` |

// ============================================================================
// Submodules
// ============================================================================

/// Reusable binary message buffers.
pub mod pool;

/// Scripted in-memory socket.
pub mod scripted;

/// Socket boundary traits.
pub mod socket;

/// Socket over `tokio-tungstenite`.
pub mod tungstenite;

// ============================================================================
// Re-exports
// ============================================================================

pub use pool::{BinaryBufferPool, BinaryMessageBuffer};
pub use scripted::{Script, ScriptedConnector, SocketLog};
pub use socket::{Connector, Socket, SocketReader, SocketWriter};
pub use tungstenite::TungsteniteConnector;
