//! Message and event types.
//!
//! This module defines what flows across the two boundaries of the client:
//! chunk results from the socket, and messages and lifecycle events to the
//! application.
//!
//! # Overview
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `ChunkResult` | Socket → Client | One partial read |
//! | `IncomingMessage` | Client → Application | Reassembled message |
//! | `OutgoingMessage` | Application → Socket | Pass-through send |
//! | `DisconnectionEvent` | Client → Application | Session ended (vetoable) |
//! | `ReconnectionEvent` | Client → Application | Session established |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Disconnection/reconnection events and supervisor state |
//! | `frame` | Chunk-level socket types |
//! | `message` | Incoming and outgoing messages |

// ============================================================================
// Submodules
// ============================================================================

/// Connection lifecycle events.
pub mod event;

/// Chunk-level socket types.
pub mod frame;

/// Application-level messages.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    DisconnectionEvent, DisconnectionType, ReconnectionEvent, ReconnectionState, ReconnectionType,
};
pub use frame::{ChunkResult, CloseStatus, FrameKind, SocketState};
pub use message::{BinaryMessage, IncomingMessage, OutgoingMessage, TextEncoding};
