//! Session machinery shared by the client.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `classifier` | Maps termination causes to disconnection types |
//! | `connection` | One physical connection and its cancellation token |
//! | `events` | Ordered multi-subscriber event streams |
//! | `reassembler` | Chunk reads to complete messages |
//! | `retry` | Reconnect delay policies |
//! | `supervisor` | Reconnection state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Disconnection classification.
pub mod classifier;

/// Physical connection state.
pub mod connection;

/// Event streams.
pub mod events;

/// Message reassembly.
pub mod reassembler;

/// Retry policies.
pub mod retry;

/// Reconnection state machine.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use classifier::{Termination, classify, disconnection_event};
pub use connection::ConnectionSession;
pub use events::{EventHandler, EventStream};
pub use reassembler::{CHUNK_SIZE, Reassembled, Reassembler};
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryPolicy};
pub use supervisor::Supervisor;
