//! Socket boundary traits.
//!
//! The client never speaks the wire protocol itself. A [`Connector`]
//! performs the handshake and hands back a [`Socket`], split into a
//! single-reader half and a single-writer half.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ChunkResult, CloseStatus, OutgoingMessage, SocketState};

// ============================================================================
// SocketReader
// ============================================================================

/// Read half of a connected socket.
#[async_trait]
pub trait SocketReader: Send {
    /// Reads the next chunk of the current frame into `buffer`.
    ///
    /// Returns how many bytes were written, whether the frame is complete,
    /// and the frame kind. Close frames report zero bytes and carry the
    /// close status.
    ///
    /// Must be cancel-safe: the client races it against cancellation.
    async fn receive_chunk(&mut self, buffer: &mut [u8]) -> Result<ChunkResult>;

    /// Returns the current socket state.
    fn state(&self) -> SocketState;
}

// ============================================================================
// SocketWriter
// ============================================================================

/// Write half of a connected socket.
#[async_trait]
pub trait SocketWriter: Send {
    /// Sends one complete message.
    async fn send(&mut self, message: OutgoingMessage) -> Result<()>;

    /// Starts or completes the close handshake.
    async fn close(&mut self, status: CloseStatus) -> Result<()>;
}

// ============================================================================
// Socket
// ============================================================================

/// A connected socket, split into its two halves.
pub struct Socket {
    /// Read half, owned by the read loop.
    pub reader: Box<dyn SocketReader>,
    /// Write half, shared by the send path and the close path.
    pub writer: Box<dyn SocketWriter>,
}

impl Socket {
    /// Creates a socket from its halves.
    #[inline]
    #[must_use]
    pub fn new(
        reader: impl SocketReader + 'static,
        writer: impl SocketWriter + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("state", &self.reader.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Establishes new sockets.
///
/// Called once on start and once per reconnect attempt. The client never
/// calls it concurrently.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection and completes the handshake.
    async fn connect(&self) -> Result<Socket>;
}
