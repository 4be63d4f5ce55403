//! One physical connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::identifiers::SessionId;
use crate::protocol::{CloseStatus, OutgoingMessage};
use crate::transport::SocketWriter;

// ============================================================================
// ConnectionSession
// ============================================================================

/// State of one established connection.
///
/// The read half of the socket is owned by the read loop; the session keeps
/// the write half, the cancellation token for the read loop and the
/// timestamp of the last received message.
pub struct ConnectionSession {
    /// Unique ID of this connection.
    id: SessionId,
    /// Write half, shared by send and close.
    writer: AsyncMutex<Box<dyn SocketWriter>>,
    /// Cancels the read loop and watchdog.
    cancel: CancellationToken,
    /// Time the last complete message was received.
    last_received: Mutex<Instant>,
    /// Set once a close was attempted.
    closed: AtomicBool,
}

impl ConnectionSession {
    /// Creates a session around a connected writer.
    pub(crate) fn new(writer: Box<dyn SocketWriter>) -> Self {
        Self {
            id: SessionId::next(),
            writer: AsyncMutex::new(writer),
            cancel: CancellationToken::new(),
            last_received: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the cancellation token of the read loop.
    #[inline]
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the session was cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the read loop.
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Records that a message was received now.
    #[inline]
    pub(crate) fn touch(&self) {
        *self.last_received.lock() = Instant::now();
    }

    /// Returns when the last message was received.
    ///
    /// Starts at connect time.
    #[inline]
    #[must_use]
    pub fn last_received(&self) -> Instant {
        *self.last_received.lock()
    }

    /// Returns how long the session has been silent.
    #[inline]
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_received().elapsed()
    }

    /// Sends a message on this session.
    pub(crate) async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.writer.lock().await.send(message).await
    }

    /// Closes the socket, logging failures.
    ///
    /// Only the first call reaches the socket. Returns `true` if the close
    /// was written.
    pub(crate) async fn close(&self, status: CloseStatus) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!(session_id = %self.id, "Session already closed");
            return false;
        }

        match self.writer.lock().await.close(status).await {
            Ok(()) => {
                debug!(session_id = %self.id, "Socket closed");
                true
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to close socket");
                false
            }
        }
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
