//! Chunk-level types exchanged with the underlying socket.
//!
//! A socket read never returns a whole message: it fills a caller-owned
//! scratch buffer and reports a [`ChunkResult`] describing what was read.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// FrameKind
// ============================================================================

/// Kind of the frame a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text payload.
    Text,
    /// Raw binary payload.
    Binary,
    /// Close handshake frame.
    Close,
}

// ============================================================================
// SocketState
// ============================================================================

/// Lifecycle state reported by a socket reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketState {
    /// Handshake still in progress.
    Connecting = 0,
    /// Open for reading and writing.
    Open = 1,
    /// Remote sent a close frame.
    CloseReceived = 2,
    /// Local end sent a close frame.
    CloseSent = 3,
    /// Close handshake complete.
    Closed = 4,
    /// Connection dropped without a handshake.
    Aborted = 5,
}

impl SocketState {
    /// Converts a raw discriminant back to a state.
    ///
    /// Unknown values map to [`SocketState::Aborted`].
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::CloseReceived,
            3 => Self::CloseSent,
            4 => Self::Closed,
            _ => Self::Aborted,
        }
    }

    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

// ============================================================================
// CloseStatus
// ============================================================================

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloseStatus {
    /// Close code (RFC 6455 section 7.4).
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseStatus {
    /// Normal closure (1000).
    pub const NORMAL_CLOSURE: u16 = 1000;
    /// Endpoint going away (1001).
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error (1002).
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Internal server error (1011).
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Creates a close status.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a normal closure status with the given reason.
    #[inline]
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(Self::NORMAL_CLOSURE, reason)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

// ============================================================================
// ChunkResult
// ============================================================================

/// Outcome of one `receive_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    /// Bytes written into the scratch buffer.
    pub count: usize,
    /// Whether this chunk completes the message.
    pub end_of_message: bool,
    /// Kind of frame the chunk belongs to.
    pub kind: FrameKind,
    /// Close status, present only on close frames.
    pub close_status: Option<CloseStatus>,
}

impl ChunkResult {
    /// Creates a data chunk result.
    #[inline]
    #[must_use]
    pub const fn data(kind: FrameKind, count: usize, end_of_message: bool) -> Self {
        Self {
            count,
            end_of_message,
            kind,
            close_status: None,
        }
    }

    /// Creates a close frame result.
    #[inline]
    #[must_use]
    pub const fn close(close_status: Option<CloseStatus>) -> Self {
        Self {
            count: 0,
            end_of_message: true,
            kind: FrameKind::Close,
            close_status,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_state_round_trip_discriminant() {
        for state in [
            SocketState::Connecting,
            SocketState::Open,
            SocketState::CloseReceived,
            SocketState::CloseSent,
            SocketState::Closed,
            SocketState::Aborted,
        ] {
            assert_eq!(SocketState::from_u8(state as u8), state);
        }
        assert_eq!(SocketState::from_u8(200), SocketState::Aborted);
    }

    #[test]
    fn test_close_status_display() {
        assert_eq!(CloseStatus::normal("bye").to_string(), "1000 bye");
        assert_eq!(CloseStatus::new(1001, "").to_string(), "1001");
    }

    #[test]
    fn test_close_chunk_is_final() {
        let chunk = ChunkResult::close(None);
        assert!(chunk.end_of_message);
        assert_eq!(chunk.kind, FrameKind::Close);
        assert_eq!(chunk.count, 0);
    }
}
