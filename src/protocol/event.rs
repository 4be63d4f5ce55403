//! Connection lifecycle event types.
//!
//! Events are published by the client on its disconnection, reconnection
//! and state streams.
//!
//! # Event Types
//!
//! | Type | Stream | Published when |
//! |------|--------|----------------|
//! | [`DisconnectionEvent`] | disconnections | A session ended or a connect attempt failed |
//! | [`ReconnectionEvent`] | reconnections | A session was (re)established |
//! | [`ReconnectionState`] | state changes | The supervisor changed state |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;
use crate::identifiers::SessionId;

use super::CloseStatus;

// ============================================================================
// DisconnectionType
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectionType {
    /// Client was disposed while running.
    Normal,
    /// Local code requested stop or reconnect.
    ByUser,
    /// Remote sent a close frame.
    ByServer,
    /// A connect attempt failed.
    Error,
    /// Keep-alive saw no message within the timeout.
    NoMessageReceived,
    /// Connection lost without a more specific cause.
    Lost,
}

impl fmt::Display for DisconnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::ByUser => "by-user",
            Self::ByServer => "by-server",
            Self::Error => "error",
            Self::NoMessageReceived => "no-message-received",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ReconnectionType
// ============================================================================

/// Why a session was (re)established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectionType {
    /// First connect after `start`.
    Initial,
    /// Previous session was lost.
    Lost,
    /// Keep-alive saw no message within the timeout.
    NoMessageReceived,
    /// Previous connect attempt failed.
    Error,
    /// Local code requested a reconnect.
    ByUser,
    /// Server closed the previous session.
    ByServer,
}

// ============================================================================
// DisconnectionEvent
// ============================================================================

/// Notification that a session ended.
///
/// Subscribers run synchronously, in order, before the client acts on the
/// event, so they can veto what happens next:
///
/// - [`cancel_closing`](Self::cancel_closing) on a `ByServer` event keeps the
///   socket open and reading.
/// - [`cancel_reconnection`](Self::cancel_reconnection) stops the client
///   instead of reconnecting.
#[derive(Debug)]
pub struct DisconnectionEvent {
    /// Classified cause.
    kind: DisconnectionType,
    /// Session that ended, if one was established.
    session_id: Option<SessionId>,
    /// Close status from the server, if any.
    close_status: Option<CloseStatus>,
    /// Underlying failure, if any.
    error: Option<Arc<Error>>,
    /// Veto for the close sequence.
    cancel_closing: AtomicBool,
    /// Veto for the follow-up reconnect.
    cancel_reconnection: AtomicBool,
}

impl DisconnectionEvent {
    /// Creates an event of the given type.
    #[must_use]
    pub fn new(kind: DisconnectionType) -> Self {
        Self {
            kind,
            session_id: None,
            close_status: None,
            error: None,
            cancel_closing: AtomicBool::new(false),
            cancel_reconnection: AtomicBool::new(false),
        }
    }

    /// Attaches the session ID.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Attaches the close status.
    #[inline]
    #[must_use]
    pub fn with_close_status(mut self, close_status: Option<CloseStatus>) -> Self {
        self.close_status = close_status;
        self
    }

    /// Attaches the underlying failure.
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: Option<Arc<Error>>) -> Self {
        self.error = error;
        self
    }

    /// Returns the disconnection type.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> DisconnectionType {
        self.kind
    }

    /// Returns the session that ended.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Returns the server close status.
    #[inline]
    #[must_use]
    pub fn close_status(&self) -> Option<&CloseStatus> {
        self.close_status.as_ref()
    }

    /// Returns the underlying failure.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Arc<Error>> {
        self.error.as_ref()
    }

    /// Vetoes the close sequence in progress.
    #[inline]
    pub fn cancel_closing(&self) {
        self.cancel_closing.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if a subscriber vetoed closing.
    #[inline]
    #[must_use]
    pub fn is_closing_cancelled(&self) -> bool {
        self.cancel_closing.load(Ordering::SeqCst)
    }

    /// Vetoes the reconnect that would follow this event.
    #[inline]
    pub fn cancel_reconnection(&self) {
        self.cancel_reconnection.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if a subscriber vetoed reconnection.
    #[inline]
    #[must_use]
    pub fn is_reconnection_cancelled(&self) -> bool {
        self.cancel_reconnection.load(Ordering::SeqCst)
    }
}

impl Clone for DisconnectionEvent {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            session_id: self.session_id,
            close_status: self.close_status.clone(),
            error: self.error.clone(),
            cancel_closing: AtomicBool::new(self.is_closing_cancelled()),
            cancel_reconnection: AtomicBool::new(self.is_reconnection_cancelled()),
        }
    }
}

// ============================================================================
// ReconnectionEvent
// ============================================================================

/// Notification that a session was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionEvent {
    /// Why the session was established.
    pub kind: ReconnectionType,
    /// The new session.
    pub session_id: SessionId,
}

// ============================================================================
// ReconnectionState
// ============================================================================

/// Supervisor state.
///
/// ```text
/// Idle ──start──► Connecting ──ok──► Listening ──loss──► Reconnecting
///                     │                  │                 │    │
///                     └──fail──► Reconnecting              │    └──ok──► Listening
///                                        │                 │
///                  Stopped ◄──stop/close/dispose───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReconnectionState {
    /// Created, never started.
    Idle = 0,
    /// Initial connect in progress.
    Connecting = 1,
    /// Session established, read loop running.
    Listening = 2,
    /// Replacing a lost session.
    Reconnecting = 3,
    /// Stopped by user, server close or disposal.
    Stopped = 4,
}

impl ReconnectionState {
    /// Converts a raw discriminant back to a state.
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Listening,
            3 => Self::Reconnecting,
            _ => Self::Stopped,
        }
    }

    /// Returns `true` while the client is started.
    #[inline]
    #[must_use]
    pub const fn is_started(self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Reconnecting)
    }
}

impl fmt::Display for ReconnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Tests
// ============================================================================
