//! Classification of why a session ended.
//!
//! | Termination | Disconnection type |
//! |-------------|--------------------|
//! | [`Termination::ServerClose`] | `ByServer` |
//! | [`Termination::UserStop`], [`Termination::UserReconnect`] | `ByUser` |
//! | [`Termination::ConnectFailure`] | `Error` |
//! | [`Termination::Inactivity`] | `NoMessageReceived` |
//! | [`Termination::Lost`] | `Lost` |
//! | [`Termination::Disposed`] | `Normal` |
//! | cancellation (any variant carrying a cancellation error) | no event |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::error::Error;
use crate::identifiers::SessionId;
use crate::protocol::{CloseStatus, DisconnectionEvent, DisconnectionType, ReconnectionType};

// ============================================================================
// Termination
// ============================================================================

/// Raw cause of a session ending, before classification.
#[derive(Debug)]
pub enum Termination {
    /// Remote sent a close frame.
    ServerClose(Option<CloseStatus>),
    /// Local code called `stop`.
    UserStop,
    /// Local code called `reconnect`.
    UserReconnect,
    /// Client disposed while started.
    Disposed,
    /// A connect attempt failed.
    ConnectFailure(Error),
    /// Keep-alive saw no message within the timeout.
    Inactivity,
    /// Session lost, with the read failure if there was one.
    Lost(Option<Error>),
}

impl Termination {
    /// Maps a reconnect trigger to the termination it reports.
    ///
    /// `Initial` starts a session rather than ending one.
    #[must_use]
    pub fn from_reconnection(kind: ReconnectionType, error: Option<Error>) -> Option<Self> {
        match kind {
            ReconnectionType::Initial => None,
            ReconnectionType::Lost => Some(Self::Lost(error)),
            ReconnectionType::NoMessageReceived => Some(Self::Inactivity),
            ReconnectionType::ByUser => Some(Self::UserReconnect),
            ReconnectionType::ByServer => Some(Self::ServerClose(None)),
            ReconnectionType::Error => Some(Self::ConnectFailure(
                error.unwrap_or_else(|| Error::connection("Connect attempt failed")),
            )),
        }
    }

    /// Returns the underlying error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::ConnectFailure(e) | Self::Lost(Some(e)) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this termination is a cooperative cancellation.
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.error().is_some_and(Error::is_cancellation)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classifies a termination.
///
/// Returns `None` for cancellations, which are not reported.
#[must_use]
pub fn classify(termination: &Termination) -> Option<DisconnectionType> {
    if termination.is_cancellation() {
        return None;
    }

    let kind = match termination {
        Termination::ServerClose(_) => DisconnectionType::ByServer,
        Termination::UserStop | Termination::UserReconnect => DisconnectionType::ByUser,
        Termination::Disposed => DisconnectionType::Normal,
        Termination::ConnectFailure(_) => DisconnectionType::Error,
        Termination::Inactivity => DisconnectionType::NoMessageReceived,
        Termination::Lost(_) => DisconnectionType::Lost,
    };
    Some(kind)
}

/// Builds the disconnection event for a termination.
///
/// Returns `None` for cancellations.
#[must_use]
pub fn disconnection_event(termination: Termination, session_id: Option<SessionId>) -> Option<DisconnectionEvent> {
    let kind = classify(&termination)?;

    let (close_status, error) = match termination {
        Termination::ServerClose(status) => (status, None),
        Termination::ConnectFailure(e) | Termination::Lost(Some(e)) => (None, Some(Arc::new(e))),
        _ => (None, None),
    };

    Some(
        DisconnectionEvent::new(kind)
            .with_session(session_id)
            .with_close_status(close_status)
            .with_error(error),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        let cases = [
            (Termination::ServerClose(None), DisconnectionType::ByServer),
            (Termination::UserStop, DisconnectionType::ByUser),
            (Termination::UserReconnect, DisconnectionType::ByUser),
            (Termination::Disposed, DisconnectionType::Normal),
            (
                Termination::ConnectFailure(Error::connection("refused")),
                DisconnectionType::Error,
            ),
            (Termination::Inactivity, DisconnectionType::NoMessageReceived),
            (Termination::Lost(None), DisconnectionType::Lost),
            (Termination::Lost(Some(Error::ConnectionClosed)), DisconnectionType::Lost),
        ];

        for (termination, expected) in cases {
            assert_eq!(classify(&termination), Some(expected), "{termination:?}");
        }
    }

    #[test]
    fn test_cancellation_produces_no_event() {
        assert_eq!(classify(&Termination::Lost(Some(Error::Cancelled))), None);
        assert_eq!(classify(&Termination::ConnectFailure(Error::Disposed)), None);
        assert!(disconnection_event(Termination::Lost(Some(Error::Cancelled)), None).is_none());
    }

    #[test]
    fn test_event_carries_status_and_error() {
        let session = SessionId::next();

        let event = disconnection_event(
            Termination::ServerClose(Some(CloseStatus::new(4000, "maintenance"))),
            Some(session),
        )
        .expect("event");
        assert_eq!(event.kind(), DisconnectionType::ByServer);
        assert_eq!(event.session_id(), Some(session));
        assert_eq!(event.close_status().map(|s| s.code), Some(4000));
        assert!(event.error().is_none());

        let event = disconnection_event(Termination::Lost(Some(Error::ConnectionClosed)), None)
            .expect("event");
        assert!(event.error().is_some_and(|e| e.is_connection_error()));
    }

    #[test]
    fn test_from_reconnection() {
        assert!(Termination::from_reconnection(ReconnectionType::Initial, None).is_none());

        let termination =
            Termination::from_reconnection(ReconnectionType::NoMessageReceived, None).expect("some");
        assert_eq!(classify(&termination), Some(DisconnectionType::NoMessageReceived));

        let termination = Termination::from_reconnection(ReconnectionType::Error, None).expect("some");
        assert!(termination.error().is_some());
    }
}
