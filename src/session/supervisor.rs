//! Reconnection supervisor state machine.
//!
//! The state lives in one atomic. Transitions are compare-and-swap
//! operations, so two racing reconnect triggers cannot both win and no lock
//! is ever held across an await point. Every change is published on the
//! state stream after it took effect.
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | `Idle`, `Stopped` | `Connecting` | start |
//! | `Connecting` | `Listening` | initial connect succeeded |
//! | `Connecting` | `Reconnecting` | initial connect failed |
//! | `Listening` | `Reconnecting` | loss, inactivity, user reconnect |
//! | `Reconnecting` | `Listening` | new session established |
//! | any | `Stopped` | stop, server close, give up, dispose |

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::protocol::ReconnectionState;

use super::events::EventStream;

// ============================================================================
// Supervisor
// ============================================================================

/// Owner of the client's [`ReconnectionState`].
#[derive(Debug)]
pub struct Supervisor {
    /// Current state as its discriminant.
    state: AtomicU8,
    /// State change stream.
    changes: EventStream<ReconnectionState>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Creates a supervisor in [`ReconnectionState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ReconnectionState::Idle as u8),
            changes: EventStream::new("state"),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn get(&self) -> ReconnectionState {
        ReconnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while started.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.get().is_started()
    }

    /// Returns the state change stream.
    #[inline]
    #[must_use]
    pub fn changes(&self) -> &EventStream<ReconnectionState> {
        &self.changes
    }

    /// Moves from `from` to `to` if the state is still `from`.
    ///
    /// Returns `false` if another caller changed the state first.
    pub fn transition(&self, from: ReconnectionState, to: ReconnectionState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if swapped {
            debug!(%from, %to, "Supervisor state changed");
            if from != to {
                self.changes.publish(&to);
            }
        }
        swapped
    }

    /// Sets the state unconditionally.
    ///
    /// Returns the previous state.
    pub fn force(&self, to: ReconnectionState) -> ReconnectionState {
        let from = ReconnectionState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        if from != to {
            debug!(%from, %to, "Supervisor state forced");
            self.changes.publish(&to);
        }
        from
    }

    /// Claims the right to reconnect.
    ///
    /// Only one caller wins while the client is listening; everyone else
    /// sees `false` and must not touch the session.
    #[inline]
    pub fn begin_reconnect(&self) -> bool {
        self.transition(ReconnectionState::Listening, ReconnectionState::Reconnecting)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    #[test]
    fn test_starts_idle() {
        let supervisor = Supervisor::new();
        assert_eq!(supervisor.get(), ReconnectionState::Idle);
        assert!(!supervisor.is_started());
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let supervisor = Supervisor::new();
        assert!(!supervisor.transition(ReconnectionState::Listening, ReconnectionState::Stopped));
        assert!(supervisor.transition(ReconnectionState::Idle, ReconnectionState::Connecting));
        assert_eq!(supervisor.get(), ReconnectionState::Connecting);
        assert!(supervisor.is_started());
    }

    #[test]
    fn test_begin_reconnect_only_from_listening() {
        let supervisor = Supervisor::new();
        supervisor.force(ReconnectionState::Connecting);
        assert!(!supervisor.begin_reconnect());

        supervisor.force(ReconnectionState::Listening);
        assert!(supervisor.begin_reconnect());
        assert!(!supervisor.begin_reconnect());
        assert_eq!(supervisor.get(), ReconnectionState::Reconnecting);
    }

    #[test]
    fn test_changes_are_published() {
        let supervisor = Supervisor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        supervisor.changes().subscribe(move |state| sink.lock().push(*state));

        supervisor.transition(ReconnectionState::Idle, ReconnectionState::Connecting);
        supervisor.transition(ReconnectionState::Connecting, ReconnectionState::Listening);
        supervisor.force(ReconnectionState::Listening);
        supervisor.force(ReconnectionState::Stopped);

        assert_eq!(
            *seen.lock(),
            vec![
                ReconnectionState::Connecting,
                ReconnectionState::Listening,
                ReconnectionState::Stopped,
            ]
        );
    }

    #[test]
    fn test_concurrent_reconnect_has_single_winner() {
        let supervisor = Arc::new(Supervisor::new());
        supervisor.force(ReconnectionState::Listening);
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let supervisor = Arc::clone(&supervisor);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if supervisor.begin_reconnect() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
