//! Read loop and inactivity watchdog.
//!
//! Both tasks hold the client weakly, so dropping the last client handle
//! ends them.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::error::Error;
use crate::protocol::{CloseStatus, ReconnectionType, SocketState};
use crate::session::{ConnectionSession, Reassembled, Reassembler, Termination};
use crate::transport::SocketReader;

use super::core::ClientInner;
use super::reconnect;

// ============================================================================
// Types
// ============================================================================

/// Why the read loop returned.
enum Exit {
    /// A server close was fully handled.
    Handled,
    /// A server close was accepted and reconnection should follow.
    Reconnect,
    /// Reading stopped; `None` if the socket simply left the open state.
    Ended(Option<Error>),
}

/// What to do after a server close.
enum CloseOutcome {
    /// Subscriber vetoed; keep reading.
    Vetoed,
    /// Subscriber vetoed while reconnection is enabled; treat as loss.
    VetoedWhileReconnecting(Option<CloseStatus>),
    /// Session closed; reconnect.
    Reconnect,
    /// Session closed, stopped or replaced.
    Handled,
}

// ============================================================================
// Read Loop
// ============================================================================

/// Reads `session` until it ends, then reports the loss.
///
/// Boxed because the reconnect it may trigger spawns a new read loop.
pub(crate) fn listen(
    client: Weak<ClientInner>,
    session: Arc<ConnectionSession>,
    mut reader: Box<dyn SocketReader>,
    mut reassembler: Reassembler,
    text_conversion: bool,
) -> BoxFuture<'static, ()> {
    async move {
        debug!(session_id = %session.id(), "Read loop started");
        let exit = read_messages(&client, &session, reader.as_mut(), &mut reassembler, text_conversion).await;
        drop(reader);

        let error = match exit {
            Exit::Handled => return,
            Exit::Reconnect => {
                if let Some(inner) = client.upgrade() {
                    reconnect::reconnect_synchronized(inner, ReconnectionType::Lost, None, Some(session.id())).await;
                }
                return;
            }
            Exit::Ended(Some(e)) if e.is_cancellation() => {
                trace!(session_id = %session.id(), "Read loop cancelled");
                return;
            }
            Exit::Ended(error) => error,
        };

        let Some(inner) = client.upgrade() else {
            return;
        };

        if !inner.supervisor.is_started() || !inner.is_current(session.id()) {
            debug!(client = %inner.name, session_id = %session.id(), "Read loop ended for an inactive session");
            return;
        }

        match &error {
            Some(Error::ClosedByServer { .. }) => {
                warn!(client = %inner.name, session_id = %session.id(), "Vetoed server close treated as connection loss");
            }
            Some(e) => {
                error!(client = %inner.name, session_id = %session.id(), error = %e, "Error while listening to socket");
            }
            None => {
                info!(client = %inner.name, session_id = %session.id(), "Socket no longer open");
            }
        }

        reconnect::reconnect_synchronized(inner, ReconnectionType::Lost, error, Some(session.id())).await;
    }
    .boxed()
}

/// Delivers messages until the socket closes, fails or is cancelled.
async fn read_messages(
    client: &Weak<ClientInner>,
    session: &Arc<ConnectionSession>,
    reader: &mut dyn SocketReader,
    reassembler: &mut Reassembler,
    text_conversion: bool,
) -> Exit {
    let mut close_vetoed = false;

    loop {
        if session.is_cancelled() {
            return Exit::Ended(Some(Error::Cancelled));
        }

        let frame = match reassembler
            .next_frame(reader, session.cancellation(), text_conversion)
            .await
        {
            Ok(frame) => frame,
            Err(e) => return Exit::Ended(Some(e)),
        };

        let Some(inner) = client.upgrade() else {
            return Exit::Ended(Some(Error::Disposed));
        };

        match frame {
            Reassembled::Message(message) => {
                trace!(client = %inner.name, session_id = %session.id(), %message, "Received");
                session.touch();
                inner.messages.publish(&message);
            }

            Reassembled::Close(status) => match handle_server_close(&inner, session, status).await {
                CloseOutcome::Vetoed => close_vetoed = true,
                CloseOutcome::VetoedWhileReconnecting(status) => {
                    return Exit::Ended(Some(Error::closed_by_server(status)));
                }
                CloseOutcome::Reconnect => return Exit::Reconnect,
                CloseOutcome::Handled => return Exit::Handled,
            },
        }

        let state = reader.state();
        let readable = state == SocketState::Open || (close_vetoed && state == SocketState::CloseReceived);
        if !readable {
            return Exit::Ended(None);
        }
    }
}

/// Publishes a `ByServer` disconnection and acts on it.
async fn handle_server_close(
    inner: &Arc<ClientInner>,
    session: &Arc<ConnectionSession>,
    status: Option<CloseStatus>,
) -> CloseOutcome {
    trace!(client = %inner.name, session_id = %session.id(), ?status, "Received close frame");

    if !inner.supervisor.is_started() || !inner.is_current(session.id()) {
        return CloseOutcome::Handled;
    }

    let Some(event) = inner.publish_disconnection(Termination::ServerClose(status.clone()), Some(session.id()))
    else {
        return CloseOutcome::Handled;
    };

    if event.is_closing_cancelled() {
        if inner.reconnection_enabled() {
            return CloseOutcome::VetoedWhileReconnecting(status);
        }
        warn!(client = %inner.name, session_id = %session.id(), "Server close vetoed, continuing to read");
        return CloseOutcome::Vetoed;
    }

    session.cancel();
    session.close(CloseStatus::normal("Closing")).await;

    if inner.reconnection_enabled() && !event.is_reconnection_cancelled() {
        return CloseOutcome::Reconnect;
    }

    if inner.is_current(session.id()) {
        inner.shutdown(CloseStatus::normal("Closing")).await;
        info!(client = %inner.name, session_id = %session.id(), "Client stopped after server close");
    }

    CloseOutcome::Handled
}

// ============================================================================
// Inactivity Watchdog
// ============================================================================

/// Reconnects `session` once it stays silent for `timeout`.
///
/// Boxed for the same reason as [`listen`].
pub(crate) fn watch_inactivity(
    client: Weak<ClientInner>,
    session: Arc<ConnectionSession>,
    timeout: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        let mut ticker = tokio::time::interval(timeout.min(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = session.cancellation().cancelled() => return,
                _ = ticker.tick() => {}
            }

            let idle = session.idle_for();
            if idle < timeout {
                continue;
            }

            let Some(inner) = client.upgrade() else {
                return;
            };

            warn!(
                client = %inner.name,
                session_id = %session.id(),
                ?idle,
                "No message received within timeout, reconnecting"
            );
            reconnect::reconnect_synchronized(
                inner,
                ReconnectionType::NoMessageReceived,
                None,
                Some(session.id()),
            )
            .await;
            return;
        }
    }
    .boxed()
}
