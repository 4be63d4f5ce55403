//! Connect, reconnect and retry flows.
//!
//! Every flow that replaces the session first wins the supervisor's
//! compare-and-swap into `Reconnecting`; losers return without touching
//! anything. The winner publishes the disconnection, releases the old
//! session and connects until it succeeds, the retry policy gives up, or
//! the run is cancelled by `stop`/`dispose`.
//!
//! The retry loop holds the client weakly between attempts, so dropping
//! the last client handle abandons it.
//!
//! ```text
//! trigger ──CAS Listening→Reconnecting──► publish disconnection
//!                                             │
//!                      vetoed / disabled ◄────┤
//!                      (Stopped)              ▼
//!                                  release old session
//!                                             │
//!                     ┌──────────► connect ───┴──ok──► Listening + ReconnectionEvent
//!                     │               │
//!                     └── wait ◄── fail: publish Error, ask retry policy
//!                                     │
//!                                     └── give up ──► Stopped
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{CloseStatus, ReconnectionEvent, ReconnectionState, ReconnectionType};
use crate::session::{ConnectionSession, Termination};
use crate::transport::Socket;

use super::core::ClientInner;
use super::receive;

// ============================================================================
// Start
// ============================================================================

/// Starts the client from `Idle` or `Stopped`.
///
/// With `fail_fast`, a failed first connect stops the client and returns
/// the error; otherwise retries run in the background.
pub(crate) async fn start(inner: &Arc<ClientInner>, fail_fast: bool) -> Result<()> {
    inner.ensure_not_disposed()?;

    let from = inner.supervisor.get();
    if from.is_started() {
        debug!(client = %inner.name, state = %from, "Client already started");
        return Ok(());
    }
    if !inner
        .supervisor
        .transition(from, ReconnectionState::Connecting)
    {
        debug!(client = %inner.name, "Client started concurrently");
        return Ok(());
    }

    let lifecycle = inner.renew_lifecycle();
    info!(client = %inner.name, "Starting client");

    let error = match establish(
        inner,
        &lifecycle,
        ReconnectionState::Connecting,
        ReconnectionType::Initial,
    )
    .await
    {
        Ok(_) => return Ok(()),
        Err(e) if e.is_cancellation() => {
            debug!(client = %inner.name, "Start cancelled");
            return if fail_fast { Err(e) } else { Ok(()) };
        }
        Err(e) => e,
    };

    warn!(client = %inner.name, error = %error, "Initial connect failed");
    let (vetoed, error) = report_connect_failure(inner, error);

    if fail_fast {
        inner
            .supervisor
            .transition(ReconnectionState::Connecting, ReconnectionState::Stopped);
        lifecycle.cancel();
        return Err(error);
    }

    if vetoed || !inner.reconnection_enabled() {
        info!(client = %inner.name, vetoed, "Not retrying initial connect, stopping");
        inner
            .supervisor
            .transition(ReconnectionState::Connecting, ReconnectionState::Stopped);
        return Ok(());
    }

    if !inner
        .supervisor
        .transition(ReconnectionState::Connecting, ReconnectionState::Reconnecting)
    {
        return Ok(());
    }

    let client = Arc::downgrade(inner);
    tokio::spawn(async move {
        if wait_before_retry(&client, &lifecycle, 0).await {
            connect_with_retry(&client, &lifecycle, ReconnectionType::Error, 1).await;
        }
    });
    Ok(())
}

// ============================================================================
// Reconnect
// ============================================================================

/// Replaces the current session, unless another reconnect is running.
///
/// `expected` names the session the trigger refers to; a trigger for a
/// session that was already replaced is ignored. Takes `inner` by value
/// and releases it before retrying.
pub(crate) async fn reconnect_synchronized(
    inner: Arc<ClientInner>,
    kind: ReconnectionType,
    error: Option<Error>,
    expected: Option<SessionId>,
) {
    if inner.is_disposed() {
        return;
    }

    if let Some(expected) = expected
        && !inner.is_current(expected)
    {
        debug!(client = %inner.name, session_id = %expected, "Ignoring reconnect for a stale session");
        return;
    }

    if !inner.supervisor.begin_reconnect() {
        debug!(
            client = %inner.name,
            state = %inner.supervisor.get(),
            ?kind,
            "Reconnect already running or client not listening"
        );
        return;
    }

    // The session may have been replaced between the check and the swap
    if let Some(expected) = expected
        && !inner.is_current(expected)
    {
        inner
            .supervisor
            .transition(ReconnectionState::Reconnecting, ReconnectionState::Listening);
        return;
    }

    let lifecycle = inner.lifecycle();
    let old = inner.take_session();
    let session_id = old.as_ref().map(|session| session.id());

    let vetoed = Termination::from_reconnection(kind, error)
        .and_then(|termination| inner.publish_disconnection(termination, session_id))
        .is_some_and(|event| event.is_reconnection_cancelled());

    if let Some(old) = old {
        old.cancel();
        old.close(CloseStatus::normal("Reconnecting")).await;
    }

    if vetoed {
        info!(client = %inner.name, ?session_id, "Reconnection vetoed, stopping");
        inner
            .supervisor
            .transition(ReconnectionState::Reconnecting, ReconnectionState::Stopped);
        return;
    }

    // An explicit user reconnect runs even with automatic reconnection off
    if kind != ReconnectionType::ByUser && !inner.reconnection_enabled() {
        info!(client = %inner.name, ?session_id, "Reconnection disabled, stopping");
        inner
            .supervisor
            .transition(ReconnectionState::Reconnecting, ReconnectionState::Stopped);
        return;
    }

    info!(client = %inner.name, ?session_id, ?kind, "Reconnecting");
    let client = Arc::downgrade(&inner);
    drop(inner);
    connect_with_retry(&client, &lifecycle, kind, 0).await;
}

/// Connects until a session is established or the policy gives up.
///
/// Expects the supervisor in `Reconnecting`. Ends quietly once the client
/// is dropped.
async fn connect_with_retry(
    client: &Weak<ClientInner>,
    lifecycle: &CancellationToken,
    mut kind: ReconnectionType,
    first_attempt: u32,
) {
    let mut attempt = first_attempt;

    loop {
        {
            let Some(inner) = client.upgrade() else {
                debug!(attempt, "Client dropped, abandoning reconnect");
                return;
            };

            let error = match establish(&inner, lifecycle, ReconnectionState::Reconnecting, kind).await {
                Ok(_) => return,
                Err(e) if e.is_cancellation() => {
                    debug!(client = %inner.name, attempt, "Reconnect cancelled");
                    return;
                }
                Err(e) => e,
            };

            warn!(client = %inner.name, attempt, error = %error, "Reconnect attempt failed");
            let (vetoed, _) = report_connect_failure(&inner, error);

            if vetoed || !inner.reconnection_enabled() {
                info!(client = %inner.name, vetoed, "Not retrying, stopping");
                inner
                    .supervisor
                    .transition(ReconnectionState::Reconnecting, ReconnectionState::Stopped);
                return;
            }
        }

        if !wait_before_retry(client, lifecycle, attempt).await {
            return;
        }

        attempt = attempt.saturating_add(1);
        kind = ReconnectionType::Error;
    }
}

/// Sleeps for the policy's delay without holding the client.
///
/// Returns `false` if the policy gave up, the run was cancelled, the client
/// was dropped, or it left `Reconnecting` meanwhile.
async fn wait_before_retry(client: &Weak<ClientInner>, lifecycle: &CancellationToken, attempt: u32) -> bool {
    let delay = {
        let Some(inner) = client.upgrade() else {
            return false;
        };

        let Some(delay) = inner.retry_policy.next_delay(attempt) else {
            warn!(client = %inner.name, attempt, "Retry policy gave up, stopping");
            inner
                .supervisor
                .transition(ReconnectionState::Reconnecting, ReconnectionState::Stopped);
            return false;
        };

        debug!(client = %inner.name, attempt, ?delay, "Waiting before next connect attempt");
        delay
    };

    tokio::select! {
        biased;
        () = lifecycle.cancelled() => return false,
        () = tokio::time::sleep(delay) => {}
    }

    client
        .upgrade()
        .is_some_and(|inner| inner.supervisor.get() == ReconnectionState::Reconnecting)
}

/// Publishes an `Error` disconnection for a failed connect.
///
/// Returns whether a subscriber vetoed reconnection, and the error.
fn report_connect_failure(inner: &ClientInner, error: Error) -> (bool, Error) {
    let Some(event) = inner.publish_disconnection(Termination::ConnectFailure(error), None) else {
        return (true, Error::Cancelled);
    };

    let vetoed = event.is_reconnection_cancelled();
    let shared = event.error().cloned();
    drop(event);

    // Subscribers may keep a clone of the event, and with it the error
    let error = shared.map_or_else(
        || Error::connection("Connect attempt failed"),
        |shared| Arc::try_unwrap(shared).unwrap_or_else(|shared| Error::connection(shared.to_string())),
    );
    (vetoed, error)
}

// ============================================================================
// Establish
// ============================================================================

/// Connects, installs the new session and starts reading.
///
/// Moves the supervisor from `from` to `Listening`. Fails with
/// [`Error::Cancelled`] if the run was stopped meanwhile.
async fn establish(
    inner: &Arc<ClientInner>,
    lifecycle: &CancellationToken,
    from: ReconnectionState,
    kind: ReconnectionType,
) -> Result<SessionId> {
    let timeout = inner.options.connect_timeout();

    let socket = tokio::select! {
        biased;
        () = lifecycle.cancelled() => return Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, inner.connector.connect()) => match result {
            Ok(socket) => socket?,
            Err(_) => return Err(Error::connection_timeout(inner.options.connect_timeout_ms)),
        },
    };

    if lifecycle.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let Socket { reader, writer } = socket;
    let session = Arc::new(ConnectionSession::new(writer));
    let session_id = session.id();

    let stale = inner.session.lock().replace(Arc::clone(&session));
    if let Some(stale) = stale {
        debug!(client = %inner.name, session_id = %stale.id(), "Releasing stale session");
        stale.cancel();
        stale.close(CloseStatus::normal("Replaced")).await;
    }

    if !inner
        .supervisor
        .transition(from, ReconnectionState::Listening)
    {
        {
            let mut slot = inner.session.lock();
            if slot.as_ref().is_some_and(|current| current.id() == session_id) {
                slot.take();
            }
        }
        session.cancel();
        session.close(CloseStatus::normal("Client stopped")).await;
        return Err(Error::Cancelled);
    }

    info!(client = %inner.name, %session_id, ?kind, "Connected");
    inner
        .reconnections
        .publish(&ReconnectionEvent { kind, session_id });

    tokio::spawn(receive::listen(
        Arc::downgrade(inner),
        Arc::clone(&session),
        reader,
        inner.reassembler(),
        inner.options.text_conversion_enabled,
    ));

    if let Some(timeout) = inner.options.no_message_timeout() {
        tokio::spawn(receive::watch_inactivity(Arc::downgrade(inner), session, timeout));
    }

    Ok(session_id)
}
