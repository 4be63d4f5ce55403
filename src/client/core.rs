//! Resilient WebSocket client.
//!
//! The [`WebsocketClient`] owns at most one session at a time. It reads
//! and reassembles messages on a background task, classifies why a session
//! ended and, when enabled, replaces it with a new one.
//!
//! # Example
//!
//! ```no_run
//! use resilient_websocket::WebsocketClient;
//!
//! # async fn example() -> resilient_websocket::Result<()> {
//! let client = WebsocketClient::builder()
//!     .url("wss://example.com/feed")
//!     .build()?;
//!
//! client.messages().subscribe(|message| println!("{message}"));
//! client.disconnections().subscribe(|event| println!("disconnected: {}", event.kind()));
//!
//! client.start_or_fail().await?;
//! client.send_text("subscribe").await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{
    CloseStatus, DisconnectionEvent, IncomingMessage, OutgoingMessage, ReconnectionEvent,
    ReconnectionState, ReconnectionType,
};
use crate::session::{
    ConnectionSession, EventStream, Reassembler, RetryPolicy, Supervisor, Termination,
    disconnection_event,
};
use crate::transport::{BinaryBufferPool, Connector};

use super::builder::ClientBuilder;
use super::options::ClientOptions;
use super::reconnect;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Name used in logs.
    pub name: String,

    /// Validated options.
    pub options: ClientOptions,

    /// Opens new sockets.
    pub connector: Arc<dyn Connector>,

    /// Delay between failed connect attempts.
    pub retry_policy: Arc<dyn RetryPolicy>,

    /// Reconnection state machine.
    pub supervisor: Supervisor,

    /// Current session, if connected.
    pub session: Mutex<Option<Arc<ConnectionSession>>>,

    /// Ring of binary message buffers, shared by all sessions.
    pub pool: Arc<BinaryBufferPool>,

    /// Runtime switch for automatic reconnection.
    pub reconnection_enabled: AtomicBool,

    /// Set once by `dispose`.
    pub disposed: AtomicBool,

    /// Cancels connect attempts and retry waits of the current run.
    pub lifecycle: Mutex<CancellationToken>,

    /// Received messages.
    pub messages: EventStream<IncomingMessage>,

    /// Ended sessions and failed connects.
    pub disconnections: EventStream<DisconnectionEvent>,

    /// Established sessions.
    pub reconnections: EventStream<ReconnectionEvent>,
}

impl ClientInner {
    /// Creates the shared state.
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        options: ClientOptions,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let name = options.name.clone().unwrap_or_else(|| "client".to_string());
        let pool = Arc::new(BinaryBufferPool::new(
            options.binary_pool_size,
            options.receive_buffer_size,
        ));

        Self {
            name,
            reconnection_enabled: AtomicBool::new(options.reconnection_enabled),
            options,
            connector,
            retry_policy,
            supervisor: Supervisor::new(),
            session: Mutex::new(None),
            pool,
            disposed: AtomicBool::new(false),
            lifecycle: Mutex::new(CancellationToken::new()),
            messages: EventStream::new("messages"),
            disconnections: EventStream::new("disconnections"),
            reconnections: EventStream::new("reconnections"),
        }
    }

    /// Fails with [`Error::Disposed`] once disposed.
    #[inline]
    pub(crate) fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Returns `true` once disposed.
    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns `true` if automatic reconnection is enabled.
    #[inline]
    pub(crate) fn reconnection_enabled(&self) -> bool {
        self.reconnection_enabled.load(Ordering::Acquire)
    }

    /// Returns the current session.
    #[inline]
    pub(crate) fn current_session(&self) -> Option<Arc<ConnectionSession>> {
        self.session.lock().clone()
    }

    /// Returns the ID of the current session.
    #[inline]
    pub(crate) fn current_session_id(&self) -> Option<SessionId> {
        self.session.lock().as_ref().map(|session| session.id())
    }

    /// Returns `true` if `id` is the current session.
    #[inline]
    pub(crate) fn is_current(&self, id: SessionId) -> bool {
        self.current_session_id() == Some(id)
    }

    /// Removes the current session from the slot.
    #[inline]
    pub(crate) fn take_session(&self) -> Option<Arc<ConnectionSession>> {
        self.session.lock().take()
    }

    /// Returns the lifecycle token of the current run.
    #[inline]
    pub(crate) fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.lock().clone()
    }

    /// Starts a new run with a fresh lifecycle token.
    pub(crate) fn renew_lifecycle(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), token.clone());
        previous.cancel();
        token
    }

    /// Creates the reassembler for a new session.
    pub(crate) fn reassembler(&self) -> Reassembler {
        Reassembler::new(
            Arc::clone(&self.pool),
            self.options.receive_buffer_size,
            self.options.encoding,
        )
    }

    /// Classifies a termination and publishes the resulting event.
    ///
    /// Returns the event after all subscribers ran, or `None` for
    /// cancellations.
    pub(crate) fn publish_disconnection(
        &self,
        termination: Termination,
        session_id: Option<SessionId>,
    ) -> Option<DisconnectionEvent> {
        let event = disconnection_event(termination, session_id)?;
        debug!(client = %self.name, kind = %event.kind(), ?session_id, "Publishing disconnection");
        self.disconnections.publish(&event);
        Some(event)
    }

    /// Stops the client and releases the current session.
    ///
    /// Returns the state before stopping and whether a close was written.
    pub(crate) async fn shutdown(&self, status: CloseStatus) -> (ReconnectionState, Option<SessionId>, bool) {
        let previous = self.supervisor.force(ReconnectionState::Stopped);
        self.lifecycle().cancel();

        let Some(session) = self.take_session() else {
            return (previous, None, false);
        };

        session.cancel();
        let closed = session.close(status).await;
        (previous, Some(session.id()), closed)
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.lifecycle.get_mut().cancel();
        if let Some(session) = self.session.get_mut().take() {
            session.cancel();
        }
    }
}

// ============================================================================
// WebsocketClient
// ============================================================================

/// Client that keeps a WebSocket session alive.
///
/// Cloning the client is cheap; all clones share the same session.
///
/// # Streams
///
/// | Stream | Payload |
/// |--------|---------|
/// | [`messages`](Self::messages) | [`IncomingMessage`] in wire order |
/// | [`disconnections`](Self::disconnections) | [`DisconnectionEvent`], vetoable |
/// | [`reconnections`](Self::reconnections) | [`ReconnectionEvent`] |
/// | [`state_changes`](Self::state_changes) | [`ReconnectionState`] |
#[derive(Clone)]
pub struct WebsocketClient {
    /// Shared inner state.
    pub(crate) inner: Arc<ClientInner>,
}

// ============================================================================
// WebsocketClient - Display
// ============================================================================

impl fmt::Debug for WebsocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketClient")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WebsocketClient - Construction
// ============================================================================

impl WebsocketClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client from validated parts.
    pub(crate) fn from_parts(
        connector: Arc<dyn Connector>,
        options: ClientOptions,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner::new(connector, options, retry_policy)),
        }
    }
}

// ============================================================================
// WebsocketClient - Lifecycle
// ============================================================================

impl WebsocketClient {
    /// Starts the client.
    ///
    /// If the first connect fails, the failure is published as an `Error`
    /// disconnection and retried in the background; this call still
    /// succeeds. Calling `start` on a started client does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the client was disposed.
    pub async fn start(&self) -> Result<()> {
        reconnect::start(&self.inner, false).await
    }

    /// Starts the client, failing if the first connect fails.
    ///
    /// The client is stopped when this returns an error.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] if the client was disposed
    /// - the connect error otherwise
    pub async fn start_or_fail(&self) -> Result<()> {
        reconnect::start(&self.inner, true).await
    }

    /// Stops the client and closes the session with `code` and `reason`.
    ///
    /// Publishes a `ByUser` disconnection if the client was started.
    /// Returns `true` if a close was written to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the client was disposed.
    pub async fn stop(&self, code: u16, reason: impl Into<String>) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_not_disposed()?;

        if !inner.supervisor.is_started() {
            debug!(client = %inner.name, "Client already stopped");
            return Ok(false);
        }

        let (previous, session_id, closed) = inner.shutdown(CloseStatus::new(code, reason)).await;
        info!(client = %inner.name, ?session_id, "Client stopped");

        if previous.is_started() {
            inner.publish_disconnection(Termination::UserStop, session_id);
        }
        Ok(closed)
    }

    /// Replaces the current session with a new one.
    ///
    /// Publishes a `ByUser` disconnection for the old session. Proceeds even
    /// when automatic reconnection is disabled. Does nothing if the client
    /// is not listening or a reconnect is already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the client was disposed.
    pub async fn reconnect(&self) -> Result<()> {
        self.trigger_reconnect(ReconnectionType::ByUser).await
    }

    /// Replaces the current session, reporting `kind` as the cause.
    ///
    /// Used by external keep-alive detectors with
    /// [`ReconnectionType::NoMessageReceived`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the client was disposed.
    pub async fn trigger_reconnect(&self, kind: ReconnectionType) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_not_disposed()?;

        if !inner.supervisor.is_started() {
            debug!(client = %inner.name, "Client not started, ignoring reconnect");
            return Ok(());
        }

        reconnect::reconnect_synchronized(Arc::clone(inner), kind, None, None).await;
        Ok(())
    }

    /// Stops the client for good.
    ///
    /// Publishes a `Normal` disconnection if the client was started, then
    /// drops all subscribers. Every later call fails with
    /// [`Error::Disposed`]. Disposing twice does nothing.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (previous, session_id, _) = inner
            .shutdown(CloseStatus::normal("Client disposed"))
            .await;
        info!(client = %inner.name, "Client disposed");

        if previous.is_started() {
            inner.publish_disconnection(Termination::Disposed, session_id);
        }

        inner.messages.clear();
        inner.disconnections.clear();
        inner.reconnections.clear();
        inner.supervisor.changes().clear();
    }
}

// ============================================================================
// WebsocketClient - Sending
// ============================================================================

impl WebsocketClient {
    /// Sends a message on the current session.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] if the client was disposed
    /// - [`Error::NotStarted`] if there is no session
    /// - any socket write error
    pub async fn send(&self, message: impl Into<OutgoingMessage>) -> Result<()> {
        self.inner.ensure_not_disposed()?;
        let session = self.inner.current_session().ok_or(Error::NotStarted)?;
        session.send(message.into()).await
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[inline]
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(OutgoingMessage::Text(text.into())).await
    }

    /// Sends a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[inline]
    pub async fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.send(OutgoingMessage::Binary(bytes.into())).await
    }

    /// Serializes `value` to JSON and sends it as text.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - see [`send`](Self::send)
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send(OutgoingMessage::Text(text)).await
    }
}

// ============================================================================
// WebsocketClient - Accessors
// ============================================================================

impl WebsocketClient {
    /// Returns the client name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the options the client was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Returns the supervisor state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ReconnectionState {
        self.inner.supervisor.get()
    }

    /// Returns `true` while started, including while reconnecting.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.supervisor.is_started()
    }

    /// Returns `true` while a session is established and read.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ReconnectionState::Listening
    }

    /// Returns `true` once disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Returns the current session ID.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.current_session_id()
    }

    /// Returns when the current session last received a message.
    #[inline]
    #[must_use]
    pub fn last_message_received(&self) -> Option<Instant> {
        self.inner.current_session().map(|session| session.last_received())
    }

    /// Returns `true` if automatic reconnection is enabled.
    #[inline]
    #[must_use]
    pub fn is_reconnection_enabled(&self) -> bool {
        self.inner.reconnection_enabled()
    }

    /// Enables or disables automatic reconnection.
    ///
    /// Disabling it during a reconnect stops the client after the next
    /// failed attempt.
    #[inline]
    pub fn set_reconnection_enabled(&self, enabled: bool) {
        self.inner.reconnection_enabled.store(enabled, Ordering::Release);
    }

    /// Returns the received message stream.
    #[inline]
    #[must_use]
    pub fn messages(&self) -> &EventStream<IncomingMessage> {
        &self.inner.messages
    }

    /// Returns the disconnection stream.
    #[inline]
    #[must_use]
    pub fn disconnections(&self) -> &EventStream<DisconnectionEvent> {
        &self.inner.disconnections
    }

    /// Returns the reconnection stream.
    #[inline]
    #[must_use]
    pub fn reconnections(&self) -> &EventStream<ReconnectionEvent> {
        &self.inner.reconnections
    }

    /// Returns the state change stream.
    #[inline]
    #[must_use]
    pub fn state_changes(&self) -> &EventStream<ReconnectionState> {
        self.inner.supervisor.changes()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::protocol::DisconnectionType;
    use crate::session::NoRetry;
    use crate::transport::{Script, ScriptedConnector};

    fn client(connector: ScriptedConnector) -> (WebsocketClient, Arc<ScriptedConnector>) {
        let connector = Arc::new(connector);
        let client = WebsocketClient::from_parts(
            Arc::clone(&connector) as Arc<dyn Connector>,
            ClientOptions::new().with_name("test"),
            Arc::new(NoRetry),
        );
        (client, connector)
    }

    #[tokio::test]
    async fn test_send_requires_session() {
        let (client, _) = client(ScriptedConnector::new());
        let err = client.send_text("hi").await.unwrap_err();
        assert!(matches!(err, Error::NotStarted));
    }

    #[tokio::test]
    async fn test_start_send_stop() {
        let (client, connector) = client(ScriptedConnector::new().with_script(Script::new()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        client
            .disconnections()
            .subscribe(move |event: &DisconnectionEvent| sink.lock().push(event.kind()));

        client.start_or_fail().await.expect("start");
        assert!(client.is_running());
        assert!(client.session_id().is_some());

        client.send_text("a").await.expect("text");
        client.send_binary(vec![1, 2]).await.expect("binary");
        client.send_json(&serde_json::json!({ "op": "ping" })).await.expect("json");

        assert!(client.stop(CloseStatus::NORMAL_CLOSURE, "bye").await.expect("stop"));
        assert_eq!(client.state(), ReconnectionState::Stopped);
        assert!(client.session_id().is_none());
        assert_eq!(*events.lock(), vec![DisconnectionType::ByUser]);

        let log = connector.log(0).expect("log");
        assert_eq!(log.sent().len(), 3);
        assert_eq!(log.sent()[2], OutgoingMessage::Text(r#"{"op":"ping"}"#.to_string()));
        assert_eq!(log.closes()[0].reason, "bye");
    }

    #[tokio::test]
    async fn test_stop_when_not_started() {
        let (client, _) = client(ScriptedConnector::new());
        assert!(!client.stop(CloseStatus::NORMAL_CLOSURE, "bye").await.expect("stop"));
        assert_eq!(client.state(), ReconnectionState::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_connects_once() {
        let (client, connector) = client(ScriptedConnector::new().with_script(Script::new()));
        client.start().await.expect("first");
        client.start().await.expect("second");
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_start_or_fail_returns_connect_error() {
        let (client, _) = client(ScriptedConnector::new().with_failure("refused"));
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        client
            .disconnections()
            .subscribe(move |event: &DisconnectionEvent| sink.lock().push(event.kind()));

        let err = client.start_or_fail().await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(client.state(), ReconnectionState::Stopped);
        assert_eq!(*kinds.lock(), vec![DisconnectionType::Error]);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (client, connector) = client(
            ScriptedConnector::new()
                .with_script(Script::new())
                .with_script(Script::new()),
        );

        client.start().await.expect("start");
        client.stop(CloseStatus::NORMAL_CLOSURE, "pause").await.expect("stop");
        client.start().await.expect("restart");

        assert!(client.is_running());
        assert_eq!(connector.socket_count(), 2);
    }

    #[tokio::test]
    async fn test_dispose_rejects_later_calls() {
        let (client, _) = client(ScriptedConnector::new().with_script(Script::new()));
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        client
            .disconnections()
            .subscribe(move |event: &DisconnectionEvent| sink.lock().push(event.kind()));

        client.start().await.expect("start");
        client.dispose().await;
        client.dispose().await;

        assert!(client.is_disposed());
        assert_eq!(client.state(), ReconnectionState::Stopped);
        assert_eq!(*kinds.lock(), vec![DisconnectionType::Normal]);
        assert_eq!(client.disconnections().subscriber_count(), 0);

        assert!(matches!(client.start().await, Err(Error::Disposed)));
        assert!(matches!(client.send_text("x").await, Err(Error::Disposed)));
        assert!(matches!(client.reconnect().await, Err(Error::Disposed)));
        assert!(matches!(
            client.stop(CloseStatus::NORMAL_CLOSURE, "x").await,
            Err(Error::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_last_message_received_tracks_session() {
        let (client, _) = client(
            ScriptedConnector::new()
                .with_script(Script::new().pause(Duration::from_millis(20)).text("tick")),
        );
        assert!(client.last_message_received().is_none());

        client.start().await.expect("start");
        let connected_at = client.last_message_received().expect("session");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = client.last_message_received().expect("session");
        assert!(after > connected_at);
    }

    #[test]
    fn test_reconnection_switch() {
        let (client, _) = client(ScriptedConnector::new());
        assert!(client.is_reconnection_enabled());
        client.set_reconnection_enabled(false);
        assert!(!client.is_reconnection_enabled());
    }
}
