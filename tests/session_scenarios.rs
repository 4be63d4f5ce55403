//! End-to-end client scenarios over scripted and real sockets.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use resilient_websocket::protocol::FrameKind;
use resilient_websocket::{
    BinaryMessage, ClientOptions, CloseStatus, DisconnectionEvent, DisconnectionType, Error,
    FixedDelay, IncomingMessage, NoRetry, ReconnectionEvent, ReconnectionState, ReconnectionType,
    RetryPolicy, Script, ScriptedConnector, WebsocketClient,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A received message, copied out of the pool at delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Received {
    Text(String),
    Binary(Vec<u8>),
}

/// Records everything a client publishes.
#[derive(Default, Clone)]
struct Recorder {
    messages: Arc<Mutex<Vec<Received>>>,
    views: Arc<Mutex<Vec<BinaryMessage>>>,
    disconnections: Arc<Mutex<Vec<DisconnectionEvent>>>,
    reconnections: Arc<Mutex<Vec<ReconnectionEvent>>>,
    states: Arc<Mutex<Vec<ReconnectionState>>>,
}

impl Recorder {
    fn attach(client: &WebsocketClient) -> Self {
        let recorder = Self::default();

        let messages = Arc::clone(&recorder.messages);
        let views = Arc::clone(&recorder.views);
        client.messages().subscribe(move |message: &IncomingMessage| match message {
            IncomingMessage::Text(text) => messages.lock().push(Received::Text(text.clone())),
            IncomingMessage::Binary(binary) => {
                messages.lock().push(Received::Binary(binary.to_vec()));
                views.lock().push(binary.clone());
            }
        });

        let disconnections = Arc::clone(&recorder.disconnections);
        client
            .disconnections()
            .subscribe(move |event: &DisconnectionEvent| disconnections.lock().push(event.clone()));

        let reconnections = Arc::clone(&recorder.reconnections);
        client
            .reconnections()
            .subscribe(move |event: &ReconnectionEvent| reconnections.lock().push(event.clone()));

        let states = Arc::clone(&recorder.states);
        client
            .state_changes()
            .subscribe(move |state: &ReconnectionState| states.lock().push(*state));

        recorder
    }

    fn messages(&self) -> Vec<Received> {
        self.messages.lock().clone()
    }

    fn disconnection_kinds(&self) -> Vec<DisconnectionType> {
        self.disconnections.lock().iter().map(DisconnectionEvent::kind).collect()
    }

    fn reconnection_kinds(&self) -> Vec<ReconnectionType> {
        self.reconnections.lock().iter().map(|event| event.kind).collect()
    }

    fn states(&self) -> Vec<ReconnectionState> {
        self.states.lock().clone()
    }
}

fn build(
    connector: &Arc<ScriptedConnector>,
    options: ClientOptions,
    retry_policy: impl RetryPolicy + 'static,
) -> WebsocketClient {
    WebsocketClient::builder()
        .shared_connector(Arc::clone(connector) as Arc<dyn resilient_websocket::Connector>)
        .options(options.with_name("scenario"))
        .retry_policy(retry_policy)
        .build()
        .expect("valid configuration")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

fn text(value: &str) -> Received {
    Received::Text(value.to_string())
}

// ============================================================================
// Server Close
// ============================================================================

#[tokio::test]
async fn test_messages_then_server_close_stops_client() {
    init_tracing();
    let connector = Arc::new(ScriptedConnector::new().with_script(
        Script::new()
            .text("hello")
            .binary(vec![1, 2, 3])
            .close(Some(CloseStatus::normal("bye"))),
    ));
    let client = build(&connector, ClientOptions::new().with_reconnection(false), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start_or_fail().await);
    wait_until(|| client.state() == ReconnectionState::Stopped).await;

    assert_eq!(
        recorder.messages(),
        vec![text("hello"), Received::Binary(vec![1, 2, 3])]
    );
    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::ByServer]);

    let event = recorder.disconnections.lock()[0].clone();
    assert_eq!(event.close_status().map(|s| s.reason.as_str()), Some("bye"));
    assert_eq!(event.session_id(), Some(recorder.reconnections.lock()[0].session_id));

    assert_eq!(connector.log(0).expect("log").closes().len(), 1);
    assert!(client.session_id().is_none());
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_server_close_with_reconnection_reports_lost_and_reconnects() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new().text("first").close(None))
            .with_script(Script::new().text("second")),
    );
    let client = build(&connector, ClientOptions::new(), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 2).await;

    assert_eq!(recorder.messages(), vec![text("first"), text("second")]);
    assert_eq!(
        recorder.disconnection_kinds(),
        vec![DisconnectionType::ByServer, DisconnectionType::Lost]
    );
    assert_eq!(
        recorder.reconnection_kinds(),
        vec![ReconnectionType::Initial, ReconnectionType::Lost]
    );
    assert_eq!(client.state(), ReconnectionState::Listening);
    assert_eq!(connector.socket_count(), 2);
}

// ============================================================================
// Close Veto
// ============================================================================

#[tokio::test]
async fn test_vetoed_close_keeps_reading_without_reconnection() {
    let connector = Arc::new(ScriptedConnector::new().with_script(
        Script::new()
            .text("one")
            .close(Some(CloseStatus::new(CloseStatus::GOING_AWAY, "maintenance")))
            .text("two"),
    ));
    let client = build(&connector, ClientOptions::new().with_reconnection(false), NoRetry);
    client.disconnections().subscribe(|event: &DisconnectionEvent| {
        if event.kind() == DisconnectionType::ByServer {
            event.cancel_closing();
        }
    });
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start_or_fail().await);
    wait_until(|| recorder.messages().len() == 2).await;

    assert_eq!(recorder.messages(), vec![text("one"), text("two")]);
    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::ByServer]);
    assert_eq!(client.state(), ReconnectionState::Listening);
    assert!(connector.log(0).expect("log").closes().is_empty());
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_vetoed_close_with_reconnection_is_treated_as_loss() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new().close(None))
            .with_script(Script::new().text("again")),
    );
    let client = build(&connector, ClientOptions::new(), NoRetry);
    client.disconnections().subscribe(|event: &DisconnectionEvent| event.cancel_closing());
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 1).await;

    assert_eq!(
        recorder.disconnection_kinds(),
        vec![DisconnectionType::ByServer, DisconnectionType::Lost]
    );
    let lost = recorder.disconnections.lock()[1].clone();
    assert!(matches!(
        lost.error().map(|e| &**e),
        Some(Error::ClosedByServer { .. })
    ));
    assert_eq!(
        recorder.reconnection_kinds(),
        vec![ReconnectionType::Initial, ReconnectionType::Lost]
    );
    assert_eq!(client.state(), ReconnectionState::Listening);
}

// ============================================================================
// Connection Loss
// ============================================================================

#[tokio::test]
async fn test_transient_failure_reconnects_once() {
    init_tracing();
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new().text("a").fail("connection reset"))
            .with_script(Script::new().text("b")),
    );
    let client = build(&connector, ClientOptions::new(), FixedDelay::new(Duration::from_millis(10)));
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start_or_fail().await);
    wait_until(|| recorder.messages().len() == 2).await;

    assert_eq!(recorder.messages(), vec![text("a"), text("b")]);
    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::Lost]);
    assert!(
        recorder.disconnections.lock()[0]
            .error()
            .is_some_and(|e| e.is_connection_error())
    );
    assert_eq!(
        recorder.states(),
        vec![
            ReconnectionState::Connecting,
            ReconnectionState::Listening,
            ReconnectionState::Reconnecting,
            ReconnectionState::Listening,
        ]
    );
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(connector.socket_count(), 2);
}

#[tokio::test]
async fn test_loss_without_reconnection_stops() {
    let connector = Arc::new(ScriptedConnector::new().with_script(Script::new().fail("reset")));
    let client = build(&connector, ClientOptions::new().with_reconnection(false), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| client.state() == ReconnectionState::Stopped).await;

    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::Lost]);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_reconnection_veto_stops_client() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new().fail("reset"))
            .with_script(Script::new()),
    );
    let client = build(&connector, ClientOptions::new(), NoRetry);
    client
        .disconnections()
        .subscribe(|event: &DisconnectionEvent| event.cancel_reconnection());

    assert_ok!(client.start().await);
    wait_until(|| client.state() == ReconnectionState::Stopped).await;

    assert_eq!(connector.connect_count(), 1);
}

// ============================================================================
// Reconnect Serialization
// ============================================================================

#[tokio::test]
async fn test_concurrent_triggers_run_one_reconnect() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_connect_delay(Duration::from_millis(50))
            .with_script(Script::new())
            .with_script(Script::new())
            .with_script(Script::new()),
    );
    let client = build(&connector, ClientOptions::new(), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start_or_fail().await);

    let (first, second) = tokio::join!(
        client.reconnect(),
        client.trigger_reconnect(ReconnectionType::NoMessageReceived)
    );
    assert_ok!(first);
    assert_ok!(second);

    assert_eq!(connector.connect_count(), 2);
    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::ByUser]);
    assert_eq!(
        recorder.reconnection_kinds(),
        vec![ReconnectionType::Initial, ReconnectionType::ByUser]
    );
    assert_eq!(client.state(), ReconnectionState::Listening);
}

#[tokio::test]
async fn test_read_failure_racing_watchdog_reconnects_once() {
    for pause_ms in [90, 100, 110] {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_script(
                    Script::new()
                        .pause(Duration::from_millis(pause_ms))
                        .fail("connection reset"),
                )
                .with_script(Script::new().text("fresh")),
        );
        let client = build(
            &connector,
            ClientOptions::new().with_no_message_timeout(Duration::from_millis(100)),
            NoRetry,
        );
        let recorder = Recorder::attach(&client);

        assert_ok!(client.start().await);
        wait_until(|| recorder.messages().len() == 1).await;

        let states = recorder.states();
        let first_session = recorder.reconnections.lock()[0].session_id;
        client.dispose().await;

        assert_eq!(
            states[..4],
            [
                ReconnectionState::Connecting,
                ReconnectionState::Listening,
                ReconnectionState::Reconnecting,
                ReconnectionState::Listening,
            ],
            "pause {pause_ms}ms"
        );

        let first_session_events: Vec<_> = recorder
            .disconnections
            .lock()
            .iter()
            .filter(|event| event.session_id() == Some(first_session))
            .map(DisconnectionEvent::kind)
            .collect();
        assert_eq!(first_session_events.len(), 1, "pause {pause_ms}ms");
        assert!(matches!(
            first_session_events[0],
            DisconnectionType::Lost | DisconnectionType::NoMessageReceived
        ));
    }
}

#[tokio::test]
async fn test_user_reconnect_runs_with_reconnection_disabled() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new())
            .with_script(Script::new()),
    );
    let client = build(&connector, ClientOptions::new().with_reconnection(false), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    let before = client.session_id();
    assert_ok!(client.reconnect().await);

    assert!(client.is_running());
    assert_ne!(client.session_id(), before);
    assert_eq!(recorder.disconnections.lock()[0].session_id(), before);
    assert_eq!(connector.log(0).expect("log").closes()[0].reason, "Reconnecting");
}

#[tokio::test]
async fn test_reconnect_when_not_started_is_ignored() {
    let connector = Arc::new(ScriptedConnector::new());
    let client = build(&connector, ClientOptions::new(), NoRetry);

    assert_ok!(client.reconnect().await);
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(client.state(), ReconnectionState::Idle);
}

// ============================================================================
// Retry Policy
// ============================================================================

#[tokio::test]
async fn test_initial_failures_are_retried() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_failure("down")
            .with_failure("still down")
            .with_script(Script::new().text("up")),
    );
    let client = build(&connector, ClientOptions::new(), FixedDelay::new(Duration::from_millis(10)));
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 1).await;

    assert_eq!(
        recorder.disconnection_kinds(),
        vec![DisconnectionType::Error, DisconnectionType::Error]
    );
    assert_eq!(recorder.reconnection_kinds(), vec![ReconnectionType::Error]);
    assert_eq!(
        recorder.states(),
        vec![
            ReconnectionState::Connecting,
            ReconnectionState::Reconnecting,
            ReconnectionState::Listening,
        ]
    );
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test]
async fn test_retry_policy_gives_up() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_failure("down")
            .with_failure("down")
            .with_failure("down"),
    );
    let client = build(
        &connector,
        ClientOptions::new(),
        FixedDelay::new(Duration::from_millis(10)).with_max_attempts(1),
    );
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| client.state() == ReconnectionState::Stopped).await;

    assert_eq!(
        recorder.disconnection_kinds(),
        vec![DisconnectionType::Error, DisconnectionType::Error]
    );
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_dispose_cancels_pending_retry() {
    let connector = Arc::new(ScriptedConnector::new().with_failure("down"));
    let client = build(&connector, ClientOptions::new(), FixedDelay::new(Duration::from_secs(10)));
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    assert_eq!(client.state(), ReconnectionState::Reconnecting);

    client.dispose().await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(client.state(), ReconnectionState::Stopped);
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(
        recorder.disconnection_kinds(),
        vec![DisconnectionType::Error, DisconnectionType::Normal]
    );
    assert_err!(client.start().await);
}

// ============================================================================
// Client Lifetime
// ============================================================================

/// Waits for retries to settle after the client was dropped.
async fn assert_connects_stop(connector: &ScriptedConnector) {
    sleep(Duration::from_millis(50)).await;
    let settled = connector.connect_count();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.connect_count(), settled);
}

#[tokio::test]
async fn test_dropped_client_stops_reconnecting() {
    let connector = Arc::new(ScriptedConnector::new().with_script(Script::new().fail("reset")));
    let client = build(&connector, ClientOptions::new(), FixedDelay::new(Duration::from_millis(10)));

    assert_ok!(client.start().await);
    wait_until(|| connector.connect_count() >= 4).await;
    drop(client);

    assert_connects_stop(&connector).await;
}

#[tokio::test]
async fn test_dropped_client_stops_initial_retries() {
    let connector = Arc::new(ScriptedConnector::new());
    let client = build(&connector, ClientOptions::new(), FixedDelay::new(Duration::from_millis(10)));

    assert_ok!(client.start().await);
    wait_until(|| connector.connect_count() >= 4).await;
    drop(client);

    assert_connects_stop(&connector).await;
}

// ============================================================================
// Inactivity
// ============================================================================

#[tokio::test]
async fn test_silence_triggers_no_message_reconnect() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .with_script(Script::new())
            .with_script(Script::new().text("fresh")),
    );
    let client = build(
        &connector,
        ClientOptions::new().with_no_message_timeout(Duration::from_millis(100)),
        NoRetry,
    );
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 1).await;
    client.dispose().await;

    assert_eq!(
        recorder.disconnection_kinds().first(),
        Some(&DisconnectionType::NoMessageReceived)
    );
    assert_eq!(
        recorder.reconnection_kinds()[..2],
        [ReconnectionType::Initial, ReconnectionType::NoMessageReceived]
    );
}

// ============================================================================
// Messages
// ============================================================================

#[tokio::test]
async fn test_binary_views_rotate_through_pool() {
    let connector = Arc::new(ScriptedConnector::new().with_script(
        Script::new()
            .binary(vec![1])
            .binary(vec![2, 2])
            .binary(vec![3, 3, 3]),
    ));
    let client = build(&connector, ClientOptions::new().with_binary_pool_size(2), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 3).await;

    let views = recorder.views.lock().clone();
    assert!(views[0].shares_buffer_with(&views[2]));
    assert!(!views[0].shares_buffer_with(&views[1]));
    // The first view now shows the third payload
    assert_eq!(views[0].to_vec(), vec![3, 3, 3]);
    assert_eq!(
        recorder.messages()[0],
        Received::Binary(vec![1]),
        "delivered content was intact at delivery time"
    );
}

#[tokio::test]
async fn test_text_conversion_disabled_delivers_binary() {
    let connector = Arc::new(ScriptedConnector::new().with_script(
        Script::new().fragmented(FrameKind::Text, "h\u{e9}llo".as_bytes().to_vec(), 3),
    ));
    let client = build(&connector, ClientOptions::new().with_text_conversion(false), NoRetry);
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 1).await;

    assert_eq!(
        recorder.messages(),
        vec![Received::Binary("h\u{e9}llo".as_bytes().to_vec())]
    );
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_stop_delivery() {
    let connector = Arc::new(
        ScriptedConnector::new().with_script(Script::new().text("x").text("y")),
    );
    let client = build(&connector, ClientOptions::new(), NoRetry);
    client.messages().subscribe(|_| panic!("subscriber bug"));
    let recorder = Recorder::attach(&client);

    assert_ok!(client.start().await);
    wait_until(|| recorder.messages().len() == 2).await;

    assert!(client.is_running());
    assert!(recorder.disconnection_kinds().is_empty());
}

#[tokio::test]
async fn test_channel_adapter_receives_messages() -> anyhow::Result<()> {
    let connector = Arc::new(ScriptedConnector::new().with_script(Script::new().text(r#"{"id":7}"#)));
    let client = build(&connector, ClientOptions::new(), NoRetry);
    let (_id, mut messages) = client.messages().channel();

    client.start().await?;
    let message = tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("channel closed"))?;

    let value: serde_json::Value = message.json()?;
    assert_eq!(value["id"], 7);
    Ok(())
}

// ============================================================================
// Tungstenite
// ============================================================================

#[tokio::test]
async fn test_tungstenite_session_end_to_end() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
        ws.send(Message::Text("hello".into())).await.expect("hello");

        if let Some(Ok(message)) = ws.next().await {
            ws.send(message).await.expect("echo");
        }

        ws.send(Message::Close(None)).await.expect("close");
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = WebsocketClient::builder()
        .url(format!("ws://{addr}"))
        .options(ClientOptions::new().with_reconnection(false))
        .retry_policy(NoRetry)
        .build()?;
    let recorder = Recorder::attach(&client);

    client.start_or_fail().await?;
    client.send_text("ping").await?;

    wait_until(|| client.state() == ReconnectionState::Stopped).await;

    assert_eq!(recorder.messages(), vec![text("hello"), text("ping")]);
    assert_eq!(recorder.disconnection_kinds(), vec![DisconnectionType::ByServer]);

    client.dispose().await;
    server.await?;
    Ok(())
}
