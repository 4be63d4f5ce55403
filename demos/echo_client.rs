//! Echo client demonstration.
//!
//! Demonstrates:
//! - Building a client with options and a retry policy
//! - Subscribing to messages, disconnections and reconnections
//! - Sending text, binary and JSON
//! - Vetoing a server close
//! - Reconnecting on demand and disposing
//!
//! Without `--url`, a local echo server is started on an ephemeral port.
//!
//! Usage:
//!   cargo run --example echo_client
//!   cargo run --example echo_client -- --debug
//!   cargo run --example echo_client -- --url ws://127.0.0.1:9001

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use resilient_websocket::{
    ClientOptions, DisconnectionEvent, ExponentialBackoff, IncomingMessage, ReconnectionEvent,
    Result, WebsocketClient,
};

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    url: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let url = args
            .iter()
            .position(|a| a == "--url")
            .and_then(|i| args.get(i + 1).cloned());
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            url,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "resilient_websocket=debug"
    } else {
        "resilient_websocket=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Client ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    let url = match args.url {
        Some(url) => url,
        None => {
            let url = spawn_echo_server().await?;
            println!("[Setup] Local echo server on {url}");
            url
        }
    };

    let client = WebsocketClient::builder()
        .url(&url)
        .options(
            ClientOptions::new()
                .with_name("echo")
                .with_connect_timeout(Duration::from_secs(5)),
        )
        .retry_policy(
            ExponentialBackoff::new()
                .with_initial_delay(Duration::from_millis(200))
                .with_max_attempts(5),
        )
        .build()?;

    client.messages().subscribe(|message: &IncomingMessage| match message {
        IncomingMessage::Text(text) => println!("    <- text: {text}"),
        IncomingMessage::Binary(binary) => println!("    <- binary: {:?}", binary.to_vec()),
    });

    client.disconnections().subscribe(|event: &DisconnectionEvent| {
        println!("    !! disconnected: {} (session {:?})", event.kind(), event.session_id());
    });

    client.reconnections().subscribe(|event: &ReconnectionEvent| {
        println!("    ++ connected: {:?} (session {})", event.kind, event.session_id);
    });

    // ========================================================================
    // Start and send
    // ========================================================================

    println!("[1] Starting client...");
    client.start_or_fail().await?;
    println!("    ✓ State: {}", client.state());

    println!("[2] Sending messages...");
    client.send_text("hello").await?;
    client.send_binary(vec![1, 2, 3]).await?;
    client
        .send_json(&serde_json::json!({ "op": "subscribe", "channel": "ticker" }))
        .await?;
    sleep(Duration::from_millis(200)).await;

    // ========================================================================
    // Reconnect
    // ========================================================================

    println!("[3] Reconnecting on demand...");
    client.reconnect().await?;
    println!("    ✓ State: {}", client.state());
    client.send_text("after reconnect").await?;
    sleep(Duration::from_millis(200)).await;

    // ========================================================================
    // Shutdown
    // ========================================================================

    println!("[4] Disposing client...");
    client.dispose().await;
    println!("    ✓ Disposed");

    Ok(())
}

// ============================================================================
// Echo Server
// ============================================================================

/// Starts an echo server and returns its URL.
async fn spawn_echo_server() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let reply = match message {
                        Message::Text(_) | Message::Binary(_) => message,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    if ws.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    Ok(format!("ws://{addr}"))
}
