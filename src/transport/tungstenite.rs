//! Socket implementation over `tokio-tungstenite`.
//!
//! Tungstenite yields whole messages; the reader slices each message into
//! chunks no larger than the caller's scratch buffer so the client sees the
//! same partial-read behaviour as with any other socket.
//!
//! # Example
//!
//! ```no_run
//! use resilient_websocket::transport::{Connector, TungsteniteConnector};
//!
//! # async fn example() -> resilient_websocket::Result<()> {
//! let connector = TungsteniteConnector::new("ws://127.0.0.1:9001")?;
//! let socket = connector.connect().await?;
//! # drop(socket);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Bytes, Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ChunkResult, CloseStatus, FrameKind, OutgoingMessage, SocketState};

use super::socket::{Connector, Socket, SocketReader, SocketWriter};

// ============================================================================
// Types
// ============================================================================

/// Client WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket state shared by both halves.
type SharedState = Arc<AtomicU8>;

/// Stores a new socket state.
#[inline]
fn set_state(state: &SharedState, value: SocketState) {
    state.store(value as u8, Ordering::Release);
}

/// Loads the current socket state.
#[inline]
fn get_state(state: &SharedState) -> SocketState {
    SocketState::from_u8(state.load(Ordering::Acquire))
}

// ============================================================================
// TungsteniteConnector
// ============================================================================

/// Connects to a `ws://` or `wss://` endpoint.
///
/// `wss://` requires one of the TLS features of `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    /// Endpoint URL.
    url: Url,
}

impl TungsteniteConnector {
    /// Creates a connector for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid or not `ws`/`wss`.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("Invalid URL '{url}': {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(Error::config(format!(
                "Unsupported URL scheme '{other}', expected ws or wss"
            ))),
        }
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self) -> Result<Socket> {
        let (ws_stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        debug!(url = %self.url, status = %response.status(), "WebSocket handshake completed");

        let state: SharedState = Arc::new(AtomicU8::new(SocketState::Open as u8));
        let (sink, stream) = ws_stream.split();

        Ok(Socket::new(
            TungsteniteReader {
                stream,
                pending: None,
                state: Arc::clone(&state),
            },
            TungsteniteWriter { sink, state },
        ))
    }
}

// ============================================================================
// TungsteniteReader
// ============================================================================

/// A message partially handed out as chunks.
struct PendingFrame {
    /// Frame kind.
    kind: FrameKind,
    /// Whole payload.
    data: Bytes,
    /// Bytes already handed out.
    offset: usize,
}

/// Read half over a tungstenite stream.
pub struct TungsteniteReader {
    /// Underlying stream half.
    stream: SplitStream<WsStream>,
    /// Message being sliced into chunks.
    pending: Option<PendingFrame>,
    /// Shared socket state.
    state: SharedState,
}

impl TungsteniteReader {
    /// Copies the next slice of the pending frame into `buffer`.
    fn drain_pending(&mut self, buffer: &mut [u8]) -> Option<ChunkResult> {
        let frame = self.pending.as_mut()?;
        let remaining = &frame.data[frame.offset..];
        let count = remaining.len().min(buffer.len());
        buffer[..count].copy_from_slice(&remaining[..count]);
        frame.offset += count;

        let kind = frame.kind;
        let end_of_message = frame.offset >= frame.data.len();
        if end_of_message {
            self.pending = None;
        }

        Some(ChunkResult::data(kind, count, end_of_message))
    }
}

#[async_trait]
impl SocketReader for TungsteniteReader {
    async fn receive_chunk(&mut self, buffer: &mut [u8]) -> Result<ChunkResult> {
        loop {
            if let Some(chunk) = self.drain_pending(buffer) {
                return Ok(chunk);
            }

            match self.stream.next().await {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    let kind = if message.is_text() {
                        FrameKind::Text
                    } else {
                        FrameKind::Binary
                    };
                    self.pending = Some(PendingFrame {
                        kind,
                        data: message.into_data(),
                        offset: 0,
                    });
                }

                Some(Ok(Message::Close(frame))) => {
                    let status = frame.map(|frame| {
                        CloseStatus::new(u16::from(frame.code), frame.reason.as_str())
                    });
                    debug!(?status, "Close frame received");

                    let next = match get_state(&self.state) {
                        SocketState::CloseSent => SocketState::Closed,
                        _ => SocketState::CloseReceived,
                    };
                    set_state(&self.state, next);

                    return Ok(ChunkResult::close(status));
                }

                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(other)) => {
                    trace!(len = other.len(), "Skipping control frame");
                }

                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    set_state(&self.state, SocketState::Closed);
                    return Err(Error::ConnectionClosed);
                }

                Some(Err(e)) => {
                    set_state(&self.state, SocketState::Aborted);
                    return Err(Error::WebSocket(e));
                }
            }
        }
    }

    fn state(&self) -> SocketState {
        get_state(&self.state)
    }
}

// ============================================================================
// TungsteniteWriter
// ============================================================================

/// Write half over a tungstenite sink.
pub struct TungsteniteWriter {
    /// Underlying sink half.
    sink: SplitSink<WsStream, Message>,
    /// Shared socket state.
    state: SharedState,
}

#[async_trait]
impl SocketWriter for TungsteniteWriter {
    async fn send(&mut self, message: OutgoingMessage) -> Result<()> {
        let message = match message {
            OutgoingMessage::Text(text) => Message::Text(text.into()),
            OutgoingMessage::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self, status: CloseStatus) -> Result<()> {
        match get_state(&self.state) {
            // Tungstenite queues the close reply when it reads the peer's close frame
            SocketState::CloseReceived => {
                self.sink.flush().await?;
                set_state(&self.state, SocketState::Closed);
            }

            SocketState::Connecting | SocketState::Open => {
                let frame = CloseFrame {
                    code: CloseCode::from(status.code),
                    reason: status.reason.into(),
                };
                self.sink.send(Message::Close(Some(frame))).await?;
                set_state(&self.state, SocketState::CloseSent);
            }

            SocketState::CloseSent | SocketState::Closed | SocketState::Aborted => {
                trace!("Close requested on a closing socket");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
