//! Scripted in-memory socket.
//!
//! Plays back a prepared sequence of chunks, close frames and failures.
//! Used by the test suite and benchmarks, and useful for exercising
//! application subscribers without a server.
//!
//! # Example
//!
//! ```
//! use resilient_websocket::protocol::{CloseStatus, FrameKind};
//! use resilient_websocket::transport::{Script, ScriptedConnector};
//!
//! let connector = ScriptedConnector::new()
//!     .with_script(
//!         Script::new()
//!             .text("hello")
//!             .fragmented(FrameKind::Binary, vec![0u8; 10_000], 1024)
//!             .close(Some(CloseStatus::normal("bye"))),
//!     )
//!     .with_failure("server unavailable");
//! assert_eq!(connector.connect_count(), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{ChunkResult, CloseStatus, FrameKind, OutgoingMessage, SocketState};

use super::socket::{Connector, Socket, SocketReader, SocketWriter};

// ============================================================================
// Step
// ============================================================================

/// One scripted read outcome.
#[derive(Debug, Clone)]
enum Step {
    /// A chunk of a data frame.
    Chunk {
        kind: FrameKind,
        bytes: Vec<u8>,
        end_of_message: bool,
    },
    /// A close frame.
    Close(Option<CloseStatus>),
    /// A read failure.
    Fail(String),
    /// Wait before the next step.
    Pause(Duration),
}

// ============================================================================
// Script
// ============================================================================

/// Sequence of reads a scripted socket plays back.
///
/// Once the script is exhausted, reads wait forever (until cancelled).
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Remaining steps.
    steps: VecDeque<Step>,
}

impl Script {
    /// Creates an empty script.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-chunk text frame.
    #[must_use]
    pub fn text(self, text: impl Into<String>) -> Self {
        let bytes = text.into().into_bytes();
        self.chunk(FrameKind::Text, bytes, true)
    }

    /// Adds a single-chunk binary frame.
    #[must_use]
    pub fn binary(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.chunk(FrameKind::Binary, bytes, true)
    }

    /// Adds a frame split into chunks of at most `chunk_size` bytes.
    ///
    /// An empty payload yields one empty final chunk.
    #[must_use]
    pub fn fragmented(mut self, kind: FrameKind, payload: Vec<u8>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        if payload.is_empty() {
            return self.chunk(kind, Vec::new(), true);
        }

        let pieces = payload.chunks(chunk_size).count();
        for (index, piece) in payload.chunks(chunk_size).enumerate() {
            self.steps.push_back(Step::Chunk {
                kind,
                bytes: piece.to_vec(),
                end_of_message: index + 1 == pieces,
            });
        }
        self
    }

    /// Adds one raw chunk.
    #[must_use]
    pub fn chunk(mut self, kind: FrameKind, bytes: impl Into<Vec<u8>>, end_of_message: bool) -> Self {
        self.steps.push_back(Step::Chunk {
            kind,
            bytes: bytes.into(),
            end_of_message,
        });
        self
    }

    /// Adds a close frame.
    #[must_use]
    pub fn close(mut self, status: Option<CloseStatus>) -> Self {
        self.steps.push_back(Step::Close(status));
        self
    }

    /// Adds a read failure (connection reset).
    #[must_use]
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fail(message.into()));
        self
    }

    /// Adds a pause before the next step.
    #[must_use]
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push_back(Step::Pause(duration));
        self
    }

    /// Returns the number of remaining steps.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no steps remain.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Turns the script into a standalone socket.
    #[must_use]
    pub fn into_socket(self) -> (Socket, SocketLog) {
        let log = SocketLog::default();
        let state = Arc::new(AtomicU8::new(SocketState::Open as u8));
        let socket = Socket::new(
            ScriptedReader {
                steps: self.steps,
                state: Arc::clone(&state),
            },
            ScriptedWriter {
                log: log.clone(),
                state,
            },
        );
        (socket, log)
    }
}

// ============================================================================
// SocketLog
// ============================================================================

/// What the client wrote to a scripted socket.
#[derive(Debug, Clone, Default)]
pub struct SocketLog {
    /// Messages sent.
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    /// Close statuses sent.
    closes: Arc<Mutex<Vec<CloseStatus>>>,
}

impl SocketLog {
    /// Returns the messages sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().clone()
    }

    /// Returns the close statuses sent so far.
    #[must_use]
    pub fn closes(&self) -> Vec<CloseStatus> {
        self.closes.lock().clone()
    }
}

// ============================================================================
// ScriptedReader / ScriptedWriter
// ============================================================================

/// Read half of a scripted socket.
pub struct ScriptedReader {
    /// Remaining steps.
    steps: VecDeque<Step>,
    /// Shared socket state.
    state: Arc<AtomicU8>,
}

#[async_trait]
impl SocketReader for ScriptedReader {
    async fn receive_chunk(&mut self, buffer: &mut [u8]) -> Result<ChunkResult> {
        loop {
            let Some(step) = self.steps.pop_front() else {
                trace!("Script exhausted, waiting for cancellation");
                return std::future::pending().await;
            };

            match step {
                Step::Chunk {
                    kind,
                    bytes,
                    end_of_message,
                } => {
                    // Oversized chunks report their full length, like a non-conforming socket.
                    let copied = bytes.len().min(buffer.len());
                    buffer[..copied].copy_from_slice(&bytes[..copied]);
                    return Ok(ChunkResult::data(kind, bytes.len(), end_of_message));
                }

                Step::Close(status) => {
                    self.state
                        .store(SocketState::CloseReceived as u8, Ordering::Release);
                    return Ok(ChunkResult::close(status));
                }

                Step::Fail(message) => {
                    self.state.store(SocketState::Aborted as u8, Ordering::Release);
                    return Err(Error::Io(IoError::new(ErrorKind::ConnectionReset, message)));
                }

                Step::Pause(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Write half of a scripted socket.
pub struct ScriptedWriter {
    /// Record of writes.
    log: SocketLog,
    /// Shared socket state.
    state: Arc<AtomicU8>,
}

#[async_trait]
impl SocketWriter for ScriptedWriter {
    async fn send(&mut self, message: OutgoingMessage) -> Result<()> {
        if !SocketState::from_u8(self.state.load(Ordering::Acquire)).is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.log.sent.lock().push(message);
        Ok(())
    }

    async fn close(&mut self, status: CloseStatus) -> Result<()> {
        self.log.closes.lock().push(status);
        let next = match SocketState::from_u8(self.state.load(Ordering::Acquire)) {
            SocketState::CloseReceived => SocketState::Closed,
            _ => SocketState::CloseSent,
        };
        self.state.store(next as u8, Ordering::Release);
        Ok(())
    }
}

// ============================================================================
// ScriptedConnector
// ============================================================================

/// Outcome of one scripted connect.
#[derive(Debug, Clone)]
enum Attempt {
    /// Handshake succeeds and the socket plays the script.
    Connect(Script),
    /// Handshake fails.
    Refuse(String),
}

/// Connector that plays back one prepared outcome per `connect` call.
///
/// When all outcomes are used up, further connects fail.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    /// Outcomes in order.
    attempts: Mutex<VecDeque<Attempt>>,
    /// Delay before each connect resolves.
    connect_delay: Option<Duration>,
    /// Number of `connect` calls so far.
    connects: AtomicUsize,
    /// Write logs of established sockets, in connect order.
    logs: Mutex<Vec<SocketLog>>,
}

impl ScriptedConnector {
    /// Creates a connector with no outcomes.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful connect playing `script`.
    #[must_use]
    pub fn with_script(self, script: Script) -> Self {
        self.attempts.lock().push_back(Attempt::Connect(script));
        self
    }

    /// Queues a failed connect.
    #[must_use]
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.attempts.lock().push_back(Attempt::Refuse(message.into()));
        self
    }

    /// Delays every connect by `delay`.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Returns how many times `connect` was called.
    #[inline]
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns how many sockets were established.
    #[inline]
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.logs.lock().len()
    }

    /// Returns the write log of the `index`-th established socket.
    #[must_use]
    pub fn log(&self, index: usize) -> Option<SocketLog> {
        self.logs.lock().get(index).cloned()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Socket> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let attempt = self.attempts.lock().pop_front();
        match attempt {
            Some(Attempt::Connect(script)) => {
                let (socket, log) = script.into_socket();
                self.logs.lock().push(log);
                Ok(socket)
            }
            Some(Attempt::Refuse(message)) => Err(Error::connection(message)),
            None => Err(Error::connection("No scripted connection left")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
