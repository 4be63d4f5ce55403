//! Reassembly of chunked reads into complete messages.
//!
//! The reassembler owns one fixed-size scratch buffer that every socket
//! read fills, and one result buffer the chunks are appended to. Neither
//! is reallocated between messages; binary payloads are then copied into
//! the next buffer of the shared [`BinaryBufferPool`].
//!
//! ```text
//! receive_chunk ──► scratch [4 KiB] ──append──► result [receive_buffer_size]
//!                                                   │
//!                       end of message ─────────────┤
//!                                                   ├─ Text  ──► decode ──► IncomingMessage::Text
//!                                                   ├─ Binary ─► pool slot ► IncomingMessage::Binary
//!                                                   └─ Close ──► Reassembled::Close
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{ChunkResult, CloseStatus, FrameKind, IncomingMessage, TextEncoding};
use crate::transport::{BinaryBufferPool, SocketReader};

// ============================================================================
// Constants
// ============================================================================

/// Size of the scratch buffer each read fills.
pub const CHUNK_SIZE: usize = 4 * 1024;

// ============================================================================
// Reassembled
// ============================================================================

/// Outcome of reading one complete frame.
#[derive(Debug, Clone)]
pub enum Reassembled {
    /// A data frame completed.
    Message(IncomingMessage),
    /// The server sent a close frame.
    Close(Option<CloseStatus>),
}

// ============================================================================
// Reassembler
// ============================================================================

/// Turns chunk reads into complete messages.
///
/// One reassembler serves one read loop; its buffers are never shared.
pub struct Reassembler {
    /// Scratch buffer handed to every read.
    chunk: Box<[u8]>,
    /// Accumulates the chunks of the current message.
    result: Vec<u8>,
    /// Ring the binary payloads are copied into.
    pool: Arc<BinaryBufferPool>,
    /// Encoding for text frames.
    encoding: TextEncoding,
}

impl Reassembler {
    /// Creates a reassembler with a [`CHUNK_SIZE`] scratch buffer.
    ///
    /// `receive_buffer_size` is the expected maximum message size; larger
    /// messages grow the result buffer.
    #[must_use]
    pub fn new(pool: Arc<BinaryBufferPool>, receive_buffer_size: usize, encoding: TextEncoding) -> Self {
        Self {
            chunk: vec![0; CHUNK_SIZE].into_boxed_slice(),
            result: Vec::with_capacity(receive_buffer_size),
            pool,
            encoding,
        }
    }

    /// Replaces the scratch buffer with one of `size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk = vec![0; size.max(1)].into_boxed_slice();
        self
    }

    /// Returns the scratch buffer size.
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    /// Reads chunks until one frame is complete.
    ///
    /// Text frames are decoded only when `text_conversion` is set; otherwise
    /// they are delivered as binary.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires, including mid-read
    /// - [`Error::Protocol`] if the socket reports more bytes than the scratch buffer holds
    /// - any error the socket read returns
    pub async fn next_frame(
        &mut self,
        reader: &mut dyn SocketReader,
        cancel: &CancellationToken,
        text_conversion: bool,
    ) -> Result<Reassembled> {
        self.result.clear();

        let last = loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = reader.receive_chunk(&mut self.chunk[..]) => chunk?,
            };

            if chunk.count > self.chunk.len() {
                return Err(Error::protocol(format!(
                    "Socket reported {} bytes for a {} byte buffer",
                    chunk.count,
                    self.chunk.len()
                )));
            }

            // Empty chunks carry nothing to append
            if chunk.count > 0 {
                self.result.extend_from_slice(&self.chunk[..chunk.count]);
            }

            if chunk.end_of_message {
                break chunk;
            }
        };

        Ok(self.complete(&last, text_conversion))
    }

    /// Builds the message for a completed frame.
    fn complete(&self, last: &ChunkResult, text_conversion: bool) -> Reassembled {
        match last.kind {
            FrameKind::Close => Reassembled::Close(last.close_status.clone()),

            FrameKind::Text if text_conversion => {
                let text = self.encoding.decode(&self.result);
                trace!(len = self.result.len(), "Text message reassembled");
                Reassembled::Message(IncomingMessage::Text(text))
            }

            FrameKind::Text | FrameKind::Binary => {
                let binary = self.pool.fill_next(&self.result);
                trace!(len = binary.len(), slot = binary.slot(), "Binary message reassembled");
                Reassembled::Message(IncomingMessage::Binary(binary))
            }
        }
    }
}

impl fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reassembler")
            .field("chunk_size", &self.chunk.len())
            .field("result_capacity", &self.result.capacity())
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::transport::{Script, Socket};

    fn reassembler(pool_size: usize) -> Reassembler {
        let pool = Arc::new(BinaryBufferPool::new(pool_size, 64));
        Reassembler::new(pool, 64, TextEncoding::Utf8)
    }

    async fn read(reassembler: &mut Reassembler, socket: &mut Socket, text: bool) -> Result<Reassembled> {
        let cancel = CancellationToken::new();
        reassembler
            .next_frame(socket.reader.as_mut(), &cancel, text)
            .await
    }

    fn expect_message(outcome: Result<Reassembled>) -> IncomingMessage {
        match outcome.expect("frame") {
            Reassembled::Message(message) => message,
            Reassembled::Close(status) => panic!("unexpected close: {status:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_chunk_text() {
        let (mut socket, _) = Script::new().text("hello").into_socket();
        let mut reassembler = reassembler(2);

        let message = expect_message(read(&mut reassembler, &mut socket, true).await);
        assert_eq!(message.as_text(), Some("hello"));
    }

    #[tokio::test]
    async fn test_empty_text_yields_empty_message() {
        let (mut socket, _) = Script::new().text("").into_socket();
        let mut reassembler = reassembler(2);

        let message = expect_message(read(&mut reassembler, &mut socket, true).await);
        assert_eq!(message.as_text(), Some(""));
    }

    #[tokio::test]
    async fn test_message_larger_than_chunk() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (mut socket, _) = Script::new()
            .fragmented(FrameKind::Binary, payload.clone(), CHUNK_SIZE)
            .into_socket();
        let mut reassembler = reassembler(1);

        let message = expect_message(read(&mut reassembler, &mut socket, true).await);
        let binary = message.as_binary().expect("binary");
        assert_eq!(binary.to_vec(), payload);
        assert!(binary.len() <= binary.capacity());
    }

    #[tokio::test]
    async fn test_text_conversion_disabled_yields_binary() {
        let (mut socket, _) = Script::new()
            .fragmented(FrameKind::Text, "h\u{e9}llo".as_bytes().to_vec(), 2)
            .into_socket();
        let mut reassembler = reassembler(2);

        let message = expect_message(read(&mut reassembler, &mut socket, false).await);
        assert!(!message.is_text());
        assert_eq!(
            message.as_binary().expect("binary").to_vec(),
            "h\u{e9}llo".as_bytes()
        );
    }

    #[tokio::test]
    async fn test_configured_encoding_is_used() {
        let (mut socket, _) = Script::new()
            .chunk(FrameKind::Text, vec![b'c', b'a', b'f', 0xE9], true)
            .into_socket();
        let pool = Arc::new(BinaryBufferPool::new(1, 8));
        let mut reassembler = Reassembler::new(pool, 8, TextEncoding::Latin1);

        let message = expect_message(read(&mut reassembler, &mut socket, true).await);
        assert_eq!(message.as_text(), Some("caf\u{e9}"));
    }

    #[tokio::test]
    async fn test_close_frame_returns_status() {
        let (mut socket, _) = Script::new()
            .close(Some(CloseStatus::new(1001, "going away")))
            .into_socket();
        let mut reassembler = reassembler(1);

        match read(&mut reassembler, &mut socket, true).await.expect("close") {
            Reassembled::Close(Some(status)) => assert_eq!(status.code, 1001),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_intermediate_chunk_is_skipped() {
        let (mut socket, _) = Script::new()
            .chunk(FrameKind::Binary, vec![1, 2], false)
            .chunk(FrameKind::Binary, Vec::new(), false)
            .chunk(FrameKind::Binary, vec![3], true)
            .into_socket();
        let mut reassembler = reassembler(1);

        let message = expect_message(read(&mut reassembler, &mut socket, true).await);
        assert_eq!(message.as_binary().expect("binary").to_vec(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_protocol_error() {
        let (mut socket, _) = Script::new()
            .chunk(FrameKind::Binary, vec![0; 8], true)
            .into_socket();
        let mut reassembler = reassembler(1).with_chunk_size(4);

        let err = read(&mut reassembler, &mut socket, true).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_read() {
        let (mut socket, _) = Script::new().into_socket();
        let mut reassembler = reassembler(1);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move { canceller.cancel() });

        let err = reassembler
            .next_frame(socket.reader.as_mut(), &cancel, true)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let (mut socket, _) = Script::new().fail("reset").into_socket();
        let mut reassembler = reassembler(1);

        let err = read(&mut reassembler, &mut socket, true).await.unwrap_err();
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn test_pool_rotation_aliases_first_message() {
        let (mut socket, _) = Script::new()
            .binary(vec![1, 1])
            .binary(vec![2, 2])
            .binary(vec![3, 3, 3])
            .into_socket();
        let mut reassembler = reassembler(2);

        let first = expect_message(read(&mut reassembler, &mut socket, true).await);
        let second = expect_message(read(&mut reassembler, &mut socket, true).await);
        let third = expect_message(read(&mut reassembler, &mut socket, true).await);

        let first = first.as_binary().expect("binary");
        let second = second.as_binary().expect("binary");
        let third = third.as_binary().expect("binary");

        assert!(!first.shares_buffer_with(second));
        assert!(first.shares_buffer_with(third));
        assert_eq!(first.to_vec(), vec![3, 3, 3]);
        assert_eq!(second.to_vec(), vec![2, 2]);
    }

    proptest! {
        #[test]
        fn prop_any_chunking_reassembles_exact_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..20_000),
            sizes in proptest::collection::vec(1usize..=CHUNK_SIZE, 1..64),
        ) {
            let mut script = Script::new();
            let mut offset = 0;
            let mut size_index = 0;
            loop {
                let size = sizes[size_index % sizes.len()];
                size_index += 1;
                let end = (offset + size).min(payload.len());
                let last = end == payload.len();
                script = script.chunk(FrameKind::Binary, payload[offset..end].to_vec(), last);
                offset = end;
                if last {
                    break;
                }
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let (mut socket, _) = script.into_socket();
            let mut reassembler = reassembler(1);

            let message = expect_message(runtime.block_on(read(&mut reassembler, &mut socket, true)));
            let binary = message.as_binary().expect("binary");
            prop_assert_eq!(binary.to_vec(), payload);
        }
    }
}
