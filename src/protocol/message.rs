//! Application-level message types.
//!
//! [`IncomingMessage`] is what subscribers of the message stream receive;
//! [`OutgoingMessage`] is what the send path accepts.
//!
//! # Binary Buffer Reuse
//!
//! Binary payloads are not copied into a fresh allocation per message. Each
//! [`BinaryMessage`] is a view into one buffer of a fixed-size ring owned by
//! the client. With a ring of N buffers, the view of message *k* is
//! overwritten when message *k+N* arrives. Subscribers must finish with a
//! binary message (or copy it with [`BinaryMessage::to_vec`]) before N newer
//! binary messages are received. Holding a view longer is a contract
//! violation: the view silently reflects the newer payload.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::BinaryMessageBuffer;

// ============================================================================
// TextEncoding
// ============================================================================

/// Character encoding used to decode text frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// UTF-8; invalid sequences are replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per character.
    Latin1,
}

impl TextEncoding {
    /// Decodes bytes into a string.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    /// Encodes a string into bytes.
    ///
    /// Latin-1 maps characters outside the range to `?`.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

// ============================================================================
// BinaryMessage
// ============================================================================

/// A view into a pooled binary buffer.
///
/// Cloning the view does not copy the payload; all clones observe the same
/// backing buffer. See the module docs for the reuse contract.
#[derive(Clone)]
pub struct BinaryMessage {
    /// Shared backing buffer.
    buffer: Arc<BinaryMessageBuffer>,
}

impl BinaryMessage {
    /// Wraps a filled pool buffer.
    #[inline]
    pub(crate) fn new(buffer: Arc<BinaryMessageBuffer>) -> Self {
        Self { buffer }
    }

    /// Returns the logical payload length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the backing buffer.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Returns the pool slot index of the backing buffer.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> usize {
        self.buffer.slot()
    }

    /// Copies the current payload out of the pooled buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.with_bytes(<[u8]>::to_vec)
    }

    /// Runs `f` with a borrow of the current payload.
    ///
    /// The backing buffer stays read-locked while `f` runs. When the pool
    /// wraps around to this buffer, the read loop waits for `f` before it
    /// can store the next binary message, so keep `f` short or use
    /// [`to_vec`](Self::to_vec). The same reuse contract applies: a view
    /// older than the pool size shows newer data.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.buffer.with_bytes(f)
    }

    /// Returns `true` if both views share one backing buffer.
    #[inline]
    #[must_use]
    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

impl fmt::Debug for BinaryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryMessage")
            .field("slot", &self.slot())
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// IncomingMessage
// ============================================================================

/// A complete message received from the server.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Decoded text message. Empty frames yield an empty string.
    Text(String),
    /// Binary message, or a raw text frame when text conversion is disabled.
    Binary(BinaryMessage),
}

impl IncomingMessage {
    /// Returns `true` for text messages.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Returns `true` for binary messages.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Returns the text content, if any.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the binary view, if any.
    #[inline]
    #[must_use]
    pub fn as_binary(&self) -> Option<&BinaryMessage> {
        match self {
            Self::Binary(binary) => Some(binary),
            Self::Text(_) => None,
        }
    }

    /// Parses a text message as JSON.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the message is binary
    /// - [`Error::Json`] if parsing fails
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Text(text) => Ok(serde_json::from_str(text)?),
            Self::Binary(_) => Err(Error::protocol("Expected a text message, got binary")),
        }
    }
}

impl fmt::Display for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Binary(binary) => write!(f, "Type binary, length: {}", binary.len()),
        }
    }
}

// ============================================================================
// OutgoingMessage
// ============================================================================

/// A message handed to the send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl OutgoingMessage {
    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for OutgoingMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    use crate::transport::BinaryBufferPool;

    #[test]
    fn test_utf8_decode_is_lossy() {
        assert_eq!(TextEncoding::Utf8.decode(b"hello"), "hello");
        assert_eq!(TextEncoding::Utf8.decode(&[0x68, 0xFF]), "h\u{FFFD}");
    }

    #[test]
    fn test_latin1_round_trip() {
        let bytes = TextEncoding::Latin1.encode("caf\u{e9}");
        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(TextEncoding::Latin1.decode(&bytes), "caf\u{e9}");
        assert_eq!(TextEncoding::Latin1.encode("\u{2603}"), vec![b'?']);
    }

    #[test]
    fn test_text_message_accessors() {
        let message = IncomingMessage::Text("hello".into());
        assert!(message.is_text());
        assert_eq!(message.as_text(), Some("hello"));
        assert!(message.as_binary().is_none());
        assert_eq!(message.to_string(), "hello");
    }

    #[test]
    fn test_binary_message_display() {
        let pool = BinaryBufferPool::new(1, 16);
        let message = IncomingMessage::Binary(pool.fill_next(&[1, 2, 3]));
        assert!(message.is_binary());
        assert_eq!(message.to_string(), "Type binary, length: 3");
    }

    #[test]
    fn test_json_parsing() {
        let message = IncomingMessage::Text(r#"{"op":"ping"}"#.into());
        let value: Value = message.json().expect("valid json");
        assert_eq!(value["op"], "ping");

        let pool = BinaryBufferPool::new(1, 4);
        let binary = IncomingMessage::Binary(pool.fill_next(b"{}"));
        assert!(binary.json::<Value>().is_err());
    }

    #[test]
    fn test_outgoing_conversions() {
        assert_eq!(OutgoingMessage::from("hi"), OutgoingMessage::Text("hi".into()));
        assert_eq!(OutgoingMessage::from(vec![1u8]).len(), 1);
        assert!(OutgoingMessage::Text(String::new()).is_empty());
    }
}
