//! Client configuration options.
//!
//! Options serialize to JSON with every field optional, so a partial
//! document only overrides what it names.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use resilient_websocket::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_name("prices")
//!     .with_receive_buffer_size(256 * 1024)
//!     .with_no_message_timeout(Duration::from_secs(30));
//!
//! assert!(options.validate().is_ok());
//!
//! let parsed: ClientOptions =
//!     serde_json::from_str(r#"{ "reconnection_enabled": false }"#).unwrap();
//! assert!(!parsed.reconnection_enabled);
//! assert!(parsed.text_conversion_enabled);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::TextEncoding;

// ============================================================================
// Constants
// ============================================================================

/// Default expected maximum message size (64 KiB).
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of pooled binary buffers.
pub const DEFAULT_BINARY_POOL_SIZE: usize = 4;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// ClientOptions
// ============================================================================

/// Behaviour of a [`WebsocketClient`](crate::WebsocketClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Client name used in logs.
    pub name: Option<String>,

    /// Decode text frames into strings; otherwise deliver them as binary.
    pub text_conversion_enabled: bool,

    /// Reconnect after the session is lost.
    pub reconnection_enabled: bool,

    /// Expected maximum message size in bytes.
    pub receive_buffer_size: usize,

    /// Number of reusable binary message buffers.
    pub binary_pool_size: usize,

    /// Encoding for text frames.
    pub encoding: TextEncoding,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Reconnect when no message arrived for this many milliseconds.
    pub no_message_timeout_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: None,
            text_conversion_enabled: true,
            reconnection_enabled: true,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            binary_pool_size: DEFAULT_BINARY_POOL_SIZE,
            encoding: TextEncoding::Utf8,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            no_message_timeout_ms: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the client name.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enables or disables text decoding.
    #[inline]
    #[must_use]
    pub const fn with_text_conversion(mut self, enabled: bool) -> Self {
        self.text_conversion_enabled = enabled;
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub const fn with_reconnection(mut self, enabled: bool) -> Self {
        self.reconnection_enabled = enabled;
        self
    }

    /// Sets the expected maximum message size.
    #[inline]
    #[must_use]
    pub const fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Sets the number of pooled binary buffers.
    #[inline]
    #[must_use]
    pub const fn with_binary_pool_size(mut self, size: usize) -> Self {
        self.binary_pool_size = size;
        self
    }

    /// Sets the text encoding.
    #[inline]
    #[must_use]
    pub const fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Enables the inactivity watchdog.
    #[inline]
    #[must_use]
    pub fn with_no_message_timeout(mut self, timeout: Duration) -> Self {
        self.no_message_timeout_ms = Some(duration_to_ms(timeout));
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ClientOptions {
    /// Returns the connect timeout.
    #[inline]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the inactivity timeout, if enabled.
    #[inline]
    #[must_use]
    pub fn no_message_timeout(&self) -> Option<Duration> {
        self.no_message_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns an error message if a size or timeout is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.receive_buffer_size == 0 {
            return Err("receive_buffer_size must be greater than zero".to_string());
        }
        if self.binary_pool_size == 0 {
            return Err("binary_pool_size must be greater than zero".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout must be greater than zero".to_string());
        }
        if self.no_message_timeout_ms == Some(0) {
            return Err("no_message_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Converts a duration to whole milliseconds, saturating.
#[inline]
fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
