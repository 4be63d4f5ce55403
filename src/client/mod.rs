//! Resilient client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WebsocketClient`] | Session owner, read loop and reconnect flows |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Serializable client options |
//!
//! # Example
//!
//! ```no_run
//! use resilient_websocket::{ClientOptions, WebsocketClient};
//!
//! # async fn example() -> resilient_websocket::Result<()> {
//! let client = WebsocketClient::builder()
//!     .url("ws://127.0.0.1:9001")
//!     .options(ClientOptions::new().with_reconnection(true))
//!     .build()?;
//!
//! let (_id, mut messages) = client.messages().channel();
//! client.start().await?;
//!
//! while let Some(message) = messages.recv().await {
//!     println!("{message}");
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Client handle and lifecycle control.
pub mod core;

/// Client options.
pub mod options;

/// Connect, reconnect and retry flows.
mod reconnect;

/// Read loop and inactivity watchdog.
mod receive;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::WebsocketClient;
pub use options::ClientOptions;
