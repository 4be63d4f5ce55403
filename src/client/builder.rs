//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`WebsocketClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use resilient_websocket::{ClientOptions, ExponentialBackoff, WebsocketClient};
//!
//! # fn example() -> resilient_websocket::Result<()> {
//! let client = WebsocketClient::builder()
//!     .url("wss://example.com/feed")
//!     .options(ClientOptions::new().with_name("feed"))
//!     .retry_policy(ExponentialBackoff::new().with_max_delay(Duration::from_secs(10)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::session::{ExponentialBackoff, RetryPolicy};
use crate::transport::{Connector, TungsteniteConnector};

use super::core::WebsocketClient;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`WebsocketClient`].
///
/// Use [`WebsocketClient::builder()`] to create a new builder.
#[derive(Default)]
pub struct ClientBuilder {
    /// Custom connector.
    connector: Option<Arc<dyn Connector>>,
    /// Endpoint for the default connector.
    url: Option<String>,
    /// Client options.
    options: ClientOptions,
    /// Retry policy; exponential backoff if unset.
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL for the built-in tungstenite connector.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Uses a custom connector instead of a URL.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Uses a shared custom connector.
    #[inline]
    #[must_use]
    pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the client options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if neither URL nor connector is set, or both are
    /// - [`Error::Config`] if the URL is invalid or the options are out of range
    pub fn build(self) -> Result<WebsocketClient> {
        self.options.validate().map_err(Error::config)?;
        let retry_policy = self.validate_retry_policy()?;
        let connector = self.validate_connector()?;

        Ok(WebsocketClient::from_parts(connector, self.options, retry_policy))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Resolves the connector from the URL or the custom connector.
    fn validate_connector(&self) -> Result<Arc<dyn Connector>> {
        match (&self.connector, &self.url) {
            (Some(_), Some(_)) => Err(Error::config(
                "Set either .url() or .connector(), not both",
            )),
            (Some(connector), None) => Ok(Arc::clone(connector)),
            (None, Some(url)) => Ok(Arc::new(TungsteniteConnector::new(url)?)),
            (None, None) => Err(Error::config(
                "Endpoint is required. Use .url() or .connector() to set it.\n\
                 Example: WebsocketClient::builder().url(\"wss://example.com/feed\")",
            )),
        }
    }

    /// Resolves and validates the retry policy, defaulting to backoff.
    fn validate_retry_policy(&self) -> Result<Arc<dyn RetryPolicy>> {
        let policy = match &self.retry_policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(ExponentialBackoff::new()),
        };
        policy
            .validate()
            .map_err(|e| Error::config(format!("Invalid retry policy: {e}")))?;
        Ok(policy)
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("custom_connector", &self.connector.is_some())
            .field("options", &self.options)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
