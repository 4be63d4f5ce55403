//! Ordered multi-subscriber event streams.
//!
//! Every stream dispatches synchronously: [`EventStream::publish`] calls the
//! subscribers in subscription order and returns once all of them ran. A
//! veto set by a subscriber is therefore visible to the publisher as soon as
//! `publish` returns.
//!
//! A panicking subscriber is logged and skipped; the remaining subscribers
//! still run.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Subscriber callback.
pub type EventHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ============================================================================
// EventStream
// ============================================================================

/// Observer list for one kind of event.
pub struct EventStream<T> {
    /// Stream name used in logs.
    name: &'static str,
    /// Subscribers in subscription order.
    handlers: RwLock<Vec<(SubscriptionId, EventHandler<T>)>>,
}

impl<T> EventStream<T> {
    /// Creates an empty stream.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Returns the stream name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds a subscriber.
    ///
    /// Subscribers added while a publish is running see the next event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.handlers.write().push((id, Arc::new(handler)));
        trace!(stream = self.name, subscription = %id, "Subscriber added");
        id
    }

    /// Removes a subscriber.
    ///
    /// Returns `false` if the ID is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Returns the number of subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Removes all subscribers.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Delivers `event` to every subscriber, in order.
    ///
    /// Handlers run outside the lock, so a handler may subscribe or
    /// unsubscribe.
    pub fn publish(&self, event: &T) {
        let snapshot: Vec<EventHandler<T>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(
                    stream = self.name,
                    panic = panic_message(panic.as_ref()),
                    "Subscriber panicked"
                );
            }
        }
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Forwards every event into an unbounded channel.
    ///
    /// The subscription stays active while the receiver is alive; sends to
    /// a dropped receiver are ignored.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event: &T| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Extracts a printable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
