//! Ring of reusable binary message buffers.
//!
//! Bounds allocation for binary traffic: every binary message is copied
//! into the next buffer of a fixed-size ring instead of a fresh `Vec`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            BinaryBufferPool              │
//! │   cursor ─┐                              │
//! │           ▼                              │
//! │  ┌────────┐ ┌────────┐ ┌────────┐        │
//! │  │ slot 0 │ │ slot 1 │ │ slot 2 │ ...    │
//! │  └────────┘ └────────┘ └────────┘        │
//! │  message k, k+N, k+2N share one slot     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! There is no reuse lock. A consumer that keeps a [`BinaryMessage`] past
//! N newer binary messages observes the newer payload. The per-buffer
//! `RwLock` only keeps a single copy-in and read atomic with respect to
//! each other; it does not protect a view from being recycled.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::protocol::BinaryMessage;

// ============================================================================
// BinaryMessageBuffer
// ============================================================================

/// Bytes and logical length of one buffer.
struct BufferInner {
    /// Preallocated storage; its length is the capacity.
    bytes: Vec<u8>,
    /// Logical payload length, never greater than `bytes.len()`.
    len: usize,
}

/// A preallocated byte array with a logical length.
///
/// Only the pool writes to it; the length changes without reallocating
/// unless a payload exceeds the capacity.
pub struct BinaryMessageBuffer {
    /// Position in the ring.
    slot: usize,
    /// Storage and length.
    inner: RwLock<BufferInner>,
}

impl BinaryMessageBuffer {
    /// Creates a zeroed buffer.
    fn new(slot: usize, capacity: usize) -> Self {
        Self {
            slot,
            inner: RwLock::new(BufferInner {
                bytes: vec![0; capacity],
                len: 0,
            }),
        }
    }

    /// Returns the position in the ring.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the logical payload length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// Returns `true` if the logical payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the size of the backing array.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.read().bytes.len()
    }

    /// Runs `f` with the logical payload.
    ///
    /// Holds the read lock for the duration of `f`. Refilling this slot
    /// blocks until `f` returns.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.bytes[..inner.len])
    }

    /// Copies `source` in and sets the logical length.
    ///
    /// Grows the backing array only when `source` exceeds the capacity.
    pub(crate) fn copy_from(&self, source: &[u8]) {
        let mut inner = self.inner.write();
        if source.len() > inner.bytes.len() {
            debug!(
                slot = self.slot,
                capacity = inner.bytes.len(),
                required = source.len(),
                "Growing pooled binary buffer"
            );
            inner.bytes.resize(source.len(), 0);
        }
        inner.bytes[..source.len()].copy_from_slice(source);
        inner.len = source.len();
    }
}

impl fmt::Debug for BinaryMessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("BinaryMessageBuffer")
            .field("slot", &self.slot)
            .field("len", &inner.len)
            .field("capacity", &inner.bytes.len())
            .finish()
    }
}

// ============================================================================
// BinaryBufferPool
// ============================================================================

/// Fixed-size ring of [`BinaryMessageBuffer`]s handed out round-robin.
///
/// # Example
///
/// ```
/// use resilient_websocket::transport::BinaryBufferPool;
///
/// let pool = BinaryBufferPool::new(2, 1024);
/// let first = pool.fill_next(&[1, 2, 3]);
/// let _second = pool.fill_next(&[4]);
/// let third = pool.fill_next(&[5, 6]);
///
/// // The third message recycled the first message's buffer.
/// assert!(third.shares_buffer_with(&first));
/// assert_eq!(first.to_vec(), vec![5, 6]);
/// ```
pub struct BinaryBufferPool {
    /// Buffers in ring order.
    buffers: Vec<Arc<BinaryMessageBuffer>>,
    /// Index of the next buffer to lend.
    cursor: AtomicUsize,
}

impl BinaryBufferPool {
    /// Creates a pool of `size` buffers, each preallocated to `capacity`.
    ///
    /// A `size` of zero is raised to one.
    #[must_use]
    pub fn new(size: usize, capacity: usize) -> Self {
        let size = size.max(1);
        let buffers = (0..size)
            .map(|slot| Arc::new(BinaryMessageBuffer::new(slot, capacity)))
            .collect();

        debug!(size, capacity, "Binary buffer pool allocated");

        Self {
            buffers,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the number of buffers in the ring.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns `true` if the ring has no buffers. Never true in practice.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Returns the slot the next message will be written to.
    #[inline]
    #[must_use]
    pub fn next_slot(&self) -> usize {
        self.cursor.load(Ordering::Acquire) % self.buffers.len()
    }

    /// Copies `payload` into the next buffer and returns a view of it.
    pub fn fill_next(&self, payload: &[u8]) -> BinaryMessage {
        let slot = self.cursor.fetch_add(1, Ordering::AcqRel) % self.buffers.len();
        let buffer = Arc::clone(&self.buffers[slot]);
        buffer.copy_from(payload);
        BinaryMessage::new(buffer)
    }
}

impl fmt::Debug for BinaryBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryBufferPool")
            .field("size", &self.buffers.len())
            .field("next_slot", &self.next_slot())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
