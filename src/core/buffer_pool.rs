//! # Buffer Pool Module
//!
//! A fixed set of [`MediaBuffer`]s owned by the encoder output port. The pool
//! never allocates after construction and never grows: every buffer is, at any
//! moment, in exactly one place.
//!
//! ```text
//!   ┌──────────────┐  drain_idle   ┌──────────────┐  fill + flags  ┌──────────────┐
//!   │  Pool (idle) │──────────────▶│ Port (queued)│───────────────▶│   Callback   │
//!   └──────────────┘               └──────────────┘                └──────┬───────┘
//!          ▲                                                              │
//!          └──────────────────────────── release ◀────────────────────────┘
//! ```
//!
//! Ownership makes most of the bookkeeping structural: a buffer is a value that
//! moves between the pool, the port queue and the callback. The pool only has
//! to refuse buffers from other pools and buffers it would overflow with.
//!
//! ## Example
//!
//! ```rust
//! use still_capture::core::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(3, 16 * 1024);
//! let idle = pool.drain_idle();
//! assert_eq!(idle.len(), 3);
//! assert_eq!(pool.idle_len(), 0);
//!
//! for buffer in idle {
//!     pool.release(buffer);
//! }
//! assert_eq!(pool.idle_len(), 3);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::error;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-buffer flags set by the producer.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    /// Last buffer of an encoded frame
    pub const FRAME_END: BufferFlags = BufferFlags(1 << 2);
    /// The producer gave up on the frame
    pub const TRANSMISSION_FAILED: BufferFlags = BufferFlags(1 << 9);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: BufferFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the frame is finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        self.intersects(Self::FRAME_END | Self::TRANSMISSION_FAILED)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::FRAME_END) {
            names.push("FRAME_END");
        }
        if self.contains(Self::TRANSMISSION_FAILED) {
            names.push("TRANSMISSION_FAILED");
        }
        write!(f, "BufferFlags({})", if names.is_empty() { "NONE".to_string() } else { names.join(" | ") })
    }
}

/// A pooled payload block.
///
/// The valid region is `len()` bytes; capacity is fixed at pool creation.
/// Payload reads go through [`MediaBuffer::lock`] so the memory is only touched
/// inside the lock bracket.
pub struct MediaBuffer {
    data: Box<[u8]>,
    length: usize,
    flags: BufferFlags,
    pool_id: u64,
    index: usize,
    locked: bool,
}

impl MediaBuffer {
    fn new(pool_id: u64, index: usize, capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            length: 0,
            flags: BufferFlags::NONE,
            pool_id,
            index,
            locked: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags = flags;
    }

    /// Position of this buffer inside its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Copies as much of `bytes` as fits and returns the count written.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.capacity());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.length = n;
        n
    }

    /// Locks the payload for reading; unlocked when the guard drops.
    pub fn lock(&mut self) -> BufferMemory<'_> {
        self.locked = true;
        BufferMemory { buffer: self }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn reset(&mut self) {
        self.length = 0;
        self.flags = BufferFlags::NONE;
    }
}

impl fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("pool", &self.pool_id)
            .field("index", &self.index)
            .field("len", &self.length)
            .field("capacity", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Read access to a buffer payload, valid until dropped.
pub struct BufferMemory<'a> {
    buffer: &'a mut MediaBuffer,
}

impl Deref for BufferMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer.data[..self.buffer.length]
    }
}

impl Drop for BufferMemory<'_> {
    fn drop(&mut self) {
        self.buffer.locked = false;
    }
}

/// Fixed-size FIFO of idle buffers.
#[derive(Debug)]
pub struct BufferPool {
    id: u64,
    idle: Mutex<VecDeque<MediaBuffer>>,
    buffer_num: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocates `buffer_num` buffers of `buffer_size` bytes each.
    pub fn new(buffer_num: usize, buffer_size: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let idle = (0..buffer_num)
            .map(|index| MediaBuffer::new(id, index, buffer_size))
            .collect();
        Self {
            id,
            idle: Mutex::new(idle),
            buffer_num,
            buffer_size,
        }
    }

    /// Takes the oldest idle buffer.
    pub fn get(&self) -> Option<MediaBuffer> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    /// Takes every idle buffer in FIFO order.
    pub fn drain_idle(&self) -> Vec<MediaBuffer> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Returns a buffer to the idle queue, clearing its length and flags.
    ///
    /// Buffers from another pool are dropped with an error log.
    pub fn release(&self, mut buffer: MediaBuffer) {
        if buffer.pool_id != self.id {
            error!(pool = self.id, ?buffer, "Buffer released to the wrong pool");
            return;
        }
        debug_assert!(!buffer.locked, "buffer released while locked");
        buffer.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.buffer_num {
            error!(pool = self.id, ?buffer, "Pool already holds every buffer, dropping duplicate");
            return;
        }
        idle.push_back(buffer);
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Buffers currently outside the pool.
    pub fn outstanding(&self) -> usize {
        self.buffer_num - self.idle_len()
    }

    pub fn buffer_num(&self) -> usize {
        self.buffer_num
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns `(idle, total)`.
    pub fn stats(&self) -> (usize, usize) {
        (self.idle_len(), self.buffer_num)
    }
}
