//! Fixed-capacity message buffer shared by every session of a device.
//!
//! [`SessionBuffer`] has no lock of its own. Each byte is an `AtomicU8` and
//! the content length an `AtomicUsize`, so two concurrent writers can
//! interleave at byte granularity (the result is garbled demo data, never
//! undefined behaviour). The single-opener gate of a device is what keeps
//! the content coherent in practice.

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// A bounded byte buffer with interior mutability.
///
/// The stored length never exceeds `N`; writes beyond it are dropped.
pub struct SessionBuffer<const N: usize> {
    bytes: [AtomicU8; N],
    len: AtomicUsize,
}

impl<const N: usize> Default for SessionBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SessionBuffer<N> {
    /// Maximum number of bytes the buffer holds.
    pub const CAPACITY: usize = N;

    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self {
            bytes: [const { AtomicU8::new(0) }; N],
            len: AtomicUsize::new(0),
        }
    }

    /// Returns the capacity `N`.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the length of the current content.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(N)
    }

    /// Returns `true` if the buffer holds no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the content with `data`, truncated to `N` bytes.
    ///
    /// Returns the number of bytes actually stored.
    pub fn store(&self, data: &[u8]) -> usize {
        let stored = data.len().min(N);
        for (slot, &byte) in self.bytes.iter().zip(&data[..stored]) {
            slot.store(byte, Ordering::Relaxed);
        }
        self.len.store(stored, Ordering::Release);
        stored
    }

    /// Replaces the content with formatted text, truncated to `N` bytes.
    ///
    /// Returns the number of bytes actually stored.
    pub fn store_fmt(&self, args: fmt::Arguments<'_>) -> usize {
        let mut cursor = Cursor { buf: self, pos: 0 };
        // `Cursor` never reports an error; truncation is silent.
        let _ = fmt::Write::write_fmt(&mut cursor, args);
        let stored = cursor.pos;
        self.len.store(stored, Ordering::Release);
        stored
    }

    /// Copies content starting at `offset` into `out`.
    ///
    /// Returns the number of bytes copied: `min(out.len(), len - offset)`,
    /// or 0 if `offset` is at or past the end of the content.
    pub fn copy_out(&self, offset: usize, out: &mut [u8]) -> usize {
        let len = self.len();
        if offset >= len {
            return 0;
        }
        let count = out.len().min(len - offset);
        for (dst, slot) in out[..count].iter_mut().zip(&self.bytes[offset..offset + count]) {
            *dst = slot.load(Ordering::Relaxed);
        }
        count
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.len.store(0, Ordering::Release);
    }
}

impl<const N: usize> fmt::Debug for SessionBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuffer")
            .field("len", &self.len())
            .field("capacity", &N)
            .finish()
    }
}

/// `fmt::Write` adapter that writes straight into the buffer slots.
struct Cursor<'a, const N: usize> {
    buf: &'a SessionBuffer<N>,
    pos: usize,
}

impl<const N: usize> fmt::Write for Cursor<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if self.pos == N {
                break;
            }
            self.buf.bytes[self.pos].store(byte, Ordering::Relaxed);
            self.pos += 1;
        }
        Ok(())
    }
}
