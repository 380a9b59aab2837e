//! Read and write helpers over a [`SessionBuffer`].
//!
//! These implement the usual simple read/write semantics for a
//! message-buffer device: reads continue from the file offset until the
//! content is exhausted, and a write replaces the whole content.

use lkm_core::buffer::SessionBuffer;

use crate::error::DriverError;
use crate::uaccess::{UserSliceReader, UserSliceWriter};

const CHUNK: usize = 64;

/// Copies content from `*offset` into `out`.
///
/// At or past the end of the content, resets `*offset` to 0 and returns 0
/// (end of stream). Otherwise copies `min(out.len(), len - offset)` bytes
/// and advances `*offset` by that amount.
///
/// # Errors
///
/// [`DriverError::CopyFault`] if `out` rejects the copy. `*offset` is left
/// unchanged.
pub fn read_buffer<const N: usize>(
    buf: &SessionBuffer<N>,
    out: &mut dyn UserSliceWriter,
    offset: &mut u64,
) -> Result<usize, DriverError> {
    let start = usize::try_from(*offset).unwrap_or(usize::MAX);
    let len = buf.len();
    if start >= len {
        *offset = 0;
        return Ok(0);
    }

    let total = out.len().min(len - start);
    let mut chunk = [0u8; CHUNK];
    let mut copied = 0;
    while copied < total {
        let want = (total - copied).min(CHUNK);
        let got = buf.copy_out(start + copied, &mut chunk[..want]);
        if got == 0 {
            // Content shrank under us.
            break;
        }
        out.write_slice(&chunk[..got])?;
        copied += got;
    }
    *offset += copied as u64;
    Ok(copied)
}

/// Replaces the content with `input`, truncated to `N` bytes.
///
/// Returns the number of bytes stored and advances `*offset` by it.
///
/// # Errors
///
/// [`DriverError::CopyFault`] if `input` rejects the copy; the content is
/// left unchanged.
pub fn write_buffer<const N: usize>(
    buf: &SessionBuffer<N>,
    input: &mut dyn UserSliceReader,
    offset: &mut u64,
) -> Result<usize, DriverError> {
    let stored = input.len().min(N);
    let mut staging = [0u8; N];
    input.read_slice(&mut staging[..stored])?;
    let stored = buf.store(&staging[..stored]);
    *offset += stored as u64;
    Ok(stored)
}
