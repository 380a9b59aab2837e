//! User-copy abstractions (`copy_to_user` / `copy_from_user`).
//!
//! File operations never see the caller's memory directly. They write into
//! a [`UserSliceWriter`] and read from a [`UserSliceReader`], either of
//! which may refuse the copy with [`DriverError::CopyFault`].

use crate::error::DriverError;

/// Destination of a read: the caller's buffer.
pub trait UserSliceWriter {
    /// Remaining capacity in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if no more bytes fit.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data` to the caller's buffer.
    ///
    /// # Errors
    ///
    /// [`DriverError::CopyFault`] if the buffer rejects the copy or `data`
    /// is longer than the remaining capacity.
    fn write_slice(&mut self, data: &[u8]) -> Result<(), DriverError>;
}

/// Source of a write: the caller's data.
pub trait UserSliceReader {
    /// Bytes left to read.
    fn len(&self) -> usize;

    /// Returns `true` if everything has been read.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `out` from the caller's data.
    ///
    /// # Errors
    ///
    /// [`DriverError::CopyFault`] if the data rejects the copy or fewer than
    /// `out.len()` bytes remain.
    fn read_slice(&mut self, out: &mut [u8]) -> Result<(), DriverError>;
}

/// A [`UserSliceWriter`] over an in-memory buffer.
#[derive(Debug)]
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    /// Wraps `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

impl UserSliceWriter for SliceWriter<'_> {
    fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let end = self
            .pos
            .checked_add(data.len())
            .filter(|&end| end <= self.buf.len())
            .ok_or(DriverError::CopyFault)?;
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
}

/// A [`UserSliceReader`] over an in-memory buffer.
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// Wraps `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl UserSliceReader for SliceReader<'_> {
    fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_slice(&mut self, out: &mut [u8]) -> Result<(), DriverError> {
        let end = self
            .pos
            .checked_add(out.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(DriverError::CopyFault)?;
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}
