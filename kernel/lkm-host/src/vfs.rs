//! Open device files.

use std::fmt;
use std::sync::Arc;

use lkm_driver_api::{DriverError, DynFileOperations, DynSession, SliceReader, SliceWriter};

use crate::host::SimHost;
use crate::uaccess::{FaultingReader, FaultingWriter};

/// A file opened through [`SimHost::open`], with its own offset.
///
/// Dropping it closes it.
pub struct OpenFile {
    host: Arc<SimHost>,
    path: String,
    fops: Arc<dyn DynFileOperations>,
    session: Option<DynSession>,
    offset: u64,
    fault_copies: bool,
}

impl OpenFile {
    pub(crate) fn new(
        host: Arc<SimHost>,
        path: &str,
        fops: Arc<dyn DynFileOperations>,
        session: DynSession,
        fault_copies: bool,
    ) -> Self {
        Self {
            host,
            path: path.to_owned(),
            fops,
            session: Some(session),
            offset: 0,
            fault_copies,
        }
    }

    /// Returns the path the file was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the current file offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn session(&mut self) -> Result<&mut DynSession, DriverError> {
        self.session.as_mut().ok_or(DriverError::InvalidState)
    }

    /// Reads up to `len` bytes. An empty result means end of data.
    ///
    /// # Errors
    ///
    /// Whatever the device's `read` reports.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, DriverError> {
        let _ring = self.host.enter();
        let fops = Arc::clone(&self.fops);
        let mut offset = self.offset;
        let mut buf = vec![0u8; len];
        let n = if self.fault_copies {
            fops.dyn_read(self.session()?, &mut FaultingWriter::new(len), &mut offset)?
        } else {
            fops.dyn_read(self.session()?, &mut SliceWriter::new(&mut buf), &mut offset)?
        };
        self.offset = offset;
        buf.truncate(n);
        Ok(buf)
    }

    /// Reads until the device reports end of data, `max_reads` reads at most.
    ///
    /// # Errors
    ///
    /// The first error the device reports.
    pub fn read_to_end(&mut self, chunk: usize, max_reads: usize) -> Result<Vec<u8>, DriverError> {
        let mut all = Vec::new();
        for _ in 0..max_reads {
            let part = self.read(chunk)?;
            if part.is_empty() {
                break;
            }
            all.extend_from_slice(&part);
        }
        Ok(all)
    }

    /// Writes `data`, returning the number of bytes the device accepted.
    ///
    /// # Errors
    ///
    /// Whatever the device's `write` reports.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let _ring = self.host.enter();
        let fops = Arc::clone(&self.fops);
        let mut offset = self.offset;
        let n = if self.fault_copies {
            fops.dyn_write(self.session()?, &mut FaultingReader::new(data.len()), &mut offset)?
        } else {
            fops.dyn_write(self.session()?, &mut SliceReader::new(data), &mut offset)?
        };
        self.offset = offset;
        Ok(n)
    }

    /// Closes the file.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            let _ring = self.host.enter();
            self.fops.dyn_release(session);
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("open", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
