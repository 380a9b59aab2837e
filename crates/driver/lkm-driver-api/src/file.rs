//! Device file operations.

use crate::error::DriverError;
use crate::uaccess::{UserSliceReader, UserSliceWriter};

/// The `file_operations` of a device or procfs entry.
///
/// `open` creates a per-open [`Session`](FileOperations::Session), which the
/// host hands back to `read`, `write` and finally `release`. Shared device
/// state lives in `self`.
pub trait FileOperations: Send + Sync + 'static {
    /// Per-open state.
    type Session: Send + 'static;

    /// Opens the device.
    ///
    /// # Errors
    ///
    /// [`DriverError::Busy`] if the device admits a single opener and is
    /// already held, or any other error the device reports.
    fn open(&self) -> Result<Self::Session, DriverError>;

    /// Closes a session. The default simply drops it.
    fn release(&self, session: Self::Session) {
        drop(session);
    }

    /// Reads from the device into `out`, starting at `*offset`.
    ///
    /// Returns the number of bytes copied; 0 means end of data.
    ///
    /// # Errors
    ///
    /// [`DriverError::Unsupported`] by default, [`DriverError::CopyFault`]
    /// if `out` rejects the copy.
    fn read(
        &self,
        session: &mut Self::Session,
        out: &mut dyn UserSliceWriter,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        let _ = (session, out, offset);
        Err(DriverError::Unsupported)
    }

    /// Writes `input` to the device at `*offset`.
    ///
    /// Returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// [`DriverError::Unsupported`] by default, [`DriverError::CopyFault`]
    /// if `input` rejects the copy.
    fn write(
        &self,
        session: &mut Self::Session,
        input: &mut dyn UserSliceReader,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        let _ = (session, input, offset);
        Err(DriverError::Unsupported)
    }
}
