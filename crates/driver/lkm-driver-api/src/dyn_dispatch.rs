//! Dyn-compatible wrapper for [`FileOperations`].
//!
//! [`FileOperations`] has an associated `Session` type, which makes it
//! non-dyn-compatible. [`DynFileOperations`] erases the session into a
//! [`DynSession`] so hosts can keep heterogeneous devices in one table.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;

use crate::error::DriverError;
use crate::file::FileOperations;
use crate::uaccess::{UserSliceReader, UserSliceWriter};

/// A type-erased session.
pub type DynSession = Box<dyn Any + Send>;

/// Dyn-compatible version of [`FileOperations`].
///
/// Use [`FileOpsWrapper`] (or [`into_dyn`]) to convert any concrete
/// [`FileOperations`] into an `Arc<dyn DynFileOperations>`.
pub trait DynFileOperations: Send + Sync {
    /// Opens the device (dyn-dispatch version).
    ///
    /// # Errors
    ///
    /// Whatever the wrapped `open` reports.
    fn dyn_open(&self) -> Result<DynSession, DriverError>;

    /// Closes a session (dyn-dispatch version).
    fn dyn_release(&self, session: DynSession);

    /// Reads from the device (dyn-dispatch version).
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidState`] if `session` was not opened by this
    /// device, otherwise whatever the wrapped `read` reports.
    fn dyn_read(
        &self,
        session: &mut DynSession,
        out: &mut dyn UserSliceWriter,
        offset: &mut u64,
    ) -> Result<usize, DriverError>;

    /// Writes to the device (dyn-dispatch version).
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidState`] if `session` was not opened by this
    /// device, otherwise whatever the wrapped `write` reports.
    fn dyn_write(
        &self,
        session: &mut DynSession,
        input: &mut dyn UserSliceReader,
        offset: &mut u64,
    ) -> Result<usize, DriverError>;
}

/// Wrapper that adapts any [`FileOperations`] into a [`DynFileOperations`].
pub struct FileOpsWrapper<F>(pub F);

impl<F: FileOperations> FileOpsWrapper<F> {
    fn session<'s>(session: &'s mut DynSession) -> Result<&'s mut F::Session, DriverError> {
        session
            .downcast_mut::<F::Session>()
            .ok_or(DriverError::InvalidState)
    }
}

impl<F: FileOperations> DynFileOperations for FileOpsWrapper<F> {
    fn dyn_open(&self) -> Result<DynSession, DriverError> {
        let session = self.0.open()?;
        Ok(Box::new(session))
    }

    fn dyn_release(&self, session: DynSession) {
        // Sessions opened by another device are just dropped.
        if let Ok(session) = session.downcast::<F::Session>() {
            self.0.release(*session);
        }
    }

    fn dyn_read(
        &self,
        session: &mut DynSession,
        out: &mut dyn UserSliceWriter,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        self.0.read(Self::session(session)?, out, offset)
    }

    fn dyn_write(
        &self,
        session: &mut DynSession,
        input: &mut dyn UserSliceReader,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        self.0.write(Self::session(session)?, input, offset)
    }
}

/// Boxes `fops` for storage in a [`ResourceSpec`](crate::ResourceSpec).
pub fn into_dyn<F: FileOperations>(fops: F) -> Arc<dyn DynFileOperations> {
    Arc::new(FileOpsWrapper(fops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uaccess::{SliceReader, SliceWriter};
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FileOperations for Counter {
        type Session = usize;

        fn open(&self) -> Result<usize, DriverError> {
            Ok(self.opens.fetch_add(1, Ordering::Relaxed))
        }

        fn release(&self, _session: usize) {
            self.closes.fetch_add(1, Ordering::Relaxed);
        }

        fn read(
            &self,
            session: &mut usize,
            out: &mut dyn UserSliceWriter,
            offset: &mut u64,
        ) -> Result<usize, DriverError> {
            let byte = u8::try_from(*session).map_err(|_| DriverError::InvalidState)?;
            out.write_slice(&[byte])?;
            *offset += 1;
            Ok(1)
        }
    }

    /// Keeps the default `read` and `write`.
    struct Quiet;

    impl FileOperations for Quiet {
        type Session = ();

        fn open(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn defaults_are_unsupported() {
        let fops = into_dyn(Quiet);
        let mut s = fops.dyn_open().unwrap();
        let mut buf = [0u8; 1];
        let mut offset = 0;
        assert_eq!(
            fops.dyn_read(&mut s, &mut SliceWriter::new(&mut buf), &mut offset),
            Err(DriverError::Unsupported)
        );
        assert_eq!(
            fops.dyn_write(&mut s, &mut SliceReader::new(b"x"), &mut offset),
            Err(DriverError::Unsupported)
        );
        fops.dyn_release(s);
    }

    #[test]
    fn release_reaches_concrete_impl() {
        let inner = Arc::new(FileOpsWrapper(Counter {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }));
        let s = inner.dyn_open().unwrap();
        let s2 = inner.dyn_open().unwrap();
        assert_eq!(s2.downcast_ref::<usize>(), Some(&1));
        inner.dyn_release(s);
        inner.dyn_release(s2);
        assert_eq!(inner.0.closes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn read_reaches_concrete_impl() {
        let fops = into_dyn(Counter {
            opens: AtomicUsize::new(7),
            closes: AtomicUsize::new(0),
        });
        let mut s = fops.dyn_open().unwrap();
        let mut buf = [0u8; 1];
        let mut offset = 0;
        let n = fops
            .dyn_read(&mut s, &mut SliceWriter::new(&mut buf), &mut offset)
            .unwrap();
        assert_eq!((n, buf[0], offset), (1, 7, 1));
    }

    #[test]
    fn foreign_session_is_invalid_state() {
        let fops = into_dyn(Counter {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        let mut foreign: DynSession = Box::new("not a usize");
        let mut buf = [0u8; 1];
        let mut offset = 0;
        assert_eq!(
            fops.dyn_read(&mut foreign, &mut SliceWriter::new(&mut buf), &mut offset),
            Err(DriverError::InvalidState)
        );
    }
}
