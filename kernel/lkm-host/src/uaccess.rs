//! User buffers that reject every copy.

use lkm_driver_api::{DriverError, UserSliceReader, UserSliceWriter};

/// A read destination whose every copy faults.
#[derive(Debug)]
pub struct FaultingWriter {
    len: usize,
}

impl FaultingWriter {
    /// A buffer that claims `len` bytes of room.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl UserSliceWriter for FaultingWriter {
    fn len(&self) -> usize {
        self.len
    }

    fn write_slice(&mut self, _data: &[u8]) -> Result<(), DriverError> {
        Err(DriverError::CopyFault)
    }
}

/// A write source whose every copy faults.
#[derive(Debug)]
pub struct FaultingReader {
    len: usize,
}

impl FaultingReader {
    /// A buffer that claims to hold `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl UserSliceReader for FaultingReader {
    fn len(&self) -> usize {
        self.len
    }

    fn read_slice(&mut self, _out: &mut [u8]) -> Result<(), DriverError> {
        Err(DriverError::CopyFault)
    }
}
