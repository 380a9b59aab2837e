//! A read/write file under `/proc`.
//!
//! Writing replaces the content (at most [`PROCFS_MAX_SIZE`] bytes);
//! reading returns it, then end of file.

use alloc::string::String;
use alloc::sync::Arc;

use lkm_core::buffer::SessionBuffer;
use lkm_core::{pr_alert, pr_debug, pr_info};
use lkm_driver_api::session::{read_buffer, write_buffer};
use lkm_driver_api::{
    DriverActive, DriverError, FileOperations, KernelModule, ModuleContext, ModuleInfo,
    Registration, ResourceSpec, UserSliceReader, UserSliceWriter, into_dyn,
};

/// Entry name, visible as `/proc/simple_procfs`.
pub const PROCFS_NAME: &str = "simple_procfs";
/// Buffer capacity.
pub const PROCFS_MAX_SIZE: usize = 1024;
/// Entry permissions.
pub const PROCFS_MODE: u16 = 0o644;

struct ProcfsOps {
    buffer: SessionBuffer<PROCFS_MAX_SIZE>,
}

impl FileOperations for ProcfsOps {
    type Session = ();

    fn open(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn read(
        &self,
        _session: &mut (),
        out: &mut dyn UserSliceWriter,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        let n = read_buffer(&self.buffer, out, offset)?;
        if n == 0 {
            pr_debug!("procfs_read: END");
        } else {
            pr_info!("procfile read {PROCFS_NAME} and {n} bytes");
        }
        Ok(n)
    }

    fn write(
        &self,
        _session: &mut (),
        input: &mut dyn UserSliceReader,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        let n = write_buffer(&self.buffer, input, offset)?;
        let mut shown = [0u8; PROCFS_MAX_SIZE];
        let len = self.buffer.copy_out(0, &mut shown);
        let text = String::from_utf8_lossy(&shown[..len]);
        pr_info!("procfile write {} & {n}", text.trim_end());
        Ok(n)
    }
}

/// Owns the `/proc/simple_procfs` entry.
#[derive(Debug)]
pub struct SimpleProcfs {
    active: DriverActive,
}

impl KernelModule for SimpleProcfs {
    const INFO: ModuleInfo = ModuleInfo {
        name: "simple_procfs",
        author: crate::AUTHOR,
        description: "LKM procfs Example",
        license: "GPL",
    };

    fn init(ctx: &ModuleContext) -> Result<Self, DriverError> {
        let fops = into_dyn(ProcfsOps {
            buffer: SessionBuffer::new(),
        });
        let active = Registration::new(PROCFS_NAME, Arc::clone(&ctx.services))
            .acquire(ResourceSpec::proc_entry(PROCFS_NAME, PROCFS_MODE, fops))
            .inspect_err(|_| pr_alert!("Error: Could not initialise /proc/{PROCFS_NAME}"))?
            .finish();
        pr_info!("/proc/{PROCFS_NAME} created");
        Ok(Self { active })
    }

    fn exit(self) {
        self.active.teardown();
        pr_info!("/proc/{PROCFS_NAME} removed");
    }
}
