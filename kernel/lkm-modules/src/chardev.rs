//! Exclusive-access character device.
//!
//! `/dev/chardev` admits one opener at a time. Each successful open renders
//! a greeting that counts previous opens into the message buffer; reads
//! return it, writes are refused.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use lkm_core::buffer::SessionBuffer;
use lkm_core::sync::{ExclusivityGate, GateTicket};
use lkm_core::{pr_alert, pr_info};
use lkm_driver_api::session::read_buffer;
use lkm_driver_api::{
    DriverActive, DriverError, FileOperations, KernelModule, ModuleContext, ModuleInfo, ModuleRef,
    Registration, ResourceSpec, ThisModule, UserSliceReader, UserSliceWriter, into_dyn,
};

/// Name of the range, the class and the node.
pub const DEVICE_NAME: &str = "chardev";
/// Capacity of the message buffer.
pub const BUF_LEN: usize = 80;

struct DeviceState {
    gate: ExclusivityGate,
    // Non-atomic read-modify-write: concurrent opens may lose updates.
    counter: AtomicU32,
    msg: SessionBuffer<BUF_LEN>,
    this: Arc<ThisModule>,
}

/// An open `/dev/chardev`. Closing it reopens the gate.
pub struct ChardevSession {
    state: Arc<DeviceState>,
    ticket: Option<GateTicket>,
    _module: Option<ModuleRef>,
}

impl Drop for ChardevSession {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.state.gate.close(ticket);
        }
    }
}

struct ChardevOps(Arc<DeviceState>);

impl FileOperations for ChardevOps {
    type Session = ChardevSession;

    fn open(&self) -> Result<ChardevSession, DriverError> {
        let state = &self.0;
        let ticket = state.gate.try_open()?;

        let n = state.counter.load(Ordering::Relaxed);
        state.counter.store(n.wrapping_add(1), Ordering::Relaxed);
        state
            .msg
            .store_fmt(format_args!("I already told you {n} times Hello World!\n"));

        Ok(ChardevSession {
            state: Arc::clone(state),
            ticket: Some(ticket),
            _module: state.this.get(),
        })
    }

    fn read(
        &self,
        _session: &mut ChardevSession,
        out: &mut dyn UserSliceWriter,
        offset: &mut u64,
    ) -> Result<usize, DriverError> {
        let start = *offset;
        let n = read_buffer(&self.0.msg, out, offset)?;
        pr_info!("{DEVICE_NAME}: read {n} bytes at offset {start}");
        Ok(n)
    }

    fn write(
        &self,
        _session: &mut ChardevSession,
        _input: &mut dyn UserSliceReader,
        _offset: &mut u64,
    ) -> Result<usize, DriverError> {
        pr_alert!("Operation not supported.");
        Err(DriverError::Unsupported)
    }
}

/// Owns `/dev/chardev`.
pub struct Chardev {
    active: DriverActive,
    state: Arc<DeviceState>,
}

impl Chardev {
    /// The major number the host assigned.
    pub fn major(&self) -> Option<u32> {
        self.active.dev(DEVICE_NAME).map(|d| d.major())
    }

    /// Number of opens counted so far.
    pub fn greetings(&self) -> u32 {
        self.state.counter.load(Ordering::Relaxed)
    }
}

impl KernelModule for Chardev {
    const INFO: ModuleInfo = ModuleInfo {
        name: "chardev",
        author: crate::AUTHOR,
        description: "LKM Character Device Example",
        license: "GPL",
    };

    fn init(ctx: &ModuleContext) -> Result<Self, DriverError> {
        let state = Arc::new(DeviceState {
            gate: ExclusivityGate::new(),
            counter: AtomicU32::new(0),
            msg: SessionBuffer::new(),
            this: Arc::clone(&ctx.this),
        });
        let fops = into_dyn(ChardevOps(Arc::clone(&state)));

        let reg = Registration::new(DEVICE_NAME, Arc::clone(&ctx.services))
            .acquire(ResourceSpec::chrdev(DEVICE_NAME, fops))
            .inspect_err(|e| {
                pr_alert!("Registering char device failed with {}", e.reason.errno());
            })?;
        if let Some(dev) = reg.acquired().first().map(lkm_driver_api::ResourceHandle::dev) {
            pr_info!("I was assigned major number {}.", dev.major());
        }

        let active = reg
            .acquire(ResourceSpec::class(DEVICE_NAME))?
            .acquire(ResourceSpec::device(DEVICE_NAME, DEVICE_NAME, DEVICE_NAME, 0))?
            .finish();
        pr_info!("Device created on /dev/{DEVICE_NAME}");

        Ok(Self { active, state })
    }

    fn exit(self) {
        self.active.teardown();
    }
}

impl core::fmt::Debug for Chardev {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chardev")
            .field("active", &self.active)
            .field("greetings", &self.greetings())
            .finish()
    }
}
