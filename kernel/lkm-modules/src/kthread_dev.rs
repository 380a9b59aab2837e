//! Character device with a background worker.
//!
//! Registers `kthread_example_device` in four steps (range, cdev, class,
//! node) and then starts a worker that logs a counter every `interval_ms`
//! milliseconds. The device itself only logs what is done to it.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use lkm_core::{pr_err, pr_info};
use lkm_driver_api::{
    DriverActive, DriverError, FileOperations, KThread, KernelModule, ModuleContext, ModuleInfo,
    ModuleRef, ParamDecl, ParamPerm, Registration, ResourceKind, ResourceSpec, ThisModule,
    UserSliceReader, UserSliceWriter, into_dyn,
};

/// Device number range name.
pub const REGION: &str = "kthread_example_Dev";
/// Class name.
pub const CLASS: &str = "kthread_example_class";
/// Node name, visible as `/dev/kthread_example_device`.
pub const DEVICE: &str = "kthread_example_device";
/// Worker thread name.
pub const THREAD: &str = "kthread Thread";
/// Name of the sleep interval parameter.
pub const INTERVAL_PARAM: &str = "interval_ms";

/// Every open file holds a reference on the module until it is closed.
struct KthreadOps(Arc<ThisModule>);

impl FileOperations for KthreadOps {
    type Session = Option<ModuleRef>;

    fn open(&self) -> Result<Option<ModuleRef>, DriverError> {
        let module = self.0.get();
        pr_info!("Device file opened.");
        Ok(module)
    }

    fn release(&self, _session: Option<ModuleRef>) {
        pr_info!("Device file closed.");
    }

    fn read(
        &self,
        _session: &mut Option<ModuleRef>,
        _out: &mut dyn UserSliceWriter,
        _offset: &mut u64,
    ) -> Result<usize, DriverError> {
        pr_info!("Read function");
        Ok(0)
    }

    fn write(
        &self,
        _session: &mut Option<ModuleRef>,
        input: &mut dyn UserSliceReader,
        _offset: &mut u64,
    ) -> Result<usize, DriverError> {
        pr_info!("Write function");
        Ok(input.len())
    }
}

/// Owns the device and its worker.
#[derive(Debug)]
pub struct KthreadExample {
    worker: KThread,
    active: DriverActive,
}

impl KthreadExample {
    /// Iterations the worker has completed.
    pub fn iterations(&self) -> u64 {
        self.worker.iterations()
    }
}

impl KernelModule for KthreadExample {
    const INFO: ModuleInfo = ModuleInfo {
        name: "kthread_example",
        author: crate::AUTHOR,
        description: "Kthread LKM example",
        license: "GPL",
    };

    fn params() -> Vec<ParamDecl> {
        vec![ParamDecl::int(
            INTERVAL_PARAM,
            1000,
            ParamPerm::S_IRUSR | ParamPerm::S_IRGRP | ParamPerm::S_IROTH,
            "Worker sleep between iterations, in milliseconds",
        )]
    }

    fn init(ctx: &ModuleContext) -> Result<Self, DriverError> {
        let fops = into_dyn(KthreadOps(Arc::clone(&ctx.this)));
        let interval = ctx
            .params
            .int(INTERVAL_PARAM)
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|&ms| ms > 0)
            .ok_or(DriverError::InvalidArgument)?;

        let reg = Registration::new(REGION, Arc::clone(&ctx.services))
            .acquire(ResourceSpec::chrdev_region(REGION, 0, 1))
            .inspect_err(|_| pr_err!("Cannot allocate major number"))?;
        if let Some(region) = reg.find(ResourceKind::Identifier, REGION) {
            let dev = region.dev();
            pr_info!("Major = {} Minor = {}", dev.major(), dev.minor());
        }

        let active = reg
            .acquire(ResourceSpec::cdev(REGION, 1, fops))
            .inspect_err(|_| pr_err!("Cannot add the device to the system"))?
            .acquire(ResourceSpec::class(CLASS))
            .inspect_err(|_| pr_err!("Cannot create struct class"))?
            .acquire(ResourceSpec::device(DEVICE, CLASS, REGION, 0))
            .inspect_err(|_| pr_err!("Cannot create the device"))?
            .finish();

        let worker = match KThread::run(Arc::clone(&ctx.spawner), THREAD, interval, |i| {
            pr_info!("In kthread_example thread function {i}");
        }) {
            Ok(worker) => worker,
            Err(e) => {
                pr_err!("Cannot create kthread");
                active.teardown();
                return Err(e);
            }
        };

        pr_info!("Device driver insert...done.");
        Ok(Self { worker, active })
    }

    fn exit(self) {
        let Self { worker, active } = self;
        let iterations = worker.stop();
        active.teardown();
        pr_info!("Device driver remove...done ({iterations} iterations).");
    }
}
