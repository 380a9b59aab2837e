//! The smallest possible module.

use lkm_core::pr_info;
use lkm_driver_api::{DriverError, KernelModule, ModuleContext, ModuleInfo};

/// Logs a greeting on load and a farewell on unload.
pub struct HelloWorld;

impl KernelModule for HelloWorld {
    const INFO: ModuleInfo = ModuleInfo {
        name: "hello_world",
        author: crate::AUTHOR,
        description: "Hello world Example of a Linux Kernel Module",
        license: "GPL",
    };

    fn init(_ctx: &ModuleContext) -> Result<Self, DriverError> {
        pr_info!("Hello World! Sent from '{}' module", Self::INFO.name);
        Ok(Self)
    }

    fn exit(self) {
        pr_info!("Goodbye World! Sent from '{}' module", Self::INFO.name);
    }
}
