//! Example loadable modules.
//!
//! Each module is written against the driver API only and can be loaded
//! into any host by name through [`CATALOG`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod chardev;
pub mod hello;
pub mod kthread_dev;
pub mod params;
pub mod procfs;

use lkm_driver_api::{ModuleEntry, ModuleInfo};

pub(crate) const AUTHOR: &str = "lkm contributors";

/// Every module in this crate, in load-order of the tutorials.
pub static CATALOG: &[ModuleEntry] = &[
    ModuleEntry::of::<hello::HelloWorld>(),
    ModuleEntry::of::<params::Params>(),
    ModuleEntry::of::<chardev::Chardev>(),
    ModuleEntry::of::<kthread_dev::KthreadExample>(),
    ModuleEntry::of::<procfs::SimpleProcfs>(),
];

/// Looks a module up by name.
pub fn find(name: &str) -> Option<&'static ModuleEntry> {
    CATALOG.iter().find(|e| e.info.name == name)
}

/// Metadata of every module, in catalogue order.
pub fn infos() -> impl Iterator<Item = ModuleInfo> {
    CATALOG.iter().map(|e| e.info)
}
