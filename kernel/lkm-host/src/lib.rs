//! In-memory host for loadable modules.
//!
//! [`SimHost`] implements the driver API's host seam with plain data
//! structures: a resource registry that hands out device numbers, classes,
//! nodes and procfs entries; a thread spawner backed by `std::thread`; and a
//! file table that routes `/dev` and `/proc` opens to the bound file
//! operations. [`ModuleLoader`] drives module `init` and `exit` on top of
//! it, and every message a module logs lands in the host's [`Dmesg`] ring.
//!
//! A [`FaultPlan`] makes chosen acquisitions, releases, spawns or user
//! copies fail, so every error path of a module can be exercised.

pub mod dmesg;
pub mod fault;
pub mod host;
pub mod loader;
pub mod uaccess;
pub mod vfs;

pub use dmesg::{Dmesg, LogRecord};
pub use fault::FaultPlan;
pub use host::{DevNode, DevRegion, HostConfig, HostEvent, SimHost};
pub use loader::{LoadError, ModuleLoader, ModuleStatus};
pub use vfs::OpenFile;
