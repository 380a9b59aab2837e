//! Module lifecycle, resource registration and device session API.
//!
//! This crate defines the contract between a loadable module and the host
//! it runs on:
//!
//! - **Layer 0** -- Resource specs and handles ([`ResourceSpec`],
//!   [`ResourceHandle`]) naming the host objects a module claims.
//! - **Layer 1** -- The host seam ([`ModuleServices`], [`TaskSpawner`]).
//! - **Layer 2** -- Lifecycle helpers built on the seam: the ordered
//!   [`Registration`] sequencer with rollback, the cooperatively stopped
//!   [`KThread`] worker, and [`KernelModule`] init/exit.
//! - **Layer 3** -- The device session surface ([`FileOperations`]) and the
//!   user-copy traits it reads from and writes to.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod dyn_dispatch;
pub mod error;
pub mod file;
pub mod kthread;
pub mod module;
pub mod param;
pub mod registration;
pub mod resource;
pub mod services;
pub mod session;
pub mod uaccess;

// Re-export all public types at the crate root for ergonomic imports.
pub use dyn_dispatch::{DynFileOperations, DynSession, FileOpsWrapper, into_dyn};
pub use error::{AcquireError, DriverError, RegistrationError, ReleaseError, SpawnError, errno};
pub use file::FileOperations;
pub use kthread::{KThread, KThreadMonitor, KThreadState};
pub use module::{
    KernelModule, LoadedModule, ModuleContext, ModuleEntry, ModuleInfo, ModuleRef, ThisModule,
};
pub use param::{ModuleParams, ParamDecl, ParamError, ParamKind, ParamPerm, ParamValue};
pub use registration::{DriverActive, Registration, TeardownReport, register_all};
pub use resource::{ResourceHandle, ResourceKind, ResourceLabel, ResourceSpec, ResourceToken};
pub use services::{ModuleServices, TaskJoin, TaskSpawner};
pub use uaccess::{SliceReader, SliceWriter, UserSliceReader, UserSliceWriter};
