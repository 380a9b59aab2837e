//! Driver error types.
//!
//! Every error maps to a negative errno with [`DriverError::errno`] so log
//! lines read like the kernel's own (`-EBUSY`, `-EFAULT`, …).

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use lkm_core::sync::Busy;

use crate::resource::{ResourceKind, ResourceLabel};

/// Errno values used by the driver API.
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// Try again.
    pub const EAGAIN: i32 = 11;
    /// Out of memory.
    pub const ENOMEM: i32 = 12;
    /// Bad address.
    pub const EFAULT: i32 = 14;
    /// Device or resource busy.
    pub const EBUSY: i32 = 16;
    /// File exists.
    pub const EEXIST: i32 = 17;
    /// No such device.
    pub const ENODEV: i32 = 19;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
}

/// Why the host refused to hand out a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The host denied the allocation or registration.
    Denied,
    /// A resource with the same name or number already exists.
    NameCollision,
    /// The host does not support the requested configuration.
    Unsupported,
    /// The host ran out of memory.
    OutOfMemory,
    /// The request names a class or region that was not acquired first.
    Unresolved,
}

impl AcquireError {
    /// Returns the negative errno for this failure.
    pub const fn errno(self) -> i32 {
        match self {
            Self::Denied => -errno::EBUSY,
            Self::NameCollision => -errno::EEXIST,
            Self::Unsupported => -errno::EINVAL,
            Self::OutOfMemory => -errno::ENOMEM,
            Self::Unresolved => -errno::ENODEV,
        }
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => f.write_str("denied by host"),
            Self::NameCollision => f.write_str("name collision"),
            Self::Unsupported => f.write_str("unsupported configuration"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Unresolved => f.write_str("unresolved dependency"),
        }
    }
}

/// Why the host failed to release a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The host has no record of the resource.
    NotRegistered,
    /// The host reported a failure while releasing.
    HostFault,
}

impl ReleaseError {
    /// Returns the negative errno for this failure.
    pub const fn errno(self) -> i32 {
        match self {
            Self::NotRegistered => -errno::ENOENT,
            Self::HostFault => -errno::EBUSY,
        }
    }
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => f.write_str("not registered"),
            Self::HostFault => f.write_str("host fault"),
        }
    }
}

/// Why a kernel thread could not be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The host refused to create the thread.
    Denied,
    /// The host ran out of memory.
    OutOfMemory,
}

impl SpawnError {
    /// Returns the negative errno for this failure.
    pub const fn errno(self) -> i32 {
        match self {
            Self::Denied => -errno::EAGAIN,
            Self::OutOfMemory => -errno::ENOMEM,
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => f.write_str("scheduling denied"),
            Self::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

/// A failed multi-step registration, after rollback.
///
/// `step` is 1-indexed. `rolled_back` lists the resources that had already
/// been acquired and were released again, in release order (most recent
/// first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationError {
    /// Name of the driver being registered.
    pub driver: String,
    /// The 1-indexed step that failed.
    pub step: usize,
    /// Kind of the resource that failed.
    pub kind: ResourceKind,
    /// Label of the resource that failed.
    pub label: String,
    /// Why the host refused it.
    pub reason: AcquireError,
    /// Resources released by the rollback, most recent first.
    pub rolled_back: Vec<ResourceLabel>,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: step {} ({} `{}`) failed: {}",
            self.driver,
            self.step,
            self.kind.name(),
            self.label,
            self.reason
        )?;
        if !self.rolled_back.is_empty() {
            f.write_str("; rolled back")?;
            for (i, res) in self.rolled_back.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{res}")?;
            }
        }
        Ok(())
    }
}

/// Errors that can occur during module and device operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A registration step failed and was rolled back.
    ResourceAcquisition(RegistrationError),
    /// Another session holds the device.
    Busy,
    /// The operation is not supported by this device.
    Unsupported,
    /// Copying to or from the caller's buffer failed.
    CopyFault,
    /// A kernel thread could not be started.
    SpawnDenied(SpawnError),
    /// An argument or parameter was malformed.
    InvalidArgument,
    /// The object is not in a valid state for this operation.
    InvalidState,
    /// The named object does not exist.
    NotFound,
}

impl DriverError {
    /// Returns the negative errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::ResourceAcquisition(e) => e.reason.errno(),
            Self::Busy => -errno::EBUSY,
            Self::Unsupported | Self::InvalidArgument | Self::InvalidState => -errno::EINVAL,
            Self::CopyFault => -errno::EFAULT,
            Self::SpawnDenied(e) => e.errno(),
            Self::NotFound => -errno::ENOENT,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceAcquisition(e) => write!(f, "resource acquisition failed: {e}"),
            Self::Busy => f.write_str("device or resource busy"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::CopyFault => f.write_str("bad address"),
            Self::SpawnDenied(e) => write!(f, "cannot create kthread: {e}"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::InvalidState => f.write_str("invalid state"),
            Self::NotFound => f.write_str("not found"),
        }
    }
}

impl From<RegistrationError> for DriverError {
    fn from(e: RegistrationError) -> Self {
        Self::ResourceAcquisition(e)
    }
}

impl From<Busy> for DriverError {
    fn from(_: Busy) -> Self {
        Self::Busy
    }
}

impl From<SpawnError> for DriverError {
    fn from(e: SpawnError) -> Self {
        Self::SpawnDenied(e)
    }
}
