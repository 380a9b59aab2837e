//! Host service traits.
//!
//! A module never talks to a concrete host; it receives these capabilities
//! through its [`ModuleContext`](crate::module::ModuleContext). The in-memory
//! host implements them for tests and tooling.

use alloc::boxed::Box;

use crate::error::{AcquireError, ReleaseError, SpawnError};
use crate::resource::{ResourceHandle, ResourceSpec, ResourceToken};

/// Resource registry services.
pub trait ModuleServices: Send + Sync {
    /// Grants the resource described by `spec`.
    ///
    /// `acquired` holds the handles the caller already owns, in acquisition
    /// order, so that specs naming another resource (a device node's class,
    /// a binding's range) can be resolved against them.
    ///
    /// # Errors
    ///
    /// Returns an [`AcquireError`] if the host refuses the resource.
    fn acquire(
        &self,
        spec: &ResourceSpec,
        acquired: &[ResourceHandle],
    ) -> Result<ResourceToken, AcquireError>;

    /// Releases a granted resource.
    ///
    /// # Errors
    ///
    /// Returns a [`ReleaseError`] if the host fails to release it. The
    /// handle is gone either way.
    fn release(&self, handle: &ResourceHandle) -> Result<(), ReleaseError>;
}

/// Join handle for a spawned task.
pub trait TaskJoin: Send {
    /// Blocks until the task has returned.
    fn join(self: Box<Self>);
}

/// Kernel thread services (`kthread_create`, `msleep`).
pub trait TaskSpawner: Send + Sync {
    /// Starts `entry` on a new thread called `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`SpawnError`] if the host refuses to schedule the thread.
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<Box<dyn TaskJoin>, SpawnError>;

    /// Sleeps the calling thread for `ms` milliseconds. Not interruptible.
    fn msleep(&self, ms: u64);
}
