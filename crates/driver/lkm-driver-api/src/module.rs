//! Module entry points and reference counting.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lkm_core::sync::Busy;

use crate::error::DriverError;
use crate::param::{ModuleParams, ParamDecl};
use crate::services::{ModuleServices, TaskSpawner};

/// `MODULE_*` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name, as listed by `lsmod`.
    pub name: &'static str,
    /// `MODULE_AUTHOR`.
    pub author: &'static str,
    /// `MODULE_DESCRIPTION`.
    pub description: &'static str,
    /// `MODULE_LICENSE`.
    pub license: &'static str,
}

/// Reference count of a loaded module (`THIS_MODULE`).
///
/// Open device files hold a reference so the module cannot be unloaded
/// underneath them.
pub struct ThisModule {
    name: &'static str,
    refs: AtomicUsize,
    unloading: AtomicBool,
}

impl ThisModule {
    /// Creates an unreferenced module record.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            refs: AtomicUsize::new(0),
            unloading: AtomicBool::new(false),
        }
    }

    /// Returns the module name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Takes a reference (`try_module_get`).
    ///
    /// Fails once an unload has begun.
    pub fn try_get(&self) -> bool {
        if self.unloading.load(Ordering::SeqCst) {
            return false;
        }
        self.refs.fetch_add(1, Ordering::SeqCst);
        if self.unloading.load(Ordering::SeqCst) {
            self.put();
            return false;
        }
        true
    }

    /// Drops a reference (`module_put`). Ignored at zero.
    pub fn put(&self) {
        let _ = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Takes a reference released when the guard drops.
    pub fn get(self: &Arc<Self>) -> Option<ModuleRef> {
        self.try_get().then(|| ModuleRef {
            module: Arc::clone(self),
        })
    }

    /// Current reference count (`module_refcount`).
    pub fn refcount(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Marks the module as going away. After this, [`ThisModule::try_get`]
    /// fails.
    ///
    /// # Errors
    ///
    /// [`Busy`] if references are still held; the module stays live.
    pub fn begin_unload(&self) -> Result<(), Busy> {
        self.unloading.store(true, Ordering::SeqCst);
        if self.refs.load(Ordering::SeqCst) != 0 {
            self.unloading.store(false, Ordering::SeqCst);
            return Err(Busy);
        }
        Ok(())
    }
}

impl fmt::Debug for ThisModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThisModule")
            .field("name", &self.name)
            .field("refs", &self.refcount())
            .finish_non_exhaustive()
    }
}

/// A held module reference.
#[derive(Debug)]
pub struct ModuleRef {
    module: Arc<ThisModule>,
}

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.module.put();
    }
}

/// Everything a module receives at `init`.
pub struct ModuleContext {
    /// Resource registry.
    pub services: Arc<dyn ModuleServices>,
    /// Kernel thread services.
    pub spawner: Arc<dyn TaskSpawner>,
    /// The module's own reference count.
    pub this: Arc<ThisModule>,
    /// Parsed parameter values.
    pub params: ModuleParams,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("this", &self.this)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A loadable module (`module_init` / `module_exit`).
pub trait KernelModule: Sized + Send + 'static {
    /// Module metadata.
    const INFO: ModuleInfo;

    /// Declared parameters. None by default.
    fn params() -> Vec<ParamDecl> {
        Vec::new()
    }

    /// Initializes the module.
    ///
    /// # Errors
    ///
    /// Any error aborts the load. The module must have released everything
    /// it acquired before returning it.
    fn init(ctx: &ModuleContext) -> Result<Self, DriverError>;

    /// Tears the module down. The default drops it.
    fn exit(self) {
        drop(self);
    }
}

/// A type-erased, initialized module.
pub trait LoadedModule: Send {
    /// Module metadata.
    fn info(&self) -> ModuleInfo;

    /// Runs the module's exit routine.
    fn unload(self: Box<Self>);
}

struct Loaded<M>(M);

impl<M: KernelModule> LoadedModule for Loaded<M> {
    fn info(&self) -> ModuleInfo {
        M::INFO
    }

    fn unload(self: Box<Self>) {
        self.0.exit();
    }
}

fn load<M: KernelModule>(ctx: &ModuleContext) -> Result<Box<dyn LoadedModule>, DriverError> {
    let module = M::init(ctx)?;
    Ok(Box::new(Loaded(module)))
}

/// A catalogue entry for a module that can be loaded by name.
#[derive(Clone, Copy)]
pub struct ModuleEntry {
    /// Module metadata.
    pub info: ModuleInfo,
    /// Returns the parameter declarations.
    pub params: fn() -> Vec<ParamDecl>,
    /// Initializes the module.
    pub load: fn(&ModuleContext) -> Result<Box<dyn LoadedModule>, DriverError>,
}

impl ModuleEntry {
    /// Builds the entry for `M`.
    pub const fn of<M: KernelModule>() -> Self {
        Self {
            info: M::INFO,
            params: M::params,
            load: load::<M>,
        }
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
