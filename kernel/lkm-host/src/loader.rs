//! `insmod` / `rmmod` / `lsmod`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lkm_core::{pr_err, pr_info};
use lkm_driver_api::errno;
use lkm_driver_api::{
    DriverError, LoadedModule, ModuleContext, ModuleEntry, ModuleInfo, ModuleParams, ParamError,
    ThisModule,
};

use crate::host::{HostEvent, SimHost};

/// Why a load or unload failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A module with this name is already loaded.
    AlreadyLoaded(String),
    /// No module with this name is loaded.
    NotLoaded(String),
    /// The module is still referenced.
    Busy(String),
    /// The argument string was rejected.
    Params(ParamError),
    /// The module's `init` failed.
    Init(DriverError),
}

impl LoadError {
    /// Returns the negative errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::AlreadyLoaded(_) => -errno::EEXIST,
            Self::NotLoaded(_) => -errno::ENOENT,
            Self::Busy(_) => -errno::EBUSY,
            Self::Params(_) => -errno::EINVAL,
            Self::Init(e) => e.errno(),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyLoaded(name) => write!(f, "module `{name}` is already loaded"),
            Self::NotLoaded(name) => write!(f, "module `{name}` is not loaded"),
            Self::Busy(name) => write!(f, "module `{name}` is in use"),
            Self::Params(e) => write!(f, "bad parameters: {e}"),
            Self::Init(e) => write!(f, "init failed: {e}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// One line of `lsmod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    /// Module name.
    pub name: &'static str,
    /// Current reference count.
    pub refcount: usize,
    /// Parameters visible in sysfs, with their values.
    pub params: Vec<(&'static str, String)>,
}

struct Slot {
    info: ModuleInfo,
    this: Arc<ThisModule>,
    params: ModuleParams,
    module: Box<dyn LoadedModule>,
}

/// Loads modules into a [`SimHost`].
///
/// Dropping the loader unloads every module still loaded, newest first,
/// regardless of references.
pub struct ModuleLoader {
    host: Arc<SimHost>,
    loaded: Mutex<Vec<Slot>>,
}

impl ModuleLoader {
    /// Creates a loader for `host`.
    pub fn new(host: Arc<SimHost>) -> Self {
        Self {
            host,
            loaded: Mutex::new(Vec::new()),
        }
    }

    /// Returns the host.
    pub fn host(&self) -> &Arc<SimHost> {
        &self.host
    }

    fn loaded(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses `args`, then runs the module's `init`.
    ///
    /// # Errors
    ///
    /// See [`LoadError`]. A failed load leaves nothing registered.
    pub fn insmod(&self, entry: &ModuleEntry, args: &str) -> Result<(), LoadError> {
        let name = entry.info.name;
        let _ring = self.host.enter();
        if self.loaded().iter().any(|s| s.info.name == name) {
            pr_err!("insmod: ERROR: could not insert module {name}: File exists");
            return Err(LoadError::AlreadyLoaded(name.to_owned()));
        }

        let params = ModuleParams::parse((entry.params)(), args).map_err(|e| {
            pr_err!("{name}: {e}");
            LoadError::Params(e)
        })?;
        let this = Arc::new(ThisModule::new(name));
        let ctx = ModuleContext {
            services: self.host.clone(),
            spawner: self.host.clone(),
            this: Arc::clone(&this),
            params: params.clone(),
        };

        match (entry.load)(&ctx) {
            Ok(module) => {
                self.host.record(HostEvent::Loaded(name.to_owned()));
                self.loaded().push(Slot {
                    info: entry.info,
                    this,
                    params,
                    module,
                });
                Ok(())
            }
            Err(e) => {
                pr_err!(
                    "insmod: ERROR: could not insert module {name}: {e} ({})",
                    e.errno()
                );
                self.host.record(HostEvent::LoadFailed(name.to_owned()));
                Err(LoadError::Init(e))
            }
        }
    }

    /// Runs the module's `exit` and forgets it.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotLoaded`] if absent, [`LoadError::Busy`] while
    /// something holds a reference to it.
    pub fn rmmod(&self, name: &str) -> Result<(), LoadError> {
        let _ring = self.host.enter();
        let slot = {
            let mut loaded = self.loaded();
            let idx = loaded
                .iter()
                .position(|s| s.info.name == name)
                .ok_or_else(|| LoadError::NotLoaded(name.to_owned()))?;
            if loaded[idx].this.begin_unload().is_err() {
                pr_err!("rmmod: ERROR: Module {name} is in use");
                return Err(LoadError::Busy(name.to_owned()));
            }
            loaded.remove(idx)
        };
        slot.module.unload();
        self.host.record(HostEvent::Unloaded(name.to_owned()));
        pr_info!("{name}: unloaded");
        Ok(())
    }

    /// Lists loaded modules, oldest first.
    pub fn lsmod(&self) -> Vec<ModuleStatus> {
        self.loaded()
            .iter()
            .map(|s| ModuleStatus {
                name: s.info.name,
                refcount: s.this.refcount(),
                params: s
                    .params
                    .visible()
                    .map(|(d, v)| (d.name, v.to_string()))
                    .collect(),
            })
            .collect()
    }

    /// Returns `true` if `name` is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded().iter().any(|s| s.info.name == name)
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.loaded());
        if slots.is_empty() {
            return;
        }
        let _ring = self.host.enter();
        for slot in slots.into_iter().rev() {
            let name = slot.info.name;
            slot.module.unload();
            self.host.record(HostEvent::Unloaded(name.to_owned()));
        }
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("loaded", &self.lsmod())
            .finish_non_exhaustive()
    }
}
