//! The simulated host: resource registry, thread spawner and device files.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use lkm_core::id::{DevNum, MINOR_MASK};
use lkm_core::log::LogLevel;
use lkm_core::{pr_err, pr_info};
use lkm_driver_api::resource;
use lkm_driver_api::{
    AcquireError, DriverError, DynFileOperations, ModuleServices, ReleaseError, ResourceHandle,
    ResourceKind, ResourceLabel, ResourceSpec, ResourceToken, SpawnError, TaskJoin, TaskSpawner,
};

use crate::dmesg::{self, Dmesg};
use crate::fault::FaultPlan;
use crate::vfs::OpenFile;

/// Highest dynamically allocated major (`CHRDEV_MAJOR_DYN_END` counts down
/// from here).
pub const DYNAMIC_MAJOR_HIGH: u32 = 254;
/// Lowest dynamically allocated major.
pub const DYNAMIC_MAJOR_LOW: u32 = 234;

/// Host settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Number of log records kept.
    pub dmesg_capacity: usize,
    /// Echo records at or above this severity to stderr.
    pub echo: Option<LogLevel>,
    /// Initial fault plan.
    pub faults: FaultPlan,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            dmesg_capacity: 1024,
            echo: None,
            faults: FaultPlan::none(),
        }
    }
}

/// One entry of the host's event journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A resource was granted.
    Acquired {
        /// Kind and label.
        resource: ResourceLabel,
        /// Token handed out.
        token: ResourceToken,
    },
    /// An acquisition was refused.
    AcquireFailed {
        /// Kind and label.
        resource: ResourceLabel,
        /// Why.
        reason: AcquireError,
    },
    /// A resource was released.
    Released(ResourceLabel),
    /// A release failed and the resource stayed registered.
    ReleaseFailed(ResourceLabel),
    /// A thread was started.
    Spawned(String),
    /// A thread spawn was refused.
    SpawnDenied(String),
    /// A module finished `init`.
    Loaded(String),
    /// A module failed `init`.
    LoadFailed(String),
    /// A module finished `exit`.
    Unloaded(String),
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquired { resource, token } => {
                write!(f, "acquire {resource} -> {:#x}", token.raw())
            }
            Self::AcquireFailed { resource, reason } => {
                write!(f, "acquire {resource} failed: {reason}")
            }
            Self::Released(resource) => write!(f, "release {resource}"),
            Self::ReleaseFailed(resource) => write!(f, "release {resource} failed"),
            Self::Spawned(name) => write!(f, "spawn `{name}`"),
            Self::SpawnDenied(name) => write!(f, "spawn `{name}` denied"),
            Self::Loaded(name) => write!(f, "insmod {name}"),
            Self::LoadFailed(name) => write!(f, "insmod {name} failed"),
            Self::Unloaded(name) => write!(f, "rmmod {name}"),
        }
    }
}

struct Region {
    name: String,
    first: DevNum,
    count: u32,
}

struct Binding {
    region: String,
    first: DevNum,
    count: u32,
    implicit: bool,
    fops: Arc<dyn DynFileOperations>,
}

/// One past the last minor of `count` minors starting at `first`.
fn minor_end(first: DevNum, count: u32) -> u64 {
    u64::from(first.minor()) + u64::from(count)
}

/// Rejects a minor range that does not fit in the minor field.
fn check_minors(first_minor: u32, count: u32) -> Result<(), AcquireError> {
    match first_minor.checked_add(count) {
        Some(end) if first_minor <= MINOR_MASK && end <= MINOR_MASK + 1 => Ok(()),
        _ => Err(AcquireError::Unsupported),
    }
}

impl Binding {
    fn covers(&self, dev: DevNum) -> bool {
        dev.major() == self.first.major()
            && dev.minor() >= self.first.minor()
            && u64::from(dev.minor()) < minor_end(self.first, self.count)
    }

    fn overlaps(&self, first: DevNum, count: u32) -> bool {
        first.major() == self.first.major()
            && u64::from(first.minor()) < minor_end(self.first, self.count)
            && u64::from(self.first.minor()) < minor_end(first, count)
    }
}

struct Node {
    dev: DevNum,
    class: String,
}

struct ProcFile {
    mode: u16,
    fops: Arc<dyn DynFileOperations>,
}

#[derive(Default)]
struct Registry {
    regions: BTreeMap<u32, Region>,
    bindings: Vec<Binding>,
    classes: BTreeMap<String, u64>,
    nodes: BTreeMap<String, Node>,
    procs: BTreeMap<String, ProcFile>,
    next_id: u64,
    acquire_calls: usize,
    journal: Vec<HostEvent>,
    faults: FaultPlan,
}

impl Registry {
    fn resolve_region(acquired: &[ResourceHandle], region: &str) -> Result<DevNum, AcquireError> {
        resource::find(acquired, ResourceKind::Identifier, region)
            .map(ResourceHandle::dev)
            .ok_or(AcquireError::Unresolved)
    }

    fn dynamic_major(&self) -> Result<u32, AcquireError> {
        (DYNAMIC_MAJOR_LOW..=DYNAMIC_MAJOR_HIGH)
            .rev()
            .find(|major| !self.regions.contains_key(major))
            .ok_or(AcquireError::Denied)
    }

    fn bind(
        &mut self,
        region: &str,
        first: DevNum,
        count: u32,
        implicit: bool,
        fops: Arc<dyn DynFileOperations>,
    ) -> Result<(), AcquireError> {
        if self.bindings.iter().any(|b| b.overlaps(first, count)) {
            return Err(AcquireError::NameCollision);
        }
        self.bindings.push(Binding {
            region: region.to_owned(),
            first,
            count,
            implicit,
            fops,
        });
        Ok(())
    }

    fn grant(
        &mut self,
        spec: &ResourceSpec,
        acquired: &[ResourceHandle],
    ) -> Result<ResourceToken, AcquireError> {
        match spec {
            ResourceSpec::Identifier {
                name,
                major,
                first_minor,
                count,
                fops,
            } => {
                if *count == 0 {
                    return Err(AcquireError::Unsupported);
                }
                check_minors(*first_minor, *count)?;
                let major = match *major {
                    Some(fixed) if fixed == 0 || fixed > lkm_core::id::MAX_MAJOR => {
                        return Err(AcquireError::Unsupported);
                    }
                    Some(fixed) if self.regions.contains_key(&fixed) => {
                        return Err(AcquireError::NameCollision);
                    }
                    Some(fixed) => fixed,
                    None => self.dynamic_major()?,
                };
                let first = DevNum::new(major, *first_minor);
                if let Some(fops) = fops {
                    self.bind(name, first, *count, true, Arc::clone(fops))?;
                }
                self.regions.insert(
                    major,
                    Region {
                        name: name.clone(),
                        first,
                        count: *count,
                    },
                );
                Ok(ResourceToken::from_dev(first))
            }
            ResourceSpec::InterfaceBinding {
                region,
                count,
                fops,
            } => {
                let first = Self::resolve_region(acquired, region)?;
                check_minors(first.minor(), *count)?;
                self.bind(region, first, *count, false, Arc::clone(fops))?;
                Ok(ResourceToken::from_dev(first))
            }
            ResourceSpec::Category { name } => {
                if self.classes.contains_key(name) {
                    return Err(AcquireError::NameCollision);
                }
                self.next_id += 1;
                self.classes.insert(name.clone(), self.next_id);
                Ok(ResourceToken::new(self.next_id))
            }
            ResourceSpec::DeviceNode {
                name,
                class,
                region,
                minor,
            } => {
                if resource::find(acquired, ResourceKind::Category, class).is_none() {
                    return Err(AcquireError::Unresolved);
                }
                let dev = Self::resolve_region(acquired, region)?
                    .checked_offset(*minor)
                    .ok_or(AcquireError::Unsupported)?;
                if self.nodes.contains_key(name) {
                    return Err(AcquireError::NameCollision);
                }
                self.nodes.insert(
                    name.clone(),
                    Node {
                        dev,
                        class: class.clone(),
                    },
                );
                Ok(ResourceToken::from_dev(dev))
            }
            ResourceSpec::ProcEntry { name, mode, fops } => {
                if self.procs.contains_key(name) {
                    return Err(AcquireError::NameCollision);
                }
                self.procs.insert(
                    name.clone(),
                    ProcFile {
                        mode: *mode,
                        fops: Arc::clone(fops),
                    },
                );
                self.next_id += 1;
                Ok(ResourceToken::new(self.next_id))
            }
        }
    }

    fn revoke(&mut self, handle: &ResourceHandle) -> Result<(), ReleaseError> {
        let label = handle.label();
        let found = match handle.kind() {
            ResourceKind::Identifier => {
                let major = handle.dev().major();
                let owned = self.regions.get(&major).is_some_and(|r| r.name == label);
                if owned {
                    self.regions.remove(&major);
                    self.bindings
                        .retain(|b| !(b.implicit && b.first.major() == major));
                }
                owned
            }
            ResourceKind::InterfaceBinding => {
                let before = self.bindings.len();
                self.bindings
                    .retain(|b| b.implicit || b.region != label || b.first != handle.dev());
                self.bindings.len() != before
            }
            ResourceKind::Category => self.classes.remove(label).is_some(),
            ResourceKind::DeviceNode => self.nodes.remove(label).is_some(),
            ResourceKind::ProcEntry => self.procs.remove(label).is_some(),
        };
        if found {
            Ok(())
        } else {
            Err(ReleaseError::NotRegistered)
        }
    }

    fn live(&self) -> Vec<ResourceLabel> {
        let mut out = Vec::new();
        for region in self.regions.values() {
            out.push(ResourceLabel::new(ResourceKind::Identifier, &region.name));
        }
        for binding in self.bindings.iter().filter(|b| !b.implicit) {
            out.push(ResourceLabel::new(ResourceKind::InterfaceBinding, &binding.region));
        }
        for name in self.classes.keys() {
            out.push(ResourceLabel::new(ResourceKind::Category, name));
        }
        for name in self.nodes.keys() {
            out.push(ResourceLabel::new(ResourceKind::DeviceNode, name));
        }
        for name in self.procs.keys() {
            out.push(ResourceLabel::new(ResourceKind::ProcEntry, name));
        }
        out
    }
}

/// A device node as listed under `/dev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevNode {
    /// Node name.
    pub name: String,
    /// Device number.
    pub dev: DevNum,
    /// Owning class.
    pub class: String,
}

/// A registered device number range, as listed in `/proc/devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevRegion {
    /// Registered name.
    pub name: String,
    /// First device number.
    pub first: DevNum,
    /// Number of minors.
    pub count: u32,
}

/// In-memory implementation of [`ModuleServices`] and [`TaskSpawner`].
pub struct SimHost {
    registry: Mutex<Registry>,
    dmesg: Arc<Dmesg>,
}

impl SimHost {
    /// Creates a host with default settings.
    pub fn new() -> Arc<Self> {
        Self::with_config(HostConfig::default())
    }

    /// Creates a host.
    pub fn with_config(config: HostConfig) -> Arc<Self> {
        dmesg::install();
        Arc::new(Self {
            registry: Mutex::new(Registry {
                faults: config.faults,
                ..Registry::default()
            }),
            dmesg: Dmesg::new(config.dmesg_capacity, config.echo),
        })
    }

    /// Creates a host with default settings and the given fault plan.
    pub fn with_faults(faults: FaultPlan) -> Arc<Self> {
        Self::with_config(HostConfig {
            faults,
            ..HostConfig::default()
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the fault plan. Acquisition counting is not reset.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.registry().faults = faults;
    }

    /// Returns the host's log ring.
    pub fn dmesg(&self) -> &Arc<Dmesg> {
        &self.dmesg
    }

    /// Routes the calling thread's log output to this host until dropped.
    pub fn enter(&self) -> dmesg::RingGuard {
        dmesg::enter(&self.dmesg)
    }

    pub(crate) fn record(&self, event: HostEvent) {
        self.registry().journal.push(event);
    }

    /// Returns the event journal, oldest first.
    pub fn journal(&self) -> Vec<HostEvent> {
        self.registry().journal.clone()
    }

    /// Empties the event journal.
    pub fn clear_journal(&self) {
        self.registry().journal.clear();
    }

    /// Every resource currently registered.
    pub fn live_resources(&self) -> Vec<ResourceLabel> {
        self.registry().live()
    }

    /// Number of resources currently registered.
    pub fn live_count(&self) -> usize {
        self.live_resources().len()
    }

    /// Device nodes, sorted by name.
    pub fn dev_nodes(&self) -> Vec<DevNode> {
        self.registry()
            .nodes
            .iter()
            .map(|(name, node)| DevNode {
                name: name.clone(),
                dev: node.dev,
                class: node.class.clone(),
            })
            .collect()
    }

    /// Registered device number ranges, sorted by major.
    pub fn regions(&self) -> Vec<DevRegion> {
        self.registry()
            .regions
            .values()
            .map(|r| DevRegion {
                name: r.name.clone(),
                first: r.first,
                count: r.count,
            })
            .collect()
    }

    /// Device classes, sorted by name.
    pub fn classes(&self) -> Vec<String> {
        self.registry().classes.keys().cloned().collect()
    }

    /// Procfs entries with their modes, sorted by name.
    pub fn proc_entries(&self) -> Vec<(String, u16)> {
        self.registry()
            .procs
            .iter()
            .map(|(name, p)| (name.clone(), p.mode))
            .collect()
    }

    /// Opens `/dev/<name>` or `/proc/<name>`.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotFound`] if nothing is registered at `path` or the
    /// node has no bound file operations, otherwise whatever the device's
    /// `open` reports (typically [`DriverError::Busy`]).
    pub fn open(self: &Arc<Self>, path: &str) -> Result<OpenFile, DriverError> {
        let (fops, fault_copies) = {
            let reg = self.registry();
            let fops = if let Some(name) = path.strip_prefix("/dev/") {
                let dev = reg.nodes.get(name).ok_or(DriverError::NotFound)?.dev;
                reg.bindings
                    .iter()
                    .find(|b| b.covers(dev))
                    .map(|b| Arc::clone(&b.fops))
                    .ok_or(DriverError::NotFound)?
            } else if let Some(name) = path.strip_prefix("/proc/") {
                reg.procs
                    .get(name)
                    .map(|p| Arc::clone(&p.fops))
                    .ok_or(DriverError::NotFound)?
            } else {
                return Err(DriverError::NotFound);
            };
            (fops, reg.faults.copy_faults(path))
        };

        let _ring = self.enter();
        let session = fops.dyn_open()?;
        Ok(OpenFile::new(
            Arc::clone(self),
            path,
            fops,
            session,
            fault_copies,
        ))
    }
}

impl fmt::Debug for SimHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHost")
            .field("live", &self.live_resources())
            .field("dmesg", &self.dmesg)
            .finish()
    }
}

impl ModuleServices for SimHost {
    fn acquire(
        &self,
        spec: &ResourceSpec,
        acquired: &[ResourceHandle],
    ) -> Result<ResourceToken, AcquireError> {
        let mut reg = self.registry();
        reg.acquire_calls += 1;
        let nth = reg.acquire_calls;
        let resource = ResourceLabel::new(spec.kind(), spec.label());
        let result = match reg.faults.acquire_fault(nth, spec.label()) {
            Some(reason) => Err(reason),
            None => reg.grant(spec, acquired),
        };
        let event = match result {
            Ok(token) => HostEvent::Acquired { resource, token },
            Err(reason) => HostEvent::AcquireFailed { resource, reason },
        };
        reg.journal.push(event);
        result
    }

    fn release(&self, handle: &ResourceHandle) -> Result<(), ReleaseError> {
        let mut reg = self.registry();
        let resource = handle.describe();
        if reg.faults.release_faults(handle.label()) {
            reg.journal.push(HostEvent::ReleaseFailed(resource));
            return Err(ReleaseError::HostFault);
        }
        let result = reg.revoke(handle);
        reg.journal.push(match result {
            Ok(()) => HostEvent::Released(resource),
            Err(_) => HostEvent::ReleaseFailed(resource),
        });
        result
    }
}

struct HostJoin {
    name: String,
    handle: thread::JoinHandle<()>,
}

impl TaskJoin for HostJoin {
    fn join(self: Box<Self>) {
        if self.handle.join().is_err() {
            pr_err!("kthread `{}` panicked", self.name);
        }
    }
}

impl TaskSpawner for SimHost {
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<Box<dyn TaskJoin>, SpawnError> {
        if self.registry().faults.deny_spawn {
            self.record(HostEvent::SpawnDenied(name.to_owned()));
            return Err(SpawnError::Denied);
        }
        let ring = Arc::clone(&self.dmesg);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _ring = dmesg::enter(&ring);
                entry();
            })
            .map_err(|_| SpawnError::OutOfMemory)?;
        self.record(HostEvent::Spawned(name.to_owned()));
        pr_info!("kthread `{name}` created");
        Ok(Box::new(HostJoin {
            name: name.to_owned(),
            handle,
        }))
    }

    fn msleep(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
