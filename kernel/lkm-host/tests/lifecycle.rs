//! Loader lifecycle against a purpose-built module.

use std::sync::Arc;

use lkm_driver_api::{
    AcquireError, DriverActive, DriverError, FileOperations, KernelModule, ModuleContext,
    ModuleEntry, ModuleInfo, ModuleRef, Registration, ResourceKind, ResourceLabel, ResourceSpec,
    ThisModule, into_dyn,
};
use lkm_host::{FaultPlan, HostEvent, LoadError, ModuleLoader, SimHost};

struct PinningOps(Arc<ThisModule>);

impl FileOperations for PinningOps {
    type Session = Option<ModuleRef>;

    fn open(&self) -> Result<Option<ModuleRef>, DriverError> {
        Ok(self.0.get())
    }
}

#[derive(Debug)]
struct Probe {
    active: DriverActive,
}

impl KernelModule for Probe {
    const INFO: ModuleInfo = ModuleInfo {
        name: "probe",
        author: "tests",
        description: "Registers a class and a pinning proc entry",
        license: "GPL",
    };

    fn init(ctx: &ModuleContext) -> Result<Self, DriverError> {
        let fops = into_dyn(PinningOps(Arc::clone(&ctx.this)));
        let active = Registration::new("probe", Arc::clone(&ctx.services))
            .acquire(ResourceSpec::class("probe_class"))?
            .acquire(ResourceSpec::proc_entry("probe", 0o444, fops))?
            .finish();
        lkm_core::pr_info!("probe up");
        Ok(Self { active })
    }

    fn exit(self) {
        let report = self.active.teardown();
        lkm_core::pr_info!("probe down, {} released", report.released.len());
    }
}

const PROBE: ModuleEntry = ModuleEntry::of::<Probe>();

#[test]
fn load_and_unload_are_journaled() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(&PROBE, "").unwrap();
    assert!(loader.is_loaded("probe"));
    assert_eq!(host.live_count(), 2);

    loader.rmmod("probe").unwrap();
    assert_eq!(host.live_count(), 0);
    let journal = host.journal();
    assert!(matches!(
        journal.first(),
        Some(HostEvent::Acquired { resource, .. })
            if *resource == ResourceLabel::new(ResourceKind::Category, "probe_class")
    ));
    assert_eq!(journal.last(), Some(&HostEvent::Unloaded("probe".into())));
    assert!(host.dmesg().contains("probe down, 2 released"));
}

#[test]
fn open_entry_pins_module() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(&PROBE, "").unwrap();

    let file = host.open("/proc/probe").unwrap();
    assert_eq!(loader.lsmod()[0].refcount, 1);
    assert_eq!(loader.rmmod("probe"), Err(LoadError::Busy("probe".into())));
    assert!(loader.is_loaded("probe"));

    drop(file);
    assert_eq!(loader.lsmod()[0].refcount, 0);
    loader.rmmod("probe").unwrap();
}

#[test]
fn failed_init_records_load_failure() {
    let host = SimHost::with_faults(FaultPlan::none().fail_acquire_at(2, AcquireError::OutOfMemory));
    let loader = ModuleLoader::new(Arc::clone(&host));
    let err = loader.insmod(&PROBE, "").unwrap_err();
    assert!(matches!(err, LoadError::Init(DriverError::ResourceAcquisition(_))));
    assert!(!loader.is_loaded("probe"));
    assert_eq!(host.live_count(), 0);
    assert_eq!(host.journal().last(), Some(&HostEvent::LoadFailed("probe".into())));
    assert!(host.dmesg().contains("insmod: ERROR: could not insert module probe"));
}

#[test]
fn teardown_continues_past_failed_release() {
    let host = SimHost::with_faults(FaultPlan::none().fail_release_of("probe"));
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(&PROBE, "").unwrap();
    loader.rmmod("probe").unwrap();

    // The proc entry stays behind; the class is still released.
    assert_eq!(host.proc_entries(), [("probe".to_owned(), 0o444)]);
    assert!(host.classes().is_empty());
    assert!(host.dmesg().contains("probe down, 1 released"));
    assert!(host.journal().contains(&HostEvent::ReleaseFailed(ResourceLabel::new(
        ResourceKind::ProcEntry,
        "probe"
    ))));
}

#[test]
fn dropping_loader_unloads_everything() {
    let host = SimHost::new();
    {
        let loader = ModuleLoader::new(Arc::clone(&host));
        loader.insmod(&PROBE, "").unwrap();
        let _file = host.open("/proc/probe").unwrap();
    }
    assert_eq!(host.live_count(), 0);
    assert!(host.dmesg().contains("probe down"));
}

#[test]
fn hosts_keep_separate_rings() {
    let a = SimHost::new();
    let b = SimHost::new();
    let la = ModuleLoader::new(Arc::clone(&a));
    let lb = ModuleLoader::new(Arc::clone(&b));
    la.insmod(&PROBE, "").unwrap();
    assert!(a.dmesg().contains("probe up"));
    assert!(!b.dmesg().contains("probe up"));
    lb.insmod(&PROBE, "").unwrap();
    assert_eq!(b.dmesg().messages().iter().filter(|m| *m == "probe up").count(), 1);
}
