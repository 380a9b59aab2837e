//! `kthread_example`: registration order, worker lifecycle, rollback.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lkm_driver_api::{AcquireError, DriverError, ResourceKind, ResourceLabel, SpawnError};
use lkm_host::{FaultPlan, HostEvent, LoadError, ModuleLoader, SimHost};
use lkm_modules::kthread_dev::{CLASS, DEVICE, REGION, THREAD};

const NAME: &str = "kthread_example";

fn entry() -> &'static lkm_driver_api::ModuleEntry {
    lkm_modules::find(NAME).unwrap()
}

fn worker_lines(host: &SimHost) -> usize {
    host.dmesg()
        .messages()
        .iter()
        .filter(|m| m.starts_with("In kthread_example thread function"))
        .count()
}

fn wait_for_lines(host: &SimHost, at_least: usize) {
    for _ in 0..500 {
        if worker_lines(host) >= at_least {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("worker did not log {at_least} lines");
}

#[test]
fn acquires_four_resources_in_order() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(entry(), "interval_ms=5").unwrap();

    let acquired: Vec<ResourceLabel> = host
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Acquired { resource, .. } => Some(resource),
            _ => None,
        })
        .collect();
    assert_eq!(
        acquired,
        [
            ResourceLabel::new(ResourceKind::Identifier, REGION),
            ResourceLabel::new(ResourceKind::InterfaceBinding, REGION),
            ResourceLabel::new(ResourceKind::Category, CLASS),
            ResourceLabel::new(ResourceKind::DeviceNode, DEVICE),
        ]
    );
    assert!(host.journal().contains(&HostEvent::Spawned(THREAD.into())));
    assert!(host.dmesg().contains("Major = 254 Minor = 0"));
    assert!(host.dmesg().contains("Device driver insert...done."));
    loader.rmmod(NAME).unwrap();
}

#[test]
fn rmmod_stops_worker_then_releases_in_reverse() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(entry(), "interval_ms=1").unwrap();
    wait_for_lines(&host, 3);

    host.clear_journal();
    loader.rmmod(NAME).unwrap();
    let after_stop = worker_lines(&host);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(worker_lines(&host), after_stop);

    assert_eq!(
        host.journal(),
        [
            HostEvent::Released(ResourceLabel::new(ResourceKind::DeviceNode, DEVICE)),
            HostEvent::Released(ResourceLabel::new(ResourceKind::Category, CLASS)),
            HostEvent::Released(ResourceLabel::new(ResourceKind::InterfaceBinding, REGION)),
            HostEvent::Released(ResourceLabel::new(ResourceKind::Identifier, REGION)),
            HostEvent::Unloaded(NAME.into()),
        ]
    );
    assert_eq!(host.live_count(), 0);
}

#[test]
fn worker_counts_from_zero() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(entry(), "interval_ms=1").unwrap();
    wait_for_lines(&host, 2);
    loader.rmmod(NAME).unwrap();
    let messages = host.dmesg().messages();
    let mut lines = messages
        .iter()
        .filter(|m| m.starts_with("In kthread_example thread function"));
    assert_eq!(lines.next().unwrap(), "In kthread_example thread function 0");
    assert_eq!(lines.next().unwrap(), "In kthread_example thread function 1");
}

#[test]
fn spawn_denial_rolls_back_all_registrations() {
    let host = SimHost::with_faults(FaultPlan::none().deny_spawns());
    let loader = ModuleLoader::new(Arc::clone(&host));
    let err = loader.insmod(entry(), "").unwrap_err();
    assert_eq!(
        err,
        LoadError::Init(DriverError::SpawnDenied(SpawnError::Denied))
    );
    assert!(host.dmesg().contains("Cannot create kthread"));
    assert_eq!(host.live_count(), 0);
    let released = host
        .journal()
        .iter()
        .filter(|e| matches!(e, HostEvent::Released(_)))
        .count();
    assert_eq!(released, 4);
    assert!(!loader.is_loaded(NAME));
}

#[test]
fn failure_at_step_k_acquires_only_earlier_steps() {
    for k in 1..=4 {
        let host = SimHost::with_faults(FaultPlan::none().fail_acquire_at(k, AcquireError::Denied));
        let loader = ModuleLoader::new(Arc::clone(&host));
        let err = loader.insmod(entry(), "").unwrap_err();
        let LoadError::Init(DriverError::ResourceAcquisition(reg)) = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(reg.step, k);

        let journal = host.journal();
        let acquired = journal
            .iter()
            .filter(|e| matches!(e, HostEvent::Acquired { .. }))
            .count();
        let released: Vec<_> = journal
            .iter()
            .filter_map(|e| match e {
                HostEvent::Released(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(acquired, k - 1);
        assert_eq!(released, reg.rolled_back);
        assert_eq!(host.live_count(), 0);
        assert!(!journal.iter().any(|e| matches!(e, HostEvent::Spawned(_))));
    }
}

#[test]
fn zero_interval_is_rejected() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    let err = loader.insmod(entry(), "interval_ms=0").unwrap_err();
    assert_eq!(err, LoadError::Init(DriverError::InvalidArgument));
    assert_eq!(host.live_count(), 0);
}

#[test]
fn device_only_logs() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(entry(), "interval_ms=50").unwrap();
    let mut file = host.open("/dev/kthread_example_device").unwrap();
    assert!(file.read(16).unwrap().is_empty());
    assert_eq!(file.write(b"ignored").unwrap(), 7);
    // No exclusivity on this device.
    let second = host.open("/dev/kthread_example_device").unwrap();
    second.close();
    file.close();
    for line in ["Device file opened.", "Read function", "Write function", "Device file closed."] {
        assert!(host.dmesg().contains(line), "missing `{line}`");
    }
    assert_eq!(loader.lsmod()[0].params, [("interval_ms", "50".to_owned())]);
}

#[test]
fn open_file_blocks_rmmod() {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    loader.insmod(entry(), "interval_ms=50").unwrap();
    let mut file = host.open("/dev/kthread_example_device").unwrap();
    assert_eq!(loader.lsmod()[0].refcount, 1);
    assert_eq!(loader.rmmod(NAME), Err(LoadError::Busy(NAME.into())));
    assert!(host.live_count() > 0);
    assert_eq!(file.write(b"x").unwrap(), 1);

    file.close();
    assert_eq!(loader.lsmod()[0].refcount, 0);
    loader.rmmod(NAME).unwrap();
    assert_eq!(host.live_count(), 0);
    assert_eq!(
        host.open("/dev/kthread_example_device").unwrap_err(),
        DriverError::NotFound
    );
}
