//! `/dev/chardev`: exclusive open, greeting counter, module references.

use std::sync::{Arc, Barrier};
use std::thread;

use lkm_driver_api::{AcquireError, DriverError, ResourceKind};
use lkm_host::{FaultPlan, LoadError, ModuleLoader, SimHost};
use lkm_modules::chardev::{BUF_LEN, DEVICE_NAME};

const PATH: &str = "/dev/chardev";

fn loaded(host: &Arc<SimHost>) -> ModuleLoader {
    let loader = ModuleLoader::new(Arc::clone(host));
    loader
        .insmod(lkm_modules::find(DEVICE_NAME).unwrap(), "")
        .unwrap();
    loader
}

#[test]
fn registers_range_class_and_node() {
    let host = SimHost::new();
    let _loader = loaded(&host);
    let nodes = host.dev_nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "chardev");
    assert_eq!(nodes[0].dev.major(), 254);
    assert_eq!(nodes[0].dev.minor(), 0);
    assert_eq!(host.classes(), ["chardev"]);
    assert!(host.dmesg().contains("I was assigned major number 254."));
    assert!(host.dmesg().contains("Device created on /dev/chardev"));
}

#[test]
fn greeting_counts_opens() {
    let host = SimHost::new();
    let _loader = loaded(&host);
    for n in 0..3 {
        let mut file = host.open(PATH).unwrap();
        let text = file.read_to_end(16, 100).unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            format!("I already told you {n} times Hello World!\n")
        );
        assert_eq!(file.offset(), 0);
        file.close();
    }
}

#[test]
fn second_open_is_busy_until_close() {
    let host = SimHost::new();
    let _loader = loaded(&host);
    let first = host.open(PATH).unwrap();
    assert_eq!(host.open(PATH).unwrap_err(), DriverError::Busy);
    drop(first);
    let again = host.open(PATH).unwrap();
    again.close();
}

#[test]
fn concurrent_opens_have_one_winner() {
    const THREADS: usize = 6;
    let host = SimHost::new();
    let _loader = loaded(&host);

    for _ in 0..20 {
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let host = Arc::clone(&host);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    host.open(PATH)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == DriverError::Busy)
        );
        drop(results);
        host.open(PATH).unwrap().close();
    }
}

#[test]
fn write_is_unsupported() {
    let host = SimHost::new();
    let _loader = loaded(&host);
    let mut file = host.open(PATH).unwrap();
    let err = file.write(b"hello").unwrap_err();
    assert_eq!(err, DriverError::Unsupported);
    assert_eq!(err.errno(), -22);
    assert!(host.dmesg().contains("Operation not supported."));
}

#[test]
fn message_fits_buffer() {
    let host = SimHost::new();
    let _loader = loaded(&host);
    let mut file = host.open(PATH).unwrap();
    let text = file.read(1024).unwrap();
    assert!(text.len() <= BUF_LEN);
    assert!(host.dmesg().contains("chardev: read"));
}

#[test]
fn copy_fault_is_distinct_from_end_of_data() {
    let host = SimHost::with_faults(FaultPlan::none().fault_copies_on(PATH));
    let _loader = loaded(&host);
    let mut file = host.open(PATH).unwrap();
    assert_eq!(file.read(8).unwrap_err(), DriverError::CopyFault);
    assert_eq!(file.offset(), 0);
}

#[test]
fn open_file_blocks_rmmod() {
    let host = SimHost::new();
    let loader = loaded(&host);
    let file = host.open(PATH).unwrap();
    assert_eq!(loader.lsmod()[0].refcount, 1);
    assert_eq!(
        loader.rmmod(DEVICE_NAME),
        Err(LoadError::Busy(DEVICE_NAME.into()))
    );
    file.close();
    assert_eq!(loader.lsmod()[0].refcount, 0);
    loader.rmmod(DEVICE_NAME).unwrap();
    assert_eq!(host.live_count(), 0);
    assert_eq!(host.open(PATH).unwrap_err(), DriverError::NotFound);
}

#[test]
fn label_fault_fails_first_step() {
    let host = SimHost::with_faults(
        FaultPlan::none().fail_acquire_of(DEVICE_NAME, AcquireError::NameCollision),
    );
    let loader = ModuleLoader::new(Arc::clone(&host));
    let err = loader
        .insmod(lkm_modules::find(DEVICE_NAME).unwrap(), "")
        .unwrap_err();
    // Every chardev resource shares the label, so the first step fails.
    let LoadError::Init(DriverError::ResourceAcquisition(reg)) = &err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(reg.step, 1);
    assert_eq!(reg.kind, ResourceKind::Identifier);
    assert_eq!(err.errno(), -17);
    assert!(host.dmesg().contains("Registering char device failed with -17"));
    assert_eq!(host.live_count(), 0);
}

#[test]
fn failure_at_any_step_leaves_nothing() {
    for step in 1..=3 {
        let host = SimHost::with_faults(FaultPlan::none().fail_acquire_at(step, AcquireError::Denied));
        let loader = ModuleLoader::new(Arc::clone(&host));
        let err = loader
            .insmod(lkm_modules::find(DEVICE_NAME).unwrap(), "")
            .unwrap_err();
        let LoadError::Init(DriverError::ResourceAcquisition(reg)) = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(reg.step, step);
        assert_eq!(reg.rolled_back.len(), step - 1);
        assert_eq!(host.live_count(), 0);
        assert!(!loader.is_loaded(DEVICE_NAME));
    }
}
