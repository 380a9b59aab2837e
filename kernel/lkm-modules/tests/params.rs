//! `hello_world` and `params`: logging and parameter handling at load time.

use std::sync::Arc;

use lkm_driver_api::ParamError;
use lkm_host::{LoadError, ModuleLoader, SimHost};

fn load(name: &str, args: &str) -> (Arc<SimHost>, ModuleLoader, Result<(), LoadError>) {
    let host = SimHost::new();
    let loader = ModuleLoader::new(Arc::clone(&host));
    let result = loader.insmod(lkm_modules::find(name).unwrap(), args);
    (host, loader, result)
}

#[test]
fn hello_world_greets_and_says_goodbye() {
    let (host, loader, result) = load("hello_world", "");
    result.unwrap();
    loader.rmmod("hello_world").unwrap();
    assert_eq!(
        host.dmesg().messages()[..2],
        [
            "Hello World! Sent from 'hello_world' module",
            "Goodbye World! Sent from 'hello_world' module",
        ]
    );
    assert_eq!(host.live_count(), 0);
}

#[test]
fn params_defaults() {
    let (host, _loader, result) = load("params", "");
    result.unwrap();
    let dmesg = host.dmesg();
    assert!(dmesg.contains("short_param is a short integer: 1"));
    assert!(dmesg.contains("int_param is an integer: 128"));
    assert!(dmesg.contains("str_param is a string: string"));
    assert!(dmesg.contains("array_param[0] = 128"));
    assert!(dmesg.contains("array_param[1] = 128"));
    assert!(dmesg.contains("Got 0 arguments for array_param."));
}

#[test]
fn params_overrides() {
    let (host, loader, result) = load("params", "short_param=3 int_param=1 array_param=13,14 str_param=\"hi there\"");
    result.unwrap();
    let dmesg = host.dmesg();
    assert!(dmesg.contains("short_param is a short integer: 3"));
    assert!(dmesg.contains("int_param is an integer: 1"));
    assert!(dmesg.contains("str_param is a string: hi there"));
    assert!(dmesg.contains("array_param[1] = 14"));
    assert!(dmesg.contains("Got 2 arguments for array_param."));

    // Only parameters with permissions show up.
    let status = &loader.lsmod()[0];
    assert_eq!(
        status.params,
        [
            ("short_param", "3".to_owned()),
            ("int_param", "1".to_owned())
        ]
    );
}

#[test]
fn too_many_array_values_fail_load() {
    let (host, loader, result) = load("params", "array_param=13,13,13");
    assert_eq!(
        result.unwrap_err(),
        LoadError::Params(ParamError::TooManyValues {
            name: "array_param".into(),
            max: 2
        })
    );
    assert!(!loader.is_loaded("params"));
    assert!(!host.dmesg().contains("Hello World!"));
}

#[test]
fn unknown_parameter_is_ignored() {
    let (host, _loader, result) = load("params", "bogus=1");
    result.unwrap();
    assert!(host.dmesg().contains("Unknown parameter `bogus' ignored"));
}

#[test]
fn out_of_range_short_is_rejected() {
    let (_host, _loader, result) = load("params", "short_param=70000");
    let err = result.unwrap_err();
    assert_eq!(err.errno(), -22);
}

#[test]
fn catalogue_lists_every_module() {
    let names: Vec<_> = lkm_modules::infos().map(|i| i.name).collect();
    assert_eq!(
        names,
        ["hello_world", "params", "chardev", "kthread_example", "simple_procfs"]
    );
    assert!(lkm_modules::find("missing").is_none());
}

#[test]
fn double_insmod_and_missing_rmmod() {
    let (_host, loader, result) = load("hello_world", "");
    result.unwrap();
    let entry = lkm_modules::find("hello_world").unwrap();
    assert_eq!(
        loader.insmod(entry, ""),
        Err(LoadError::AlreadyLoaded("hello_world".into()))
    );
    loader.rmmod("hello_world").unwrap();
    assert_eq!(
        loader.rmmod("hello_world"),
        Err(LoadError::NotLoaded("hello_world".into()))
    );
}
