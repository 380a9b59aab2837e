//! Runs the lkmctl binary end to end.

use std::path::PathBuf;
use std::process::{Command, Output};

fn lkmctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lkmctl"))
        .args(args)
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("failed to execute lkmctl")
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .display()
        .to_string()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn list_shows_catalogue() {
    let out = lkmctl(&["list"]);
    assert!(out.status.success());
    let text = stdout(&out);
    for name in ["hello_world", "params", "chardev", "kthread_example", "simple_procfs"] {
        assert!(text.contains(name), "missing {name} in:\n{text}");
    }
}

#[test]
fn modinfo_lists_parameters() {
    let out = lkmctl(&["modinfo", "params"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("parm:        int_param:An integer (int, default 128, perm 0o644)"), "{text}");
    assert!(text.contains("array_param"));

    let out = lkmctl(&["modinfo", "missing"]);
    assert!(!out.status.success());
}

#[test]
fn demo_chardev_reads_greeting() {
    let out = lkmctl(&["demo", "chardev", "--reads", "2"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("I already told you 1 times Hello World!"), "{text}");
    assert!(text.contains("Device created on /dev/chardev"));
}

#[test]
fn demo_json_is_parseable() {
    let out = lkmctl(&["--json", "demo", "params", "-p", "int_param=5"]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["module"], "params");
    assert!(
        report["dmesg"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["message"] == "int_param is an integer: 5")
    );
}

#[test]
fn demo_fail_step_exits_nonzero() {
    let out = lkmctl(&["demo", "kthread_example", "--fail-step", "3"]);
    assert!(!out.status.success());
    let text = stdout(&out);
    assert!(text.contains("step 3"), "{text}");
    assert!(text.contains("Cannot create struct class"), "{text}");
}

#[test]
fn config_file_applies() {
    let out = lkmctl(&["--config", &fixture("quiet.toml"), "demo", "simple_procfs"]);
    assert!(!out.status.success());
    let text = stdout(&out);
    assert!(!text.contains("INFO"), "{text}");
    assert!(text.contains("Could not initialise /proc/simple_procfs"), "{text}");
}

#[test]
fn script_passes() {
    let out = lkmctl(&["script", &fixture("chardev_session.toml")]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert!(stdout(&out).contains("8 steps, 0 failed"));
}

#[test]
fn script_failure_exits_nonzero() {
    let out = lkmctl(&["script", &fixture("failing.toml")]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("1 failed"));
}
