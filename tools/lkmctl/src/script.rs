//! `lkmctl script`: scripted sessions.
//!
//! A script is a list of `[[step]]` tables run in order against one host.
//! Every step may name the outcome it expects with `expect`: `"ok"` (the
//! default) or an error name such as `"busy"` or `"not-loaded"`.
//!
//! ```toml
//! [[step]]
//! op = "insmod"
//! module = "chardev"
//!
//! [[step]]
//! op = "open"
//! path = "/dev/chardev"
//! file = "a"
//!
//! [[step]]
//! op = "open"
//! path = "/dev/chardev"
//! expect = "busy"
//!
//! [[step]]
//! op = "rmmod"
//! module = "chardev"
//! expect = "busy"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use lkm_driver_api::DriverError;
use lkm_host::{HostConfig, LoadError, ModuleLoader, OpenFile, SimHost};
use serde::{Deserialize, Serialize};

/// A parsed script.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Steps, in order.
    #[serde(rename = "step", default)]
    pub steps: Vec<Step>,
}

fn default_file() -> String {
    "0".into()
}

fn ok() -> String {
    "ok".into()
}

/// One scripted action.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", deny_unknown_fields)]
pub enum Step {
    /// Load a module.
    Insmod {
        /// Catalogue name.
        module: String,
        /// Parameter string.
        #[serde(default)]
        args: String,
        /// Expected outcome.
        #[serde(default = "ok")]
        expect: String,
    },
    /// Unload a module.
    Rmmod {
        /// Module name.
        module: String,
        /// Expected outcome.
        #[serde(default = "ok")]
        expect: String,
    },
    /// Open a device file under a handle name.
    Open {
        /// `/dev/...` or `/proc/...`.
        path: String,
        /// Handle name used by later steps.
        #[serde(default = "default_file")]
        file: String,
        /// Expected outcome.
        #[serde(default = "ok")]
        expect: String,
    },
    /// Read from an open handle.
    Read {
        /// Handle name.
        #[serde(default = "default_file")]
        file: String,
        /// Bytes requested.
        #[serde(default = "default_len")]
        len: usize,
        /// Exact text the read must return.
        data: Option<String>,
        /// Expected outcome.
        #[serde(default = "ok")]
        expect: String,
    },
    /// Write to an open handle.
    Write {
        /// Handle name.
        #[serde(default = "default_file")]
        file: String,
        /// Text to write.
        data: String,
        /// Expected outcome.
        #[serde(default = "ok")]
        expect: String,
    },
    /// Close an open handle.
    Close {
        /// Handle name.
        #[serde(default = "default_file")]
        file: String,
    },
    /// Wait.
    Sleep {
        /// Milliseconds.
        ms: u64,
    },
    /// Check the set of loaded modules.
    Lsmod {
        /// Names that must be loaded, in load order.
        loaded: Vec<String>,
    },
    /// Check the log.
    Dmesg {
        /// Text some record must contain.
        contains: String,
    },
}

fn default_len() -> usize {
    256
}

/// Outcome of one step.
#[derive(Debug, Serialize)]
pub struct StepResult {
    /// 1-indexed step number.
    pub step: usize,
    /// What the step did.
    pub op: String,
    /// What happened, as an outcome name or a description.
    pub outcome: String,
    /// `None` if the step met its expectation.
    pub failure: Option<String>,
}

/// Outcome of a whole script.
#[derive(Debug, Serialize)]
pub struct ScriptReport {
    /// Per-step results.
    pub steps: Vec<StepResult>,
    /// The host log after the last step.
    pub dmesg: Vec<String>,
}

impl ScriptReport {
    /// Number of steps that missed their expectation.
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| s.failure.is_some()).count()
    }
}

impl fmt::Display for ScriptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.steps {
            match &s.failure {
                None => writeln!(f, "{:>3} ok   {} -> {}", s.step, s.op, s.outcome)?,
                Some(why) => writeln!(f, "{:>3} FAIL {} -> {}: {why}", s.step, s.op, s.outcome)?,
            }
        }
        writeln!(f, "{} steps, {} failed", self.steps.len(), self.failures())
    }
}

/// Short, stable name of a device error.
pub fn driver_outcome(e: &DriverError) -> &'static str {
    match e {
        DriverError::ResourceAcquisition(_) => "resource",
        DriverError::Busy => "busy",
        DriverError::Unsupported => "unsupported",
        DriverError::CopyFault => "copy-fault",
        DriverError::SpawnDenied(_) => "spawn-denied",
        DriverError::InvalidArgument => "invalid-argument",
        DriverError::InvalidState => "invalid-state",
        DriverError::NotFound => "not-found",
    }
}

/// Short, stable name of a loader error.
pub fn load_outcome(e: &LoadError) -> &'static str {
    match e {
        LoadError::AlreadyLoaded(_) => "already-loaded",
        LoadError::NotLoaded(_) => "not-loaded",
        LoadError::Busy(_) => "busy",
        LoadError::Params(_) => "params",
        LoadError::Init(e) => driver_outcome(e),
    }
}

impl Script {
    /// Parses script text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse script")
    }

    /// Runs every step against a fresh host. Failed expectations are
    /// recorded in the report; they do not stop the script.
    pub fn run(&self, host_config: HostConfig) -> Result<ScriptReport> {
        let host = SimHost::with_config(host_config);
        let loader = ModuleLoader::new(Arc::clone(&host));
        let mut files: HashMap<String, OpenFile> = HashMap::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            let (op, outcome, expect) = run_step(step, &host, &loader, &mut files)?;
            let failure = match expect {
                Expect::Outcome(want) if want != outcome.name => {
                    Some(format!("expected `{want}`"))
                }
                Expect::Check(Err(why)) => Some(why),
                _ => None,
            };
            steps.push(StepResult {
                step: i + 1,
                op,
                outcome: outcome.text,
                failure,
            });
        }

        drop(files);
        drop(loader);
        Ok(ScriptReport {
            steps,
            dmesg: host.dmesg().records().iter().map(ToString::to_string).collect(),
        })
    }
}

struct Outcome {
    name: String,
    text: String,
}

impl Outcome {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            name: "ok".into(),
            text: text.into(),
        }
    }

    fn err(name: &str, e: &dyn fmt::Display) -> Self {
        Self {
            name: name.into(),
            text: format!("{name}: {e}"),
        }
    }
}

enum Expect<'a> {
    Outcome(&'a str),
    Check(Result<(), String>),
}

fn run_step<'a>(
    step: &'a Step,
    host: &Arc<SimHost>,
    loader: &ModuleLoader,
    files: &mut HashMap<String, OpenFile>,
) -> Result<(String, Outcome, Expect<'a>)> {
    Ok(match step {
        Step::Insmod {
            module,
            args,
            expect,
        } => {
            let entry = lkm_modules::find(module)
                .with_context(|| format!("no module named `{module}`"))?;
            let outcome = match loader.insmod(entry, args) {
                Ok(()) => Outcome::ok("loaded"),
                Err(e) => Outcome::err(load_outcome(&e), &e),
            };
            (format!("insmod {module}"), outcome, Expect::Outcome(expect))
        }
        Step::Rmmod { module, expect } => {
            let outcome = match loader.rmmod(module) {
                Ok(()) => Outcome::ok("unloaded"),
                Err(e) => Outcome::err(load_outcome(&e), &e),
            };
            (format!("rmmod {module}"), outcome, Expect::Outcome(expect))
        }
        Step::Open { path, file, expect } => {
            let outcome = match host.open(path) {
                Ok(f) => {
                    files.insert(file.clone(), f);
                    Outcome::ok(format!("handle {file}"))
                }
                Err(e) => Outcome::err(driver_outcome(&e), &e),
            };
            (format!("open {path}"), outcome, Expect::Outcome(expect))
        }
        Step::Read {
            file,
            len,
            data,
            expect,
        } => {
            let f = files
                .get_mut(file)
                .with_context(|| format!("no open handle `{file}`"))?;
            let (outcome, check) = match f.read(*len) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let check = match data {
                        Some(want) if *want != text => Err(format!("read {text:?}, expected {want:?}")),
                        _ => Ok(()),
                    };
                    (Outcome::ok(format!("{text:?}")), check)
                }
                Err(e) => (Outcome::err(driver_outcome(&e), &e), Ok(())),
            };
            let expect = match check {
                Ok(()) => Expect::Outcome(expect),
                Err(why) => Expect::Check(Err(why)),
            };
            (format!("read {file}"), outcome, expect)
        }
        Step::Write { file, data, expect } => {
            let f = files
                .get_mut(file)
                .with_context(|| format!("no open handle `{file}`"))?;
            let outcome = match f.write(data.as_bytes()) {
                Ok(n) => Outcome::ok(format!("{n} bytes")),
                Err(e) => Outcome::err(driver_outcome(&e), &e),
            };
            (format!("write {file}"), outcome, Expect::Outcome(expect))
        }
        Step::Close { file } => {
            let f = files
                .remove(file)
                .with_context(|| format!("no open handle `{file}`"))?;
            f.close();
            (format!("close {file}"), Outcome::ok("closed"), Expect::Check(Ok(())))
        }
        Step::Sleep { ms } => {
            thread::sleep(Duration::from_millis(*ms));
            (format!("sleep {ms}"), Outcome::ok("slept"), Expect::Check(Ok(())))
        }
        Step::Lsmod { loaded } => {
            let names: Vec<&str> = loader.lsmod().iter().map(|m| m.name).collect();
            let check = if names == *loaded {
                Ok(())
            } else {
                Err(format!("expected {loaded:?}"))
            };
            (
                "lsmod".into(),
                Outcome::ok(format!("{names:?}")),
                Expect::Check(check),
            )
        }
        Step::Dmesg { contains } => {
            let check = if host.dmesg().contains(contains) {
                Ok(())
            } else {
                Err("no matching record".into())
            };
            (
                format!("dmesg {contains:?}"),
                Outcome::ok("checked"),
                Expect::Check(check),
            )
        }
    })
}
