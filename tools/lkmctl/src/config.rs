//! `lkm.toml` loading.
//!
//! Every section is optional; a missing file yields the defaults.
//!
//! ```toml
//! [log]
//! level = "info"      # lowest severity kept in printed output
//! echo = false        # mirror records to stderr as they are logged
//!
//! [dmesg]
//! capacity = 1024
//!
//! [faults]
//! fail_step = 3
//! reason = "denied"
//! fail_labels = ["chardev"]
//! fail_releases = []
//! deny_spawn = false
//! fault_copies = ["/dev/chardev"]
//!
//! [modules.params]
//! args = "short_param=3 array_param=13,14"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use lkm_core::log::LogLevel;
use lkm_driver_api::AcquireError;
use lkm_host::{FaultPlan, HostConfig};
use serde::Deserialize;

/// File looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG: &str = "lkm.toml";

/// Parsed configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `[log]`.
    pub log: LogSection,
    /// `[dmesg]`.
    pub dmesg: DmesgSection,
    /// `[faults]`.
    pub faults: FaultSection,
    /// `[modules.<name>]`.
    pub modules: BTreeMap<String, ModuleSection>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Level name, see [`LogLevel::parse`].
    pub level: String,
    /// Echo records to stderr.
    pub echo: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            echo: false,
        }
    }
}

/// `[dmesg]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DmesgSection {
    /// Records kept in the ring.
    pub capacity: usize,
}

impl Default for DmesgSection {
    fn default() -> Self {
        Self {
            capacity: HostConfig::default().dmesg_capacity,
        }
    }
}

/// `[faults]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultSection {
    /// Acquisition number to fail, 1-indexed.
    pub fail_step: Option<usize>,
    /// Reason reported by injected acquisition failures.
    pub reason: String,
    /// Labels whose acquisition always fails.
    pub fail_labels: Vec<String>,
    /// Labels whose release fails.
    pub fail_releases: Vec<String>,
    /// Refuse thread spawns.
    pub deny_spawn: bool,
    /// Paths whose user copies fault.
    pub fault_copies: Vec<String>,
}

impl Default for FaultSection {
    fn default() -> Self {
        Self {
            fail_step: None,
            reason: "denied".into(),
            fail_labels: Vec::new(),
            fail_releases: Vec::new(),
            deny_spawn: false,
            fault_copies: Vec::new(),
        }
    }
}

/// `[modules.<name>]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleSection {
    /// Default argument string passed to `insmod`.
    pub args: String,
}

impl Config {
    /// Loads `path`, or `lkm.toml` from the current directory when `path`
    /// is `None` and that file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
            None => return Ok(Self::default()),
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.level()?;
        Ok(config)
    }

    /// Parses configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The `[log]` level.
    pub fn level(&self) -> Result<LogLevel> {
        LogLevel::parse(&self.log.level)
            .with_context(|| format!("unknown log level `{}`", self.log.level))
    }

    /// Builds the host settings, with `echo` forcing stderr output on.
    pub fn host_config(&self, echo: bool) -> Result<HostConfig> {
        let level = self.level()?;
        Ok(HostConfig {
            dmesg_capacity: self.dmesg.capacity,
            echo: (echo || self.log.echo).then_some(level),
            faults: self.fault_plan()?,
        })
    }

    /// Builds the fault plan from `[faults]`.
    pub fn fault_plan(&self) -> Result<FaultPlan> {
        let f = &self.faults;
        let reason = parse_reason(&f.reason)?;
        let mut plan = FaultPlan::none();
        if let Some(n) = f.fail_step {
            plan = plan.fail_acquire_at(n, reason);
        }
        for label in &f.fail_labels {
            plan = plan.fail_acquire_of(label, reason);
        }
        for label in &f.fail_releases {
            plan = plan.fail_release_of(label);
        }
        for path in &f.fault_copies {
            plan = plan.fault_copies_on(path);
        }
        if f.deny_spawn {
            plan = plan.deny_spawns();
        }
        Ok(plan)
    }

    /// Configured default arguments for `module`.
    pub fn module_args(&self, module: &str) -> &str {
        self.modules.get(module).map_or("", |m| m.args.as_str())
    }
}

/// Parses an acquisition failure reason (`denied`, `collision`, …).
pub fn parse_reason(name: &str) -> Result<AcquireError> {
    Ok(match name {
        "denied" => AcquireError::Denied,
        "collision" | "name-collision" => AcquireError::NameCollision,
        "unsupported" => AcquireError::Unsupported,
        "oom" | "out-of-memory" => AcquireError::OutOfMemory,
        "unresolved" => AcquireError::Unresolved,
        other => bail!("unknown failure reason `{other}`"),
    })
}
