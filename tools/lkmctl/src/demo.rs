//! `lkmctl demo`: one load/use/unload cycle of a catalogue module.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use lkm_host::{LogRecord, ModuleLoader, SimHost};
use serde::Serialize;

use crate::cli::DemoArgs;
use crate::config::Config;

/// Bytes requested per read.
const READ_CHUNK: usize = 256;
/// Upper bound on reads of one opened file.
const MAX_READS: usize = 16;
/// Text written to writable proc entries before reading them back.
const PROC_PAYLOAD: &[u8] = b"hello from lkmctl\n";

/// A log record in output form.
#[derive(Debug, Serialize)]
pub struct Record {
    /// Sequence number.
    pub seq: u64,
    /// Level tag, e.g. `INFO`.
    pub level: String,
    /// Message text.
    pub message: String,
}

impl From<&LogRecord> for Record {
    fn from(r: &LogRecord) -> Self {
        Self {
            seq: r.seq,
            level: r.level.to_string(),
            message: r.message.clone(),
        }
    }
}

/// What a demo run did.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Module name.
    pub module: String,
    /// Argument string given to `insmod`.
    pub args: String,
    /// `insmod` error, if it failed.
    pub load_error: Option<String>,
    /// Data read from each device file, in open order.
    pub reads: Vec<FileRead>,
    /// Host journal, one line per event.
    pub events: Vec<String>,
    /// Log records at or above the configured level.
    pub dmesg: Vec<Record>,
}

/// Result of one open/read/close of a device file.
#[derive(Debug, Serialize)]
pub struct FileRead {
    /// Path opened.
    pub path: String,
    /// Data read, lossily decoded.
    pub data: Option<String>,
    /// Error reported by open or read.
    pub error: Option<String>,
}

/// Runs one demo cycle.
pub fn run(config: &Config, args: &DemoArgs, echo: bool) -> Result<DemoReport> {
    let entry = lkm_modules::find(&args.module)
        .with_context(|| format!("no module named `{}`", args.module))?;

    let mut host_config = config.host_config(echo)?;
    if let Some(n) = args.fail_step {
        let reason = crate::config::parse_reason(&config.faults.reason)?;
        host_config.faults = host_config.faults.fail_acquire_at(n, reason);
    }
    let host = SimHost::with_config(host_config);
    let loader = ModuleLoader::new(Arc::clone(&host));

    let mut insmod_args = config.module_args(&args.module).to_owned();
    for param in &args.params {
        if !insmod_args.is_empty() {
            insmod_args.push(' ');
        }
        insmod_args.push_str(param);
    }

    let mut report = DemoReport {
        module: args.module.clone(),
        args: insmod_args.clone(),
        load_error: None,
        reads: Vec::new(),
        events: Vec::new(),
        dmesg: Vec::new(),
    };

    match loader.insmod(entry, &insmod_args) {
        Ok(()) => {
            if args.sleep_ms > 0 {
                thread::sleep(Duration::from_millis(args.sleep_ms));
            }
            for _ in 0..args.reads {
                report.reads.extend(exercise(&host));
            }
            loader.rmmod(&args.module)?;
        }
        Err(e) => report.load_error = Some(e.to_string()),
    }

    let level = config.level()?;
    report.events = host.journal().iter().map(ToString::to_string).collect();
    report.dmesg = host
        .dmesg()
        .records()
        .iter()
        .filter(|r| r.level <= level)
        .map(Record::from)
        .collect();
    Ok(report)
}

/// Opens, reads and closes every device node and proc entry the host has.
/// Proc entries are written first.
fn exercise(host: &Arc<SimHost>) -> Vec<FileRead> {
    let mut paths: Vec<(String, bool)> = host
        .dev_nodes()
        .into_iter()
        .map(|n| (format!("/dev/{}", n.name), false))
        .collect();
    paths.extend(
        host.proc_entries()
            .into_iter()
            .map(|(name, mode)| (format!("/proc/{name}"), mode & 0o200 != 0)),
    );

    paths
        .into_iter()
        .map(|(path, writable)| {
            let outcome = host.open(&path).and_then(|mut file| {
                if writable {
                    file.write(PROC_PAYLOAD)?;
                    file.close();
                    file = host.open(&path)?;
                }
                file.read_to_end(READ_CHUNK, MAX_READS)
            });
            match outcome {
                Ok(data) => FileRead {
                    path,
                    data: Some(String::from_utf8_lossy(&data).into_owned()),
                    error: None,
                },
                Err(e) => FileRead {
                    path,
                    data: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect()
}

impl DemoReport {
    /// Renders the report as plain text.
    pub fn render(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "module: {}", self.module);
        if !self.args.is_empty() {
            let _ = writeln!(out, "args:   {}", self.args);
        }
        if let Some(e) = &self.load_error {
            let _ = writeln!(out, "insmod failed: {e}");
        }
        for read in &self.reads {
            match (&read.data, &read.error) {
                (Some(data), _) => {
                    let _ = writeln!(out, "{}: {:?}", read.path, data);
                }
                (None, Some(e)) => {
                    let _ = writeln!(out, "{}: error: {e}", read.path);
                }
                (None, None) => {}
            }
        }
        let _ = writeln!(out, "\n-- journal --");
        for event in &self.events {
            let _ = writeln!(out, "{event}");
        }
        let _ = writeln!(out, "\n-- dmesg --");
        for r in &self.dmesg {
            let _ = writeln!(out, "[{:>6}] {:<5} {}", r.seq, r.level, r.message);
        }
        out
    }
}
