//! Command-line interface definitions for lkmctl.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Load example kernel modules into an in-memory host.
#[derive(Parser)]
#[command(name = "lkmctl", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to `lkm.toml` in the current directory, if present).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Print log records to stderr as they are produced.
    #[arg(long, global = true)]
    pub echo: bool,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// List the modules in the catalogue.
    List,
    /// Show a module's metadata and parameters.
    Modinfo {
        /// Module name.
        module: String,
    },
    /// Load a module, use its device files, unload it, print the log.
    Demo(DemoArgs),
    /// Run a scripted session from a TOML file.
    Script {
        /// Script path.
        path: PathBuf,
    },
}

/// Arguments for the `demo` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct DemoArgs {
    /// Module name.
    pub module: String,

    /// Module parameter as `name=value`; may be repeated.
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Make the N-th resource acquisition fail (1-indexed).
    #[arg(long, value_name = "N")]
    pub fail_step: Option<usize>,

    /// Number of opens of each device file.
    #[arg(long, default_value_t = 1)]
    pub reads: usize,

    /// Milliseconds to wait between load and unload.
    #[arg(long, default_value_t = 0)]
    pub sleep_ms: u64,
}
