//! lkmctl: load the example modules into an in-memory host.
//!
//! `list` and `modinfo` describe the catalogue, `demo` runs one
//! load/use/unload cycle and prints the journal and log, and `script` runs
//! a TOML session with per-step expectations.

mod cli;
mod config;
mod demo;
mod script;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lkm_driver_api::ModuleParams;
use serde::Serialize;

use crate::cli::{Cli, Command};
use crate::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::List => cmd_list(cli.json),
        Command::Modinfo { ref module } => cmd_modinfo(module, cli.json),
        Command::Demo(ref args) => {
            let report = demo::run(&config, args, cli.echo)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            if let Some(e) = report.load_error {
                bail!("insmod {} failed: {e}", report.module);
            }
            Ok(())
        }
        Command::Script { ref path } => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let script = script::Script::parse(&text)
                .with_context(|| format!("in {}", path.display()))?;
            let report = script.run(config.host_config(cli.echo)?)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            match report.failures() {
                0 => Ok(()),
                n => bail!("{n} step(s) did not meet their expectation"),
            }
        }
    }
}

#[derive(Serialize)]
struct ModuleSummary {
    name: &'static str,
    description: &'static str,
    author: &'static str,
    license: &'static str,
}

fn cmd_list(json: bool) -> Result<()> {
    let modules: Vec<_> = lkm_modules::infos()
        .map(|i| ModuleSummary {
            name: i.name,
            description: i.description,
            author: i.author,
            license: i.license,
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
    } else {
        for m in &modules {
            println!("{:<16} {}", m.name, m.description);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ParamSummary {
    name: &'static str,
    kind: String,
    default: String,
    perm: String,
    description: &'static str,
}

fn cmd_modinfo(name: &str, json: bool) -> Result<()> {
    let entry = lkm_modules::find(name).with_context(|| format!("no module named `{name}`"))?;
    let params = ModuleParams::new((entry.params)());
    let summaries: Vec<_> = params
        .iter()
        .map(|(decl, value)| ParamSummary {
            name: decl.name,
            kind: decl.kind().to_string(),
            default: value.to_string(),
            perm: format!("{:#o}", decl.perm.bits()),
            description: decl.description,
        })
        .collect();

    if json {
        #[derive(Serialize)]
        struct Modinfo<'a> {
            name: &'static str,
            description: &'static str,
            author: &'static str,
            license: &'static str,
            params: &'a [ParamSummary],
        }
        let info = entry.info;
        let out = Modinfo {
            name: info.name,
            description: info.description,
            author: info.author,
            license: info.license,
            params: &summaries,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let info = entry.info;
    println!("name:        {}", info.name);
    println!("description: {}", info.description);
    println!("author:      {}", info.author);
    println!("license:     {}", info.license);
    for p in &summaries {
        println!(
            "parm:        {}:{} ({}, default {}, perm {})",
            p.name, p.description, p.kind, p.default, p.perm
        );
    }
    Ok(())
}
