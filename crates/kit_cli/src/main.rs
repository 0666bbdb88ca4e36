use anyhow::{Context, Result};
use kit_process::{Command, EnvEntry, RunOptions, SpawnOptions};
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::time::Duration;
use std::{env, process};

mod args;
mod capture;
mod config;

use args::{ChildArgs, GlobalArgs};
use capture::CaptureSettings;
use config::{KitConfig, RunConfig};

fn usage() {
    eprintln!("kit [--config <file>] [--log-level <level>] <run|capture|nproc|help> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run [options] -- <program> [args...]      Run a program to completion");
    eprintln!("  capture [options] -- <program> [args...]  Run with piped streams and collect output");
    eprintln!("  nproc                                     Print the number of processors");
    eprintln!();
    eprintln!("Shared options:");
    eprintln!("  --cwd <dir>         Working directory for the child");
    eprintln!("  -e, --env K=V       Add a variable to the child environment (repeatable)");
    eprintln!();
    eprintln!("Run options:");
    eprintln!("  --stdin <file>      Read stdin from file");
    eprintln!("  --stdout <file>     Write stdout to file (truncated)");
    eprintln!("  --stderr <file>     Write stderr to file (truncated)");
    eprintln!();
    eprintln!("Capture options:");
    eprintln!("  --input <text>      Text written to the child's stdin");
    eprintln!("  --timeout-ms <n>    Kill the child after n milliseconds");
    eprintln!("  --json              Print a JSON summary instead of the raw output");
    eprintln!();
    eprintln!("Configuration is read from kit.toml in the current directory when present.");
    eprintln!("KIT_LOG overrides the log filter.");
}

/// Child environment: the inherited environment plus `extra`, or `None`
/// (plain inheritance) when there is nothing to add.
fn child_env(config: &RunConfig, child: &ChildArgs) -> Option<Vec<EnvEntry>> {
    if config.env.is_empty() && child.env.is_empty() {
        return None;
    }
    let mut vars: Vec<(OsString, OsString)> = env::vars_os().collect();
    let extra = config
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(child.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    for (key, value) in extra {
        vars.retain(|(k, _)| k.as_os_str() != OsStr::new(key));
        vars.push((key.into(), value.into()));
    }
    Some(vars.into_iter().map(|(k, v)| EnvEntry::new(k, v)).collect())
}

fn cmd_run(config: &KitConfig, rest: &[String]) -> Result<i32> {
    let parsed = args::parse_run(rest)?;
    let run = &config.run;

    let mut options = RunOptions::new().reset(run.reset);
    options.working_dir = parsed.child.cwd.clone().or_else(|| run.working_dir.clone());
    options.env = child_env(run, &parsed.child);
    options.stdin_path = parsed.stdin.or_else(|| run.stdin.clone());
    options.stdout_path = parsed.stdout.or_else(|| run.stdout.clone());
    options.stderr_path = parsed.stderr.or_else(|| run.stderr.clone());

    let mut command = Command::from_args(&parsed.child.program);
    let display = command.to_string();
    let code = command
        .run(&options)
        .with_context(|| format!("Failed to run {}", display))?;
    Ok(code)
}

fn cmd_capture(config: &KitConfig, rest: &[String]) -> Result<i32> {
    let parsed = args::parse_capture(rest)?;

    let mut options = SpawnOptions::new();
    options.working_dir = parsed
        .child
        .cwd
        .clone()
        .or_else(|| config.run.working_dir.clone());
    options.env = child_env(&config.run, &parsed.child);

    let settings = CaptureSettings {
        poll_interval_ms: config.capture.poll_interval_ms,
        timeout: parsed
            .timeout_ms
            .or(config.capture.timeout_ms)
            .map(Duration::from_millis),
    };
    let output = capture::capture(
        &parsed.child.program,
        &options,
        parsed.input.as_deref().map(str::as_bytes),
        settings,
    )?;

    if parsed.json {
        let json = serde_json::to_string_pretty(&output.report())?;
        println!("{}", json);
    } else {
        std::io::stdout().write_all(&output.stdout)?;
        std::io::stderr().write_all(&output.stderr)?;
    }
    if output.timed_out {
        eprintln!("kit: {} timed out", parsed.child.program[0]);
    }
    Ok(output.exit_code)
}

fn init_logging(global: &GlobalArgs, config: &KitConfig) -> Result<()> {
    let mut log = config.log.clone();
    if let Some(level) = &global.log_level {
        log.filter = level.clone();
    }
    kit_log::init(&log.with_env_override()).context("Failed to initialize logging")
}

fn dispatch(global: GlobalArgs) -> Result<i32> {
    let Some(cmd) = global.command.as_deref() else {
        usage();
        return Ok(0);
    };
    if cmd == "help" || cmd == "--help" {
        usage();
        return Ok(0);
    }

    let cwd = env::current_dir().context("Failed to read current directory")?;
    let config = KitConfig::load(global.config.as_deref(), &cwd)?;
    init_logging(&global, &config)?;

    let result = match cmd {
        "run" => cmd_run(&config, &global.rest),
        "capture" => cmd_capture(&config, &global.rest),
        "nproc" => {
            println!("{}", kit_process::nprocessors());
            Ok(0)
        }
        _ => {
            usage();
            Ok(2)
        }
    };
    kit_log::shutdown();
    result
}

fn main() -> Result<()> {
    let global = args::parse_global(env::args().skip(1).collect())?;
    let code = dispatch(global)?;
    process::exit(code);
}
