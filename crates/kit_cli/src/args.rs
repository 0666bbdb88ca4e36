//! Command-line parsing.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;

/// Options accepted before the subcommand.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub log_level: Option<String>,
    pub command: Option<String>,
    pub rest: Vec<String>,
}

/// Flags shared by `run` and `capture`, plus the program to execute.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChildArgs {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub program: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    pub child: ChildArgs,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CaptureArgs {
    pub child: ChildArgs,
    pub input: Option<String>,
    pub timeout_ms: Option<u64>,
    pub json: bool,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}

pub fn parse_global(args: Vec<String>) -> Result<GlobalArgs> {
    let mut parsed = GlobalArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(value(&args, i, "--config")?));
                i += 2;
            }
            "--log-level" => {
                let level = value(&args, i, "--log-level")?;
                kit_log::parse_level(level)?;
                parsed.log_level = Some(level.to_ascii_lowercase());
                i += 2;
            }
            flag if flag.starts_with('-') => bail!("Unknown flag: {}", flag),
            _ => {
                parsed.command = Some(args[i].clone());
                parsed.rest = args[i + 1..].to_vec();
                break;
            }
        }
    }
    Ok(parsed)
}

/// Parse one flag shared by child-running commands. Returns how many
/// arguments it consumed, or `None` if `args[i]` is not such a flag.
fn parse_child_flag(child: &mut ChildArgs, args: &[String], i: usize) -> Result<Option<usize>> {
    match args[i].as_str() {
        "--cwd" => {
            child.cwd = Some(PathBuf::from(value(args, i, "--cwd")?));
            Ok(Some(2))
        }
        "--env" | "-e" => {
            let pair = value(args, i, "--env")?;
            let (key, val) = pair
                .split_once('=')
                .with_context(|| format!("--env expects KEY=VALUE, got '{pair}'"))?;
            if key.is_empty() {
                bail!("--env expects KEY=VALUE, got '{pair}'");
            }
            child.env.push((key.to_string(), val.to_string()));
            Ok(Some(2))
        }
        "--" => {
            child.program = args[i + 1..].to_vec();
            Ok(Some(args.len() - i))
        }
        flag if !flag.starts_with('-') => {
            child.program = args[i..].to_vec();
            Ok(Some(args.len() - i))
        }
        _ => Ok(None),
    }
}

pub fn parse_run(args: &[String]) -> Result<RunArgs> {
    let mut parsed = RunArgs::default();
    let mut i = 0;
    while i < args.len() {
        if let Some(used) = parse_child_flag(&mut parsed.child, args, i)? {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let path = || value(args, i, flag).map(PathBuf::from);
        match flag {
            "--stdin" => parsed.stdin = Some(path()?),
            "--stdout" => parsed.stdout = Some(path()?),
            "--stderr" => parsed.stderr = Some(path()?),
            _ => bail!("Unknown flag: {}", flag),
        }
        i += 2;
    }
    if parsed.child.program.is_empty() {
        bail!("Usage: kit run [options] -- <program> [args...]");
    }
    Ok(parsed)
}

pub fn parse_capture(args: &[String]) -> Result<CaptureArgs> {
    let mut parsed = CaptureArgs::default();
    let mut i = 0;
    while i < args.len() {
        if let Some(used) = parse_child_flag(&mut parsed.child, args, i)? {
            i += used;
            continue;
        }
        match args[i].as_str() {
            "--input" => {
                parsed.input = Some(value(args, i, "--input")?.to_string());
                i += 2;
            }
            "--timeout-ms" => {
                let raw = value(args, i, "--timeout-ms")?;
                let ms = raw
                    .parse::<u64>()
                    .with_context(|| format!("Invalid --timeout-ms value '{raw}'"))?;
                parsed.timeout_ms = Some(ms);
                i += 2;
            }
            "--json" => {
                parsed.json = true;
                i += 1;
            }
            flag => bail!("Unknown flag: {}", flag),
        }
    }
    if parsed.child.program.is_empty() {
        bail!("Usage: kit capture [options] -- <program> [args...]");
    }
    Ok(parsed)
}
