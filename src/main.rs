use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use source_inspector::trace::{OptReferenceParser, TraceDocument};
use source_inspector::{protocol, trace_session, InspectorConfig};

#[derive(Debug, Parser)]
#[command(name = "source-inspector", version, about)]
struct Args {
    /// Script to trace. Frames from other files are skipped.
    script: PathBuf,

    /// Debugger port of the target.
    #[arg(short, long, env = "SOURCE_INSPECTOR_PORT")]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    /// TOML file with session settings; flags take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the trace here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start the target first, e.g. "node --debug-brk=5858 app.js".
    #[arg(long)]
    launch: Option<String>,

    /// Stop stepping after this many records.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Seconds to wait for any single response (0 waits forever).
    #[arg(long)]
    timeout: Option<u64>,
}

fn build_config(args: &Args) -> anyhow::Result<InspectorConfig> {
    let mut config = match &args.config {
        Some(path) => InspectorConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => InspectorConfig::default(),
    };

    let filename = args
        .script
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", args.script.display()))?;
    config.target_filename = filename.to_string();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if args.max_steps.is_some() {
        config.max_steps = args.max_steps;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    config.validate()?;
    Ok(config)
}

fn launch_target(command_line: &str) -> anyhow::Result<Child> {
    let Some(words) = shlex::split(command_line) else {
        bail!("cannot parse launch command `{command_line}`");
    };
    let Some((program, rest)) = words.split_first() else {
        bail!("launch command is empty");
    };
    let child = Command::new(program)
        .args(rest)
        .spawn()
        .with_context(|| format!("spawning `{program}`"))?;
    info!(pid = child.id(), %program, "launched target");
    Ok(child)
}

fn write_document(document: &TraceDocument, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "trace written");
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // stdout carries the trace, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let mut child = match &args.launch {
        Some(command_line) => Some(launch_target(command_line)?),
        None => None,
    };

    let debugger = match protocol::attach(&config) {
        Ok(debugger) => debugger,
        Err(e) => {
            if let Some(child) = child.as_mut() {
                let _ = child.kill();
            }
            return Err(e)
                .with_context(|| format!("attaching to {}:{}", config.host, config.port));
        }
    };
    let traces = trace_session(debugger, OptReferenceParser, &config);

    let code = fs::read_to_string(&args.script).unwrap_or_else(|e| {
        warn!(script = %args.script.display(), error = %e, "source not readable; `code` left empty");
        String::new()
    });
    write_document(&TraceDocument { code, trace: traces }, args.output.as_deref())?;

    if let Some(child) = child.as_mut() {
        let status = child.wait().context("waiting for the target")?;
        info!(%status, "target exited");
    }
    Ok(())
}
