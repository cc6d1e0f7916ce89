// ABOUTME: CLI entry point for the spot SSH honeypot.
// ABOUTME: Runs the server by default; `conf` generates or checks configuration files.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use spot_core::{server, AuditEvent, AuditSink, Config, EventKind, Severity, TracingSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file used when no path is given
const DEFAULT_CONFIG: &str = "config.yml";

#[derive(Parser)]
#[command(name = "spot")]
#[command(about = "A simple SSH honeypot")]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(short = 'd', long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Debug mode
    #[arg(short = 'v', long)]
    debug: bool,

    /// Listen port (keeps the host from the config's addr)
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Config tools
    Conf(ConfArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ConfArgs {
    /// Generate a config template at ./config.yml
    #[arg(short, long)]
    init: bool,

    /// Load a config file and print the runtime config
    #[arg(short, long, value_name = "PATH")]
    check: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let no_args = std::env::args_os().len() <= 1;
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Conf(args)) => run_conf(args),
        None => run_server(cli.config, cli.port, cli.debug, no_args).await,
    }
}

/// Handle `spot conf`
fn run_conf(args: ConfArgs) -> Result<()> {
    if args.init {
        Config::write_template(Path::new(DEFAULT_CONFIG))?;
        println!("config file has generated: ./{DEFAULT_CONFIG}");
        return Ok(());
    }

    if let Some(path) = args.check {
        let config = Config::load(&path)
            .with_context(|| format!("failed to check {}", path.display()))?;
        println!("{}", config.to_json_pretty()?);
    }
    Ok(())
}

/// Load config, install logging, and serve until interrupted
async fn run_server(
    config_path: PathBuf,
    port: Option<u16>,
    debug: bool,
    no_args: bool,
) -> Result<()> {
    check_config_path(&config_path)?;
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    if let Some(port) = port {
        config.override_port(port)?;
    }
    config.log.debug |= debug;

    spot_log::init(&config.log).context("failed to initialize logging")?;

    let sink = Arc::new(TracingSink::new(config.log.separate_port));
    if no_args {
        sink.emit(AuditEvent::system(
            EventKind::SysInit,
            Severity::Info,
            "No args passed, using the default config; run with -h for usage",
        ));
    }
    sink.emit(AuditEvent::system(
        EventKind::SysInit,
        Severity::Debug,
        format!("set config file path to: {}", config_path.display()),
    ));

    server::run(&config, sink).await?;
    Ok(())
}

/// The config file must exist and must not be a directory
fn check_config_path(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("{} does not exist", path.display()))?;
    if metadata.is_dir() {
        bail!("{} is a directory", path.display());
    }
    Ok(())
}
