use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wfw::bridge::Bridge;
use wfw::config::Config;
use wfw::daemon;

#[derive(Parser)]
#[command(name = "wfw")]
#[command(about = "User-space Ethernet bridge over UDP broadcast", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "/etc/wfw.cfg")]
    config: PathBuf,
    /// Stay in the foreground instead of detaching
    #[arg(short = 'f', long = "foreground")]
    foreground: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("wfw error: {err:?}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = Config::load(&cli.config)?;
    if !cli.foreground {
        daemon::daemonize(cfg.pidfile.as_deref())?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(async {
        let bridge = Bridge::open(&cfg).await?;
        bridge.run().await
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
