//! Broadcast stdin to a pool of companion processes
//!
//! Launches `--count` companions (the `pipelink-host` binary next to this
//! one unless `--companion` says otherwise), then sends every line read
//! from stdin to all of them and reports how many accepted it.

use std::path::{Path, PathBuf};

use clap::Parser;
use pipelink::common::{config::Config, logging, Error, Result};
use pipelink::pipe::{self, PipeInstance, PipeManager, PipeOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pipelink-broadcast", about = "Broadcast stdin lines to companion processes")]
#[command(version, long_about = None)]
struct Cli {
    /// Number of companions to launch
    #[arg(long, default_value_t = 2)]
    count: usize,

    /// Pipe name prefix; companion N listens on <name>-N
    #[arg(long, default_value = "pipelink")]
    name: String,

    /// Companion executable (default: pipelink-host next to this binary)
    #[arg(long)]
    companion: Option<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the echo of each companion after a broadcast
    #[arg(long)]
    show_replies: bool,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let options = PipeOptions::from_config(&config);
    let companion = match &cli.companion {
        Some(path) => path.clone(),
        None => default_companion()?,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut manager = PipeManager::new();
    let result = launch(&cli, &companion, &options, &config, &mut manager, &cancel).await;
    let result = match result {
        Ok(()) => pump(cli.show_replies, &config, &manager, &cancel).await,
        Err(e) => Err(e),
    };
    manager.dispose().await;
    result
}

/// Start `--count` companions and register them
async fn launch(
    cli: &Cli,
    companion: &Path,
    options: &PipeOptions,
    config: &Config,
    manager: &mut PipeManager,
    cancel: &CancellationToken,
) -> Result<()> {
    for index in 0..cli.count {
        let instance = PipeInstance::new(format!("{}-{}", cli.name, index), options.clone())?
            .with_client(companion, Vec::new());
        let instance = pipe::shared(instance);
        manager
            .add(instance.clone(), true, config.timeouts.connect(), cancel)
            .await?;
        if !instance.lock().await.is_initialized() {
            return Err(Error::Internal(format!(
                "companion {} could not be launched",
                companion.display()
            )));
        }
    }
    tracing::info!(count = cli.count, "All companions connected");
    Ok(())
}

/// Broadcast stdin lines until EOF or Ctrl+C
async fn pump(
    show_replies: bool,
    config: &Config,
    manager: &PipeManager,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.is_empty() {
            continue;
        }

        let delivered = manager
            .broadcast(&line, config.timeouts.send(), cancel)
            .await;
        println!("delivered to {delivered}/{}", manager.len());

        if show_replies {
            for instance in manager.instances() {
                let mut pipe = instance.lock().await;
                match pipe.receive(config.timeouts.receive(), cancel).await {
                    Ok(reply) => println!("  {}: {}", pipe.name(), reply),
                    Err(e) => println!("  {}: <{}>", pipe.name(), e),
                }
            }
        }
    }

    Ok(())
}

/// The host binary installed next to this one
fn default_companion() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::Internal(format!("Failed to get current executable path: {}", e)))?;
    let dir = exe
        .parent()
        .ok_or_else(|| Error::Internal("executable has no parent directory".to_string()))?;
    Ok(dir.join(format!("pipelink-host{}", std::env::consts::EXE_SUFFIX)))
}
