//! pipelink host - companion process for a pipelink server
//!
//! Connects to the pipe named on the command line and echoes every line
//! it receives until the server hangs up or the process is asked to stop.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pipelink::common::{config::Config, logging, Result};
use pipelink::host::{self, EchoHandler, HostOptions};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pipelink-host", about = "Companion process for a pipelink server")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prefix of the pipe name argument (default: /pipeName)
    #[arg(long)]
    prefix: Option<String>,

    /// Override connect and receive timeouts, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pipe name argument, e.g. /pipeName:worker-1
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    logging::init_host();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Fatal panic: {}", info);
    }));

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(code = e.exit_code(), "Host failed: {}", e);
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let prefix = cli
        .prefix
        .unwrap_or_else(|| config.host.argument_prefix.clone());
    let pipe_name = host::parse_pipe_name(&cli.args, &prefix)?;

    let mut options = HostOptions::from_config(&config);
    if let Some(ms) = cli.timeout_ms {
        options.connect_timeout = Duration::from_millis(ms);
        options.receive_timeout = Duration::from_millis(ms);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let mut handler = EchoHandler::new(options.receive_timeout);
    let state = host::run(&pipe_name, &mut handler, &options, &cancel).await?;
    tracing::info!(%state, echoed = handler.echoed(), "Host exiting");
    Ok(())
}

/// Cancel the host loop on Ctrl+C (and SIGTERM on Unix)
#[cfg(unix)]
async fn shutdown_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to create SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn shutdown_on_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, shutting down gracefully");
        cancel.cancel();
    }
}
