//! Client-side host loop
//!
//! The host is the process a [`PipeInstance`](crate::pipe::PipeInstance)
//! launches as its companion. It connects to the named pipe and then hands
//! the live channel to a [`HostHandler`] over and over:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (dispatch -> idle delay)*
//!              -> Disconnected | Cancelled
//! ```

mod args;
mod handler;

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::ipc::{helpers, Channel};

pub use args::parse_pipe_name;
pub use handler::{EchoHandler, HostHandler};

/// Runtime options for the host loop
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// How long to wait for the server side to accept us
    pub connect_timeout: Duration,
    /// Read timeout handed to handlers that read
    pub receive_timeout: Duration,
    /// Pause between two handler invocations
    pub idle_delay: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl HostOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.timeouts.connect(),
            receive_timeout: config.timeouts.receive(),
            idle_delay: Duration::from_millis(config.host.idle_delay_ms),
        }
    }
}

/// Where the host loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Disconnected,
    Connecting,
    Connected,
    Cancelled,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Disconnected => write!(f, "disconnected"),
            HostState::Connecting => write!(f, "connecting"),
            HostState::Connected => write!(f, "connected"),
            HostState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Connect to `pipe_name` and run `handler` until disconnect or cancel
///
/// Failing to connect is fatal. Cancellation is a clean exit.
pub async fn run<H>(
    pipe_name: &str,
    handler: &mut H,
    options: &HostOptions,
    cancel: &CancellationToken,
) -> Result<HostState>
where
    H: HostHandler,
{
    tracing::info!(pipe = pipe_name, state = %HostState::Connecting, "Connecting to server");

    let mut channel = match helpers::connect(pipe_name, options.connect_timeout, cancel).await {
        Ok(channel) => channel,
        Err(Error::Cancelled) => {
            tracing::info!(pipe = pipe_name, "Cancelled before connecting");
            return Ok(HostState::Cancelled);
        }
        Err(e) => return Err(e),
    };
    tracing::info!(pipe = pipe_name, state = %HostState::Connected, "Connected to server");

    let state = serve(pipe_name, &mut channel, handler, options, cancel).await;
    channel.close().await;

    tracing::info!(pipe = pipe_name, state = %state, "Host loop finished");
    Ok(state)
}

/// Drive `handler` over an already connected channel
///
/// Returns the state the loop ended in.
pub async fn serve<S, H>(
    pipe_name: &str,
    channel: &mut Channel<S>,
    handler: &mut H,
    options: &HostOptions,
    cancel: &CancellationToken,
) -> HostState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: HostHandler<S>,
{
    loop {
        if cancel.is_cancelled() {
            return HostState::Cancelled;
        }
        if !channel.is_connected() {
            return HostState::Disconnected;
        }

        match handler.on_iteration(pipe_name, channel, cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) if cancel.is_cancelled() => return HostState::Cancelled,
            Err(e) if e.stops_host_loop() => {
                tracing::warn!(pipe = pipe_name, "Handler stopped the host loop: {}", e);
                return HostState::Disconnected;
            }
            Err(e) => {
                tracing::error!(pipe = pipe_name, "Handler failed: {}", e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return HostState::Cancelled,
            _ = tokio::time::sleep(options.idle_delay) => {}
        }
    }
}
