//! Host iteration handlers

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::ipc::transport::Stream;
use crate::ipc::{bounded, Channel};

/// Work done by the host on every loop iteration
///
/// Errors that mean the channel is gone ([`Error::stops_host_loop`]) end
/// the loop. Any other error is logged and the loop keeps going.
#[async_trait]
pub trait HostHandler<S = Stream>: Send
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn on_iteration(
        &mut self,
        pipe_name: &str,
        channel: &mut Channel<S>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Writes every received line straight back
///
/// A read that times out means nothing arrived this round and is not an
/// error.
#[derive(Debug)]
pub struct EchoHandler {
    read_timeout: Duration,
    echoed: u64,
}

impl EchoHandler {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            echoed: 0,
        }
    }

    /// Number of lines echoed so far
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

#[async_trait]
impl<S> HostHandler<S> for EchoHandler
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn on_iteration(
        &mut self,
        pipe_name: &str,
        channel: &mut Channel<S>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let line = match bounded(self.read_timeout, cancel, channel.read_line()).await {
            Ok(line) => line,
            Err(Error::Timeout(_)) => return Ok(()),
            // Peer hung up; the loop sees the disconnect
            Err(Error::EmptyPayload) if !channel.is_connected() => return Ok(()),
            Err(e) => return Err(e),
        };

        bounded(self.read_timeout, cancel, channel.write_line(&line)).await?;
        self.echoed += 1;
        tracing::trace!(pipe = pipe_name, bytes = line.len(), "Echoed line");
        Ok(())
    }
}
