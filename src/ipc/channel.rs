//! Line-framed duplex channel
//!
//! Wraps any bidirectional byte stream (a local socket, or an in-memory
//! `tokio::io::duplex` pair in tests) and tracks whether the peer is still
//! there. The channel notices a disconnect on EOF, on a broken pipe, or
//! when it is closed locally; from then on every operation fails with
//! [`Error::NotConnected`].

use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};

use crate::common::{Error, Result};

use super::transport::Stream;

/// A connected duplex channel speaking newline-delimited UTF-8
pub struct Channel<S = Stream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    /// Bytes of a line whose read was interrupted by a timeout
    pending: Vec<u8>,
    /// Frames accepted by `write_line` but not yet taken by the writer
    outgoing: Vec<u8>,
    connected: bool,
}

impl<S: AsyncRead + AsyncWrite> Channel<S> {
    /// Wrap a freshly connected stream
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
            outgoing: Vec::new(),
            connected: true,
        }
    }

    /// Whether the peer is (as far as we know) still connected
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Fail with [`Error::NotConnected`] unless connected
    pub fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Write `text` followed by a line terminator, then flush
    ///
    /// Cancel safe: a frame only partly written when the future is dropped
    /// stays queued, and the next write finishes it before its own frame,
    /// so the peer never sees two frames spliced together.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        self.ensure_connected()?;
        if text.contains('\n') {
            return Err(Error::invalid_argument(
                "text",
                "must not contain a line terminator",
            ));
        }

        self.outgoing.extend_from_slice(text.as_bytes());
        self.outgoing.push(b'\n');

        let result = self.drain_outgoing().await;
        if let Err(e) = result {
            if is_disconnect(&e) {
                self.connected = false;
                self.outgoing.clear();
                return Err(Error::NotConnected);
            }
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Write queued bytes, consuming them as the writer accepts them
    async fn drain_outgoing(&mut self) -> io::Result<()> {
        while !self.outgoing.is_empty() {
            let n = self.writer.write(&self.outgoing).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.outgoing.drain(..n);
        }
        self.writer.flush().await
    }

    /// Read one line, without its terminator
    ///
    /// Cancel safe: if the returned future is dropped mid-line, the bytes
    /// read so far are kept and the next call continues the same line.
    /// EOF marks the channel disconnected and yields
    /// [`Error::EmptyPayload`], as does a blank line.
    pub async fn read_line(&mut self) -> Result<String> {
        self.ensure_connected()?;

        let read = self.reader.read_until(b'\n', &mut self.pending).await;
        let n = match read {
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => {
                self.connected = false;
                self.pending.clear();
                return Err(Error::EmptyPayload);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if n == 0 {
            self.connected = false;
            self.pending.clear();
            return Err(Error::EmptyPayload);
        }

        let mut raw = std::mem::take(&mut self.pending);
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        } else {
            // EOF in the middle of a line: deliver what we got, the next
            // read reports the disconnect
            tracing::trace!(bytes = raw.len(), "Peer closed mid-line");
        }

        let line =
            String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if line.is_empty() {
            return Err(Error::EmptyPayload);
        }
        Ok(line)
    }

    /// Shut down the write side and mark the channel disconnected
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let _ = self.writer.shutdown().await;
    }
}

impl<S> std::fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("connected", &self.connected)
            .field("pending", &self.pending.len())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
