//! pipelink - named-pipe IPC between a server and companion processes
//!
//! The server side owns [`pipe::PipeInstance`]s, each of which can launch
//! a companion process and exchange newline-delimited JSON with it under
//! timeouts. A [`pipe::PipeManager`] fans messages out to many instances.
//! The companion side runs the [`host`] loop.

pub mod common;
pub mod host;
pub mod ipc;
pub mod pipe;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use ipc::{Channel, Envelope, Message};
pub use pipe::{PipeInstance, PipeManager, PipeOptions};
