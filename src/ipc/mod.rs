//! IPC building blocks
//!
//! Uses Unix domain sockets on Unix/macOS and named pipes on Windows
//! via the interprocess crate. Messages are newline-delimited JSON.

pub mod channel;
pub mod deadline;
pub mod helpers;
pub mod protocol;
pub mod transport;

pub use channel::Channel;
pub use deadline::bounded;
pub use helpers::{connect, create_server, receive_json, request_response, send_json, validate};
pub use protocol::{Envelope, Message};
