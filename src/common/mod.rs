//! Common utilities shared between the server side and the host

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
