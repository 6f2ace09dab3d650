//! Server side: pipe instances and the manager that fans out to them

mod instance;
mod manager;

pub use instance::{PipeInstance, PipeOptions};
pub use manager::{shared, PipeManager, SharedInstance};
