//! Cross-platform IPC transport layer
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. A pipe is identified by a plain name; see
//! [`paths::os_pipe_name`] for how it maps onto the OS.

use std::io;

use crate::common::paths;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

/// Re-export the platform types for use in other modules
pub use platform::{Listener, Stream};

/// Most listeners that can serve one pipe name at the same time
///
/// A Unix socket path binds exactly one listener; Windows allows several
/// server instances of the same named pipe.
#[cfg(unix)]
pub const MAX_LISTENERS_PER_NAME: usize = 1;

#[cfg(windows)]
pub const MAX_LISTENERS_PER_NAME: usize = 254;

/// Create a listener for incoming connections on pipe `name`
///
/// Must be called from within a Tokio runtime.
pub fn create_listener(name: &str) -> io::Result<Listener> {
    // Ensure socket directory exists (Unix) and clean up stale socket
    paths::ensure_socket_dir()?;
    paths::remove_socket(name)?;

    let os_name = paths::os_pipe_name(name);

    #[cfg(unix)]
    let listener = {
        let os_name = os_name.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(os_name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let os_name = os_name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(os_name).create_tokio()?
    };

    // Set socket permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = paths::pipe_path(name);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Make one connection attempt to pipe `name`
pub async fn connect(name: &str) -> io::Result<Stream> {
    let os_name = paths::os_pipe_name(name);

    #[cfg(unix)]
    let stream = {
        let os_name = os_name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(os_name).await?
    };

    #[cfg(windows)]
    let stream = {
        let os_name = os_name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(os_name).await?
    };

    Ok(stream)
}

/// Whether a failed connection attempt means "no server listening yet"
pub fn is_not_ready(e: &io::Error) -> bool {
    // ERROR_PIPE_BUSY: every server instance is taken, retry later
    const ERROR_PIPE_BUSY: i32 = 231;

    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    ) || (cfg!(windows) && e.raw_os_error() == Some(ERROR_PIPE_BUSY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_kinds() {
        assert!(is_not_ready(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_not_ready(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
        assert!(!is_not_ready(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
