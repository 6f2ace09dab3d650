//! Cross-platform pipe and configuration paths
//!
//! Unix/macOS: a pipe named `foo` is a Unix domain socket at
//! `$XDG_RUNTIME_DIR/pipelink/foo.sock` or `/tmp/pipelink-<uid>/foo.sock`
//! Windows: a pipe named `foo` is the named pipe `\\.\pipe\foo`

use std::io;
use std::path::PathBuf;

use super::{Error, Result};

/// Application name used for directories
const APP_NAME: &str = "pipelink";

/// Check that a pipe name can be mapped onto an OS name
pub fn validate_pipe_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_argument("pipe_name", "must not be empty"));
    }
    if name.contains(['/', '\\']) || name.contains('\0') {
        return Err(Error::invalid_argument(
            "pipe_name",
            "must not contain path separators or NUL",
        ));
    }
    Ok(())
}

/// Directory holding the socket files
#[cfg(unix)]
pub fn socket_dir() -> PathBuf {
    // Try XDG_RUNTIME_DIR first (preferred on Linux)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    // Fallback to /tmp with uid for security
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

/// Socket file backing the pipe `name`
#[cfg(unix)]
pub fn pipe_path(name: &str) -> PathBuf {
    socket_dir().join(format!("{name}.sock"))
}

#[cfg(windows)]
pub fn pipe_path(name: &str) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{name}"))
}

/// Get the OS-level name for interprocess
///
/// Unix: the socket file path. Windows: the bare pipe name, the
/// interprocess crate adds the `\\.\pipe\` prefix.
#[cfg(unix)]
pub fn os_pipe_name(name: &str) -> String {
    pipe_path(name).to_string_lossy().into_owned()
}

#[cfg(windows)]
pub fn os_pipe_name(name: &str) -> String {
    name.to_string()
}

/// Ensure the socket directory exists with proper permissions
///
/// On Unix, creates the directory with mode 0700
#[cfg(unix)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let dir = socket_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

#[cfg(windows)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    // Named pipes don't need a directory on Windows
    Ok(PathBuf::new())
}

/// Remove a stale socket file for `name`
#[cfg(unix)]
pub fn remove_socket(name: &str) -> io::Result<()> {
    let path = pipe_path(name);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_name: &str) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/pipelink/`
/// - macOS: `~/Library/Application Support/pipelink/`
/// - Windows: `%APPDATA%\pipelink\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_path_contains_name() {
        let path = pipe_path("worker-1");
        assert!(path.to_string_lossy().contains("worker-1"));
    }

    #[test]
    fn test_validate_pipe_name() {
        assert!(validate_pipe_name("worker-1").is_ok());
        assert!(validate_pipe_name("").is_err());
        assert!(validate_pipe_name("   ").is_err());
        assert!(validate_pipe_name("a/b").is_err());
        assert!(validate_pipe_name(r"a\b").is_err());
    }

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }
}
