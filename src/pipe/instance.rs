//! Server-side pipe instance
//!
//! A `PipeInstance` owns one server channel and, optionally, the companion
//! process it launches to be its client. Lifecycle:
//!
//! ```text
//! new()   -> listener allocated, nobody connected
//! start() -> companion spawned, connection accepted, initialized
//! send()/receive()
//! dispose() -> channel closed, companion terminated (idempotent)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::ipc::transport::{self, Listener, Stream};
use crate::ipc::{bounded, helpers, Channel};

/// Runtime options for server-side pipe instances
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// Maximum live instances sharing one pipe name
    pub max_instances: usize,
    /// Grace period between asking the companion to exit and killing it
    pub kill_grace: Duration,
    /// Required companion extension; empty accepts any
    pub client_extension: String,
    /// Prefix of the pipe name argument passed to the companion
    pub argument_prefix: String,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_instances: config.server.max_instances,
            kill_grace: Duration::from_millis(config.server.kill_grace_ms),
            client_extension: config.server.client_extension.clone(),
            argument_prefix: config.host.argument_prefix.clone(),
        }
    }
}

/// Companion executable launched by [`PipeInstance::start`]
#[derive(Debug, Clone)]
struct Companion {
    path: PathBuf,
    args: Vec<String>,
}

/// One server-side pipe and its optional companion process
pub struct PipeInstance {
    name: String,
    options: PipeOptions,
    companion: Option<Companion>,
    /// Present until a client connects
    listener: Option<Listener>,
    /// Present once a client connected
    channel: Option<Channel<Stream>>,
    child: Option<Child>,
    initialized: bool,
    disposed: bool,
    slot: Option<NameSlot>,
}

impl PipeInstance {
    /// Allocate the server side of pipe `name`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>, options: PipeOptions) -> Result<Self> {
        let name = name.into();
        paths::validate_pipe_name(&name)?;
        if options.max_instances == 0 {
            return Err(Error::invalid_argument(
                "max_instances",
                "must be at least 1",
            ));
        }
        if options.max_instances > transport::MAX_LISTENERS_PER_NAME {
            return Err(Error::invalid_argument(
                "max_instances",
                &format!(
                    "this platform serves at most {} listener(s) per pipe name",
                    transport::MAX_LISTENERS_PER_NAME
                ),
            ));
        }

        // The slot is claimed before the listener so a rejected instance never
        // touches the socket of a live one
        let slot = NameSlot::acquire(&name, options.max_instances)?;
        let listener = helpers::create_server(&name)?;
        tracing::debug!(pipe = %name, "Pipe server created");

        Ok(Self {
            name,
            options,
            companion: None,
            listener: Some(listener),
            channel: None,
            child: None,
            initialized: false,
            disposed: false,
            slot: Some(slot),
        })
    }

    /// Launch `path` as this pipe's client when started
    pub fn with_client(mut self, path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.companion = Some(Companion {
            path: path.into(),
            args,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `start` completed successfully (and `dispose` has not run)
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the instance is initialized and its peer still connected
    pub fn is_connected(&self) -> bool {
        self.initialized && self.channel.as_ref().is_some_and(|c| c.is_connected())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Process id of the companion, while it is owned by this instance
    pub fn client_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    /// The connected channel, for use with the JSON helpers
    pub fn channel_mut(&mut self) -> Option<&mut Channel<Stream>> {
        if self.disposed {
            return None;
        }
        self.channel.as_mut()
    }

    /// Launch the companion (if any) and wait for a client to connect
    ///
    /// Returns `Ok(false)` when the companion cannot even be launched
    /// (missing file, wrong extension, spawn failure). A connection that
    /// does not arrive in time is [`Error::Timeout`], and the companion is
    /// killed.
    pub async fn start(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<bool> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        if self.initialized {
            return Ok(true);
        }
        if self.listener.is_none() {
            return Err(Error::invalid_operation("server channel is not allocated"));
        }

        if let Some(companion) = self.companion.clone() {
            let Some(path) = self.check_companion(&companion.path) else {
                return Ok(false);
            };
            match self.spawn_companion(&path, &companion.args) {
                Ok(child) => {
                    tracing::info!(
                        pipe = %self.name,
                        pid = child.id(),
                        program = %path.display(),
                        "Companion started"
                    );
                    self.child = Some(child);
                }
                Err(e) => {
                    tracing::warn!(
                        pipe = %self.name,
                        program = %path.display(),
                        "Failed to launch companion: {}",
                        e
                    );
                    return Ok(false);
                }
            }
        }

        let accepted = match self.listener.as_ref() {
            Some(listener) => helpers::accept(listener, timeout, cancel).await,
            None => Err(Error::invalid_operation("server channel is not allocated")),
        };

        match accepted {
            Ok(channel) => {
                self.channel = Some(channel);
                self.release_listener();
                self.initialized = true;
                tracing::info!(pipe = %self.name, "Client connected");
                Ok(true)
            }
            Err(e) => {
                if e.is_timeout() {
                    tracing::warn!(pipe = %self.name, "Timed out waiting for client");
                } else {
                    tracing::warn!(pipe = %self.name, "Start failed: {}", e);
                }
                self.kill_companion().await;
                Err(e)
            }
        }
    }

    /// Send one line of text
    pub async fn send(
        &mut self,
        text: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let channel = self.connected_channel()?;
        bounded(timeout, cancel, channel.write_line(text)).await
    }

    /// Receive one line of text
    pub async fn receive(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<String> {
        let channel = self.connected_channel()?;
        bounded(timeout, cancel, channel.read_line()).await
    }

    /// Release the channel and the companion
    ///
    /// Safe to call any number of times, and after a failed `start`. Never
    /// fails: cleanup errors are logged and dropped.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.initialized = false;

        if let Some(mut channel) = self.channel.take() {
            if tokio::time::timeout(self.options.kill_grace, channel.close())
                .await
                .is_err()
            {
                tracing::debug!(pipe = %self.name, "Channel close timed out");
            }
        }
        self.release_listener();
        self.terminate_companion().await;
        self.slot.take();

        tracing::debug!(pipe = %self.name, "Pipe disposed");
    }

    fn connected_channel(&mut self) -> Result<&mut Channel<Stream>> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        if !self.initialized {
            return Err(Error::NotConnected);
        }
        helpers::validate(self.channel.as_mut())
    }

    /// Resolve and check the companion path, logging why it is unusable
    fn check_companion(&self, path: &Path) -> Option<PathBuf> {
        let resolved = if path.is_file() {
            path.to_path_buf()
        } else if path.components().count() == 1 {
            // Bare program name: look it up on PATH
            match which::which(path) {
                Ok(found) => found,
                Err(_) => {
                    tracing::warn!(pipe = %self.name, program = %path.display(), "Companion not found");
                    return None;
                }
            }
        } else {
            tracing::warn!(pipe = %self.name, program = %path.display(), "Companion not found");
            return None;
        };

        if !has_extension(&resolved, &self.options.client_extension) {
            tracing::warn!(
                pipe = %self.name,
                program = %resolved.display(),
                expected = %self.options.client_extension,
                "Companion has the wrong extension"
            );
            return None;
        }
        Some(resolved)
    }

    fn spawn_companion(&self, path: &Path, args: &[String]) -> std::io::Result<Child> {
        let mut child = Command::new(path)
            .arg(format!("{}:{}", self.options.argument_prefix, self.name))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, self.name.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, self.name.clone(), "stderr");
        }
        Ok(child)
    }

    /// Kill the companion right away (failed start)
    async fn kill_companion(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(pipe = %self.name, "Failed to kill companion: {}", e);
            }
        }
    }

    /// Ask the companion to exit, then kill it after the grace period
    async fn terminate_companion(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }

        request_exit(&child);
        match tokio::time::timeout(self.options.kill_grace, child.wait()).await {
            Ok(_) => tracing::debug!(pipe = %self.name, "Companion exited"),
            Err(_) => {
                tracing::debug!(pipe = %self.name, "Companion did not exit, killing it");
                if let Err(e) = child.kill().await {
                    tracing::debug!(pipe = %self.name, "Failed to kill companion: {}", e);
                }
            }
        }
    }

    /// Drop the listener and its socket file, if still held
    fn release_listener(&mut self) {
        if self.listener.take().is_some() {
            if let Err(e) = paths::remove_socket(&self.name) {
                tracing::debug!(pipe = %self.name, "Failed to remove socket: {}", e);
            }
        }
    }
}

impl Drop for PipeInstance {
    fn drop(&mut self) {
        // Best effort since we can't await in drop
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.release_listener();
    }
}

impl std::fmt::Debug for PipeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeInstance")
            .field("name", &self.name)
            .field("initialized", &self.initialized)
            .field("disposed", &self.disposed)
            .field("client_pid", &self.client_pid())
            .finish()
    }
}

/// Whether `path` ends in `expected` (case-insensitive, empty matches all)
fn has_extension(path: &Path, expected: &str) -> bool {
    let expected = expected.trim_start_matches('.');
    if expected.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(expected))
}

#[cfg(unix)]
fn request_exit(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) {
    // No termination signal on Windows; the closed channel tells the
    // companion to exit
}

fn forward_output<R>(reader: R, pipe: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(pipe = %pipe, stream, "companion: {}", line);
        }
    });
}

/// Live instances per pipe name, process-wide
fn name_slots() -> &'static Mutex<HashMap<String, usize>> {
    static SLOTS: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();
    SLOTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Claim on one of the `max_instances` slots of a pipe name
#[derive(Debug)]
struct NameSlot {
    name: String,
}

impl NameSlot {
    fn acquire(name: &str, max: usize) -> Result<Self> {
        let mut slots = name_slots().lock().unwrap_or_else(|e| e.into_inner());
        let used = slots.entry(name.to_string()).or_insert(0);
        if *used >= max {
            return Err(Error::InstanceLimit {
                name: name.to_string(),
                max,
            });
        }
        *used += 1;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Drop for NameSlot {
    fn drop(&mut self) {
        let mut slots = name_slots().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(used) = slots.get_mut(&self.name) {
            *used = used.saturating_sub(1);
            if *used == 0 {
                slots.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn unique_name(tag: &str) -> String {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "pipelink-instance-{}-{}-{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("host.exe"), "exe"));
        assert!(has_extension(Path::new("HOST.EXE"), ".exe"));
        assert!(!has_extension(Path::new("host.txt"), "exe"));
        assert!(!has_extension(Path::new("host"), "exe"));
        assert!(has_extension(Path::new("host"), ""));
    }

    #[tokio::test]
    async fn test_unstarted_instance_is_not_connected() {
        let cancel = CancellationToken::new();
        let mut pipe = PipeInstance::new(unique_name("unstarted"), PipeOptions::default()).unwrap();

        let err = pipe.send("hello", TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = pipe.receive(TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(!pipe.is_connected());
    }

    #[tokio::test]
    async fn test_dispose_twice() {
        let cancel = CancellationToken::new();
        let mut pipe = PipeInstance::new(unique_name("dispose"), PipeOptions::default()).unwrap();

        pipe.dispose().await;
        assert!(pipe.is_disposed());
        pipe.dispose().await;
        assert!(pipe.is_disposed());
        assert!(!pipe.is_initialized());

        let err = pipe.send("hello", TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Disposed));
        let err = pipe.start(TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Disposed));
        assert!(pipe.channel_mut().is_none());
    }

    #[tokio::test]
    async fn test_wrong_extension_returns_false() {
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let companion = dir.path().join("companion.txt");
        std::fs::write(&companion, "not a program").unwrap();

        let options = PipeOptions {
            client_extension: "exe".to_string(),
            ..PipeOptions::default()
        };
        let mut pipe = PipeInstance::new(unique_name("ext"), options)
            .unwrap()
            .with_client(&companion, Vec::new());

        assert!(!pipe.start(TIMEOUT, &cancel).await.unwrap());
        assert!(pipe.client_pid().is_none());
        assert!(!pipe.is_initialized());
    }

    #[tokio::test]
    async fn test_missing_companion_returns_false() {
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let mut pipe = PipeInstance::new(unique_name("missing"), PipeOptions::default())
            .unwrap()
            .with_client(dir.path().join("nope").join("host"), Vec::new());

        assert!(!pipe.start(TIMEOUT, &cancel).await.unwrap());
        assert!(pipe.client_pid().is_none());
    }

    #[tokio::test]
    async fn test_start_times_out_without_client() {
        let cancel = CancellationToken::new();
        let mut pipe = PipeInstance::new(unique_name("lonely"), PipeOptions::default()).unwrap();

        let err = pipe
            .start(Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(100)));
        assert!(!pipe.is_initialized());
        pipe.dispose().await;
    }

    #[tokio::test]
    async fn test_start_accepts_external_client() {
        let cancel = CancellationToken::new();
        let name = unique_name("external");
        let mut pipe = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap();

        let (started, client) = tokio::join!(
            pipe.start(TIMEOUT, &cancel),
            helpers::connect(&name, TIMEOUT, &cancel)
        );
        assert!(started.unwrap());
        let mut client = client.unwrap();
        assert!(pipe.is_connected());

        pipe.send("to client", TIMEOUT, &cancel).await.unwrap();
        assert_eq!(client.read_line().await.unwrap(), "to client");

        client.write_line("to server").await.unwrap();
        assert_eq!(pipe.receive(TIMEOUT, &cancel).await.unwrap(), "to server");

        // Starting again is a no-op
        assert!(pipe.start(TIMEOUT, &cancel).await.unwrap());

        pipe.dispose().await;
        assert!(matches!(
            client.read_line().await.unwrap_err(),
            Error::EmptyPayload
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_receive_after_peer_left() {
        let cancel = CancellationToken::new();
        let name = unique_name("left");
        let mut pipe = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap();

        let (started, client) = tokio::join!(
            pipe.start(TIMEOUT, &cancel),
            helpers::connect(&name, TIMEOUT, &cancel)
        );
        assert!(started.unwrap());
        drop(client);

        let err = pipe.receive(TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
        assert!(!pipe.is_connected());
        let err = pipe.send("anyone?", TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_instance_limit_per_name() {
        let name = unique_name("limit");
        let mut first = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap();

        let err = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InstanceLimit { max: 1, .. }));

        first.dispose().await;
        let mut second = PipeInstance::new(name, PipeOptions::default()).unwrap();
        second.dispose().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shared_socket_name_rejected_on_unix() {
        let name = unique_name("shared");
        let options = PipeOptions {
            max_instances: 2,
            ..PipeOptions::default()
        };
        let err = PipeInstance::new(name.clone(), options).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        // A rejected second instance must leave the live one reachable
        let cancel = CancellationToken::new();
        let mut live = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap();
        let err = PipeInstance::new(name.clone(), PipeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InstanceLimit { .. }));

        let (started, client) = tokio::join!(
            live.start(TIMEOUT, &cancel),
            helpers::connect(&name, TIMEOUT, &cancel)
        );
        assert!(started.unwrap());
        assert!(client.is_ok());
        live.dispose().await;
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let err = PipeInstance::new("", PipeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
