//! Daemon Bootstrap
//!
//! Makes the cache look self-managing to a consumer: if nothing answers on
//! the socket, find the daemon executable, start it in the background and
//! wait for it to come up.
//!
//! ## Flow
//!
//! ```text
//!  probe socket ──ok──────────────────────────────────────> CacheClient
//!       │
//!     fail
//!       ▼
//!  locate executable ──none──> UnavailableError::NotFound
//!       │ (sibling ─> $PATH ─> working dir)
//!       ▼
//!  launch detached (spawn errors are logged, not fatal)
//!       │
//!       ▼
//!  ┌─> sleep(poll_interval) ─> probe ──ok──────────────────> CacheClient
//!  └──────────── fail, deadline not reached ──┘
//!                         │
//!                deadline reached ──> UnavailableError::DeadlineExceeded
//! ```
//!
//! Consumers racing to start a daemon are not coordinated. Every loser's
//! daemon fails to lock the store file and exits before touching the
//! socket, so the winner keeps serving.

use crate::client::CacheClient;
use crate::config::SOCKET_ENV;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timeout for a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Delay between probes while waiting for a launched daemon.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Total time allowed for a launched daemon to start answering.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// The cache could not be made available.
#[derive(Debug, Error)]
pub enum UnavailableError {
    /// No strategy located a daemon executable.
    #[error("cache daemon executable '{binary}' not found")]
    NotFound { binary: String },

    /// A daemon was launched (or attempted) but never answered.
    #[error("cache daemon did not come up on {socket_path} within {deadline:?}")]
    DeadlineExceeded {
        socket_path: PathBuf,
        deadline: Duration,
    },
}

// ============================================================================
// Locating the executable
// ============================================================================

/// A strategy for finding the daemon executable.
pub trait Locate: Send + Sync {
    /// Returns the executable's path if this strategy finds one.
    fn locate(&self) -> Option<PathBuf>;

    /// Short name for logs.
    fn describe(&self) -> String;
}

/// Checks that `path` is a regular file with an execute bit set.
fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Looks next to the running executable.
#[derive(Debug, Clone)]
pub struct SiblingExecutable {
    name: String,
}

impl SiblingExecutable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Locate for SiblingExecutable {
    fn locate(&self) -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let candidate = exe.parent()?.join(&self.name);
        is_executable(&candidate).then_some(candidate)
    }

    fn describe(&self) -> String {
        format!("sibling '{}'", self.name)
    }
}

/// Searches the directories of the executable search path.
#[derive(Debug, Clone)]
pub struct SearchPath {
    name: String,
    path_var: Option<OsString>,
}

impl SearchPath {
    /// Searches `$PATH` as it is when [`locate`](Locate::locate) runs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_var: None,
        }
    }

    /// Searches the given `PATH`-style list instead of the environment.
    pub fn with_path_var(mut self, path_var: impl Into<OsString>) -> Self {
        self.path_var = Some(path_var.into());
        self
    }
}

impl Locate for SearchPath {
    fn locate(&self) -> Option<PathBuf> {
        let path_var = match &self.path_var {
            Some(value) => value.clone(),
            None => std::env::var_os("PATH")?,
        };

        std::env::split_paths(&path_var)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(&self.name))
            .find(|candidate| is_executable(candidate))
    }

    fn describe(&self) -> String {
        format!("search path for '{}'", self.name)
    }
}

/// Looks in the working directory.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    name: String,
    dir: Option<PathBuf>,
}

impl WorkingDirectory {
    /// Looks in the process's current directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: None,
        }
    }

    /// Looks in `dir` instead of the current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Locate for WorkingDirectory {
    fn locate(&self) -> Option<PathBuf> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().ok()?,
        };
        let candidate = dir.join(&self.name);
        is_executable(&candidate).then_some(candidate)
    }

    fn describe(&self) -> String {
        format!("working directory '{}'", self.name)
    }
}

/// An explicitly configured location.
#[derive(Debug, Clone)]
pub struct FixedPath(pub PathBuf);

impl Locate for FixedPath {
    fn locate(&self) -> Option<PathBuf> {
        is_executable(&self.0).then(|| self.0.clone())
    }

    fn describe(&self) -> String {
        format!("fixed path {}", self.0.display())
    }
}

/// The standard lookup order for an executable named `name`.
pub fn default_locators(name: &str) -> Vec<Box<dyn Locate>> {
    vec![
        Box::new(SiblingExecutable::new(name)),
        Box::new(SearchPath::new(name)),
        Box::new(WorkingDirectory::new(name)),
    ]
}

// ============================================================================
// Launching
// ============================================================================

/// Starts the daemon executable.
pub trait Launch: Send + Sync {
    /// Starts `program` so that it serves `socket_path`. Must not wait for
    /// the daemon to become ready.
    fn launch(&self, program: &Path, socket_path: &Path) -> io::Result<()>;
}

/// Starts the daemon as a detached background process.
///
/// The child gets null stdio and its own process group, so it outlives
/// the consumer and ignores the consumer's terminal signals. The socket
/// path is passed through the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedProcess;

impl Launch for DetachedProcess {
    fn launch(&self, program: &Path, socket_path: &Path) -> io::Result<()> {
        let mut child = Command::new(program)
            .env(SOCKET_ENV, socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;

        let pid = child.id();
        std::thread::Builder::new()
            .name("stashkv-reaper".to_string())
            .spawn(move || {
                // Reap the daemon if it exits while we are still alive
                let _ = child.wait();
            })?;

        info!(program = %program.display(), pid, "Launched cache daemon");
        Ok(())
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Probes for a live daemon and starts one if needed.
pub struct Bootstrap {
    socket_path: PathBuf,
    binary: String,
    locators: Vec<Box<dyn Locate>>,
    launcher: Box<dyn Launch>,
    probe_timeout: Duration,
    poll_interval: Duration,
    deadline: Duration,
}

impl Bootstrap {
    /// Bootstrap for the socket at `socket_path` using the standard
    /// executable name and lookup order.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            binary: crate::DAEMON_BINARY.to_string(),
            locators: default_locators(crate::DAEMON_BINARY),
            launcher: Box::new(DetachedProcess),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Replaces the lookup order.
    pub fn locators(mut self, locators: Vec<Box<dyn Locate>>) -> Self {
        self.locators = locators;
        self
    }

    /// Replaces the launcher.
    pub fn launcher(mut self, launcher: impl Launch + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Socket path being bootstrapped.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the strategies in order and returns the first hit.
    pub fn locate(&self) -> Option<PathBuf> {
        self.locators.iter().find_map(|locator| {
            let found = locator.locate();
            debug!(strategy = %locator.describe(), found = ?found, "Locating cache daemon");
            found
        })
    }

    /// Returns a client for a live daemon, starting one first if needed.
    pub async fn connect(&self) -> Result<CacheClient, UnavailableError> {
        let client = CacheClient::new(&self.socket_path);

        if client.probe(self.probe_timeout).await.is_ok() {
            debug!(socket = %self.socket_path.display(), "Cache daemon already running");
            return Ok(client);
        }

        let program = self.locate().ok_or_else(|| UnavailableError::NotFound {
            binary: self.binary.clone(),
        })?;

        if let Err(e) = self.launcher.launch(&program, &self.socket_path) {
            // Another consumer may have started one; keep polling
            warn!(program = %program.display(), error = %e, "Failed to launch cache daemon");
        }

        let deadline = Instant::now() + self.deadline;
        while Instant::now() < deadline {
            tokio::time::sleep(self.poll_interval).await;

            if client.probe(self.probe_timeout).await.is_ok() {
                info!(socket = %self.socket_path.display(), "Cache daemon is up");
                return Ok(client);
            }
        }

        Err(UnavailableError::DeadlineExceeded {
            socket_path: self.socket_path.clone(),
            deadline: self.deadline,
        })
    }
}
