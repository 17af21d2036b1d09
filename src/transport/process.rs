//! Worker launching and child process ownership.
//!
//! A [`Launcher`] produces the byte channel to a fresh worker. The
//! [`ProcessLauncher`] spawns a child process and hands out its piped stdio;
//! other launchers may run the worker in-process over a duplex pipe.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::options::WorkerOptions;

// ============================================================================
// Types
// ============================================================================

/// Boxed read half of a worker channel.
pub type WorkerReader = Box<dyn AsyncRead + Unpin + Send>;

/// Boxed write half of a worker channel.
pub type WorkerWriter = Box<dyn AsyncWrite + Unpin + Send>;

// ============================================================================
// LaunchedWorker
// ============================================================================

/// A freshly launched worker: its channel and, if any, its process.
pub struct LaunchedWorker {
    /// Lines from the worker.
    pub reader: WorkerReader,
    /// Lines to the worker.
    pub writer: WorkerWriter,
    /// Child process, `None` for in-process workers.
    pub process: Option<Child>,
}

impl fmt::Debug for LaunchedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedWorker")
            .field("pid", &self.process.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Launcher
// ============================================================================

/// Starts a worker and returns the channel to it.
///
/// Called once per (re)start; must not block on protocol readiness.
pub trait Launcher: Send + Sync {
    /// Launches a new worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be started.
    fn launch(&self) -> Result<LaunchedWorker>;
}

// ============================================================================
// ProcessLauncher
// ============================================================================

/// Launches the worker as a child process speaking over stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    options: WorkerOptions,
}

impl ProcessLauncher {
    /// Creates a launcher for the given options.
    #[inline]
    #[must_use]
    pub fn new(options: WorkerOptions) -> Self {
        Self { options }
    }

    /// Returns the launch options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self) -> Result<LaunchedWorker> {
        let mut child = self
            .options
            .to_command()
            .spawn()
            .map_err(Error::process_launch_failed)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connection("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connection("worker stdout not captured"))?;

        info!(
            pid = child.id(),
            entrypoint = %self.options.entrypoint.display(),
            debug = self.options.debug,
            "Worker process spawned"
        );

        Ok(LaunchedWorker {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards a child process and ensures it is killed when dropped.
pub(crate) struct ProcessGuard {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    /// Creates a new process guard.
    pub(crate) fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Kills the process and waits for it to exit.
    pub(crate) async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(pid = self.pid, "Killing worker process");
            if let Err(e) = child.kill().await {
                debug!(pid = self.pid, error = %e, "Failed to kill process");
            }
            info!(pid = self.pid, "Worker process terminated");
        }
    }

    /// Returns the process ID.
    #[inline]
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_missing_program_fails() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let _guard = runtime.enter();

        let launcher =
            ProcessLauncher::new(WorkerOptions::new("/nonexistent/file-service-worker"));
        let result = launcher.launch();
        assert!(matches!(result, Err(Error::ProcessLaunchFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_guard_kill() {
        let launcher = ProcessLauncher::new(WorkerOptions::new("sleep").with_arg("30"));
        let launched = launcher.launch().expect("launch sleep");
        let child = launched.process.expect("child");

        let mut guard = ProcessGuard::new(child);
        assert!(guard.pid() > 0);
        guard.kill().await;
        assert!(guard.child.is_none());
    }
}
