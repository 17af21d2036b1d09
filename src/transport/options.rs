//! Worker launch options.
//!
//! Provides a type-safe interface for configuring how the worker process is
//! started: entrypoint, arguments, working directory and debug mode.
//!
//! # Example
//!
//! ```ignore
//! use file_service::WorkerOptions;
//!
//! let options = WorkerOptions::new("./target/debug/file-service-worker")
//!     .with_arg("--root")
//!     .with_arg("/work/project")
//!     .with_debug();
//!
//! let args = options.to_args();
//! // ["--root", "/work/project", "--debug"]
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable holding the worker's log filter.
pub const WORKER_LOG_ENV: &str = "FILE_SERVICE_LOG";

/// Arguments appended in debug mode when none are configured.
const DEFAULT_DEBUG_ARGS: &[&str] = &["--debug"];

// ============================================================================
// WorkerOptions
// ============================================================================

/// Worker process configuration.
///
/// Mirrors a run/debug launch pair: the same entrypoint and working
/// directory, with extra arguments and a verbose log filter in debug mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Program to execute.
    pub entrypoint: PathBuf,

    /// Arguments passed in every mode.
    pub args: Vec<String>,

    /// Working directory of the worker.
    pub cwd: Option<PathBuf>,

    /// Launch in debug mode.
    pub debug: bool,

    /// Arguments appended in debug mode.
    pub debug_args: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

// ============================================================================
// Constructors
// ============================================================================

impl WorkerOptions {
    /// Creates options for the given entrypoint.
    #[inline]
    #[must_use]
    pub fn new(entrypoint: impl Into<PathBuf>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            args: Vec::new(),
            cwd: None,
            debug: false,
            debug_args: DEFAULT_DEBUG_ARGS.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WorkerOptions {
    /// Adds an argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    #[inline]
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[inline]
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Enables debug mode.
    #[inline]
    #[must_use]
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Replaces the debug-mode arguments.
    #[inline]
    #[must_use]
    pub fn with_debug_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debug_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    #[inline]
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

// ============================================================================
// Conversion
// ============================================================================

impl WorkerOptions {
    /// Returns `true` if the entrypoint names a file path rather than a
    /// program looked up on `PATH`.
    #[inline]
    #[must_use]
    pub fn is_path_entrypoint(&self) -> bool {
        self.entrypoint.components().count() > 1
    }

    /// Converts options to command-line arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if self.debug {
            args.extend(self.debug_args.iter().cloned());
        }
        args
    }

    /// Builds the command with piped stdin/stdout as the protocol channel.
    ///
    /// Stderr is inherited so worker logs reach the controller's terminal.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.entrypoint);
        cmd.args(self.to_args());

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        if self.debug {
            cmd.env(WORKER_LOG_ENV, "debug");
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd
    }
}

// ============================================================================
// Tests
// ============================================================================
