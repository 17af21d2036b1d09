//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating
//! [`FileServiceClient`] instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use file_service::{FileServiceClient, WorkerOptions};
//!
//! let client = FileServiceClient::builder()
//!     .worker(WorkerOptions::new("./target/debug/file-service-worker"))
//!     .handshake_timeout(Duration::from_secs(10))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::transport::{DEFAULT_HANDSHAKE_TIMEOUT, Launcher, ProcessLauncher, WorkerOptions};

use super::collaborators::{SettingsSource, StaticSettings, VcsCollaborator};
use super::core::{ClientParts, FileServiceClient};

// ============================================================================
// Constants
// ============================================================================

/// Default number of launches `start_server` makes when the worker asks to
/// be retried.
pub const DEFAULT_MAX_START_ATTEMPTS: u32 = 2;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`FileServiceClient`].
///
/// Use [`FileServiceClient::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    /// Worker process configuration.
    worker: Option<WorkerOptions>,
    /// Custom launcher, replaces `worker`.
    launcher: Option<Arc<dyn Launcher>>,
    /// Readiness handshake timeout.
    handshake_timeout: Duration,
    /// Launch attempts per `start_server`.
    max_start_attempts: u32,
    /// Settings collaborator.
    settings: Option<Arc<dyn SettingsSource>>,
    /// VCS collaborator.
    vcs: Option<Arc<dyn VcsCollaborator>>,
    /// Event bus shared with collaborators.
    bus: Option<EventBus>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            worker: None,
            launcher: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_start_attempts: DEFAULT_MAX_START_ATTEMPTS,
            settings: None,
            vcs: None,
            bus: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("worker", &self.worker)
            .field("custom_launcher", &self.launcher.is_some())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_start_attempts", &self.max_start_attempts)
            .field("settings", &self.settings.is_some())
            .field("vcs", &self.vcs.as_ref().map(|v| v.name()))
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default timeouts and no worker.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches the worker as a child process with these options.
    #[inline]
    #[must_use]
    pub fn worker(mut self, options: WorkerOptions) -> Self {
        self.worker = Some(options);
        self
    }

    /// Launches the worker through a custom launcher.
    #[inline]
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Sets how long to wait for the worker's `ready` notification.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets how many launches a start may make when the worker asks to be
    /// retried.
    #[inline]
    #[must_use]
    pub fn max_start_attempts(mut self, attempts: u32) -> Self {
        self.max_start_attempts = attempts;
        self
    }

    /// Sets the settings collaborator.
    #[inline]
    #[must_use]
    pub fn settings(mut self, source: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(source);
        self
    }

    /// Sets the VCS collaborator announced with `WorkerReady`.
    #[inline]
    #[must_use]
    pub fn vcs(mut self, collaborator: Arc<dyn VcsCollaborator>) -> Self {
        self.vcs = Some(collaborator);
        self
    }

    /// Shares an existing event bus.
    #[inline]
    #[must_use]
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the client with validation.
    ///
    /// Does not launch the worker; call
    /// [`FileServiceClient::start_server`] for that.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if neither or both of a worker and a launcher
    ///   are set, or a timeout or attempt count is zero
    /// - [`Error::WorkerNotFound`] if the worker entrypoint path doesn't exist
    pub fn build(self) -> Result<FileServiceClient> {
        let launcher = self.validate_launcher()?;
        self.validate_limits()?;

        Ok(FileServiceClient::from_parts(ClientParts {
            launcher,
            handshake_timeout: self.handshake_timeout,
            max_start_attempts: self.max_start_attempts,
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(StaticSettings::default())),
            vcs: self.vcs,
            bus: self.bus.unwrap_or_default(),
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Validates the launch configuration.
    fn validate_launcher(&self) -> Result<Arc<dyn Launcher>> {
        match (&self.worker, &self.launcher) {
            (Some(_), Some(_)) => Err(Error::config(
                "Set either a worker or a launcher, not both.",
            )),

            (None, None) => Err(Error::config(
                "Worker is required. Use .worker() or .launcher() to set it.\n\
                 Example: FileServiceClient::builder().worker(WorkerOptions::new(\"file-service-worker\"))",
            )),

            (None, Some(launcher)) => Ok(Arc::clone(launcher)),

            (Some(options), None) => {
                if options.is_path_entrypoint() && !options.entrypoint.exists() {
                    return Err(Error::worker_not_found(&options.entrypoint));
                }
                Ok(Arc::new(ProcessLauncher::new(options.clone())))
            }
        }
    }

    /// Validates timeouts and attempt counts.
    fn validate_limits(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("Handshake timeout must be greater than zero."));
        }
        if self.max_start_attempts == 0 {
            return Err(Error::config("Start attempts must be at least 1."));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
