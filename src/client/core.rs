//! File service client.
//!
//! The [`FileServiceClient`] is the controller's single entry point to the
//! worker. Construct one per process and hand clones to consumers; clones
//! share the same worker session.
//!
//! # Example
//!
//! ```ignore
//! use file_service::{FileServiceClient, SettingsSnapshot, WorkerOptions};
//!
//! let client = FileServiceClient::builder()
//!     .worker(WorkerOptions::new("./target/debug/file-service-worker"))
//!     .build()?;
//!
//! client.start_server().await?;
//! client.push_settings(SettingsSnapshot::new().with_format_on_save(true)).await?;
//! for descriptor in client.get_all_descriptors().await? {
//!     println!("{} ({})", descriptor.label, descriptor.status);
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{BusEvent, BusEventKind, EventBus, EventHandler, HandlerError, WorkerReadyEvent};
use crate::protocol::{
    EventKind, FileDescriptor, Payload, ReadyData, ResultEnvelope, SettingsSnapshot, StatusSet,
    UpdateResult,
};
use crate::transport::{Launcher, Session, SessionState};

use super::builder::ClientBuilder;
use super::collaborators::{SettingsSource, VcsCollaborator};

// ============================================================================
// Types
// ============================================================================

/// Validated configuration handed over by the builder.
pub(crate) struct ClientParts {
    pub launcher: Arc<dyn Launcher>,
    pub handshake_timeout: Duration,
    pub max_start_attempts: u32,
    pub settings: Arc<dyn SettingsSource>,
    pub vcs: Option<Arc<dyn VcsCollaborator>>,
    pub bus: EventBus,
}

/// Internal shared state for the client.
struct ClientInner {
    /// Worker session.
    session: Session,

    /// Settings collaborator.
    settings: Arc<dyn SettingsSource>,

    /// VCS collaborator announced with `WorkerReady`.
    vcs: Option<Arc<dyn VcsCollaborator>>,

    /// Bus shared with collaborators.
    bus: EventBus,

    /// Launch attempts per start.
    max_start_attempts: u32,

    /// Serializes `start_server` calls.
    start_lock: AsyncMutex<()>,

    /// `SettingsChanged` subscription, registered on every start.
    settings_handler: EventHandler,
}

// ============================================================================
// FileServiceClient
// ============================================================================

/// Typed facade over the worker session.
///
/// Cheap to clone; all clones share the same worker.
#[derive(Clone)]
pub struct FileServiceClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for FileServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileServiceClient")
            .field("state", &self.state())
            .field("vcs", &self.inner.vcs.as_ref().map(|v| v.name()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FileServiceClient - Construction
// ============================================================================

impl FileServiceClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(parts: ClientParts) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            session: Session::with_handshake_timeout(parts.launcher, parts.handshake_timeout),
            settings: parts.settings,
            vcs: parts.vcs,
            bus: parts.bus,
            max_start_attempts: parts.max_start_attempts,
            start_lock: AsyncMutex::new(()),
            settings_handler: settings_changed_handler(weak.clone()),
        });
        Self { inner }
    }
}

/// Builds the `SettingsChanged` subscription.
///
/// Holds the client weakly since the bus may outlive it. The push runs on
/// the current tokio runtime, so `emit` never blocks on the worker.
fn settings_changed_handler(client: Weak<ClientInner>) -> EventHandler {
    Arc::new(move |event: &BusEvent| -> std::result::Result<(), HandlerError> {
        if !matches!(event, BusEvent::SettingsChanged(_)) {
            return Ok(());
        }
        let Some(inner) = client.upgrade() else {
            return Ok(());
        };

        let runtime = Handle::try_current()?;
        runtime.spawn(async move {
            let client = FileServiceClient { inner };
            match client.push_current_settings().await {
                Ok(result) if !result.successful => {
                    warn!(message = result.failure_message(), "Worker rejected settings");
                }
                Ok(_) => debug!("Changed settings pushed"),
                Err(e) if e.is_connection_error() => {
                    debug!(error = %e, "Settings changed while worker not ready");
                }
                Err(e) => warn!(error = %e, "Failed to push changed settings"),
            }
        });
        Ok(())
    })
}

// ============================================================================
// FileServiceClient - Lifecycle
// ============================================================================

impl FileServiceClient {
    /// Starts the worker and brings it to the ready state.
    ///
    /// Launches the worker, awaits its handshake, pushes the current
    /// settings, subscribes to `SettingsChanged` and emits `WorkerReady`.
    ///
    /// If the worker is already ready this returns its handshake data
    /// without side effects. After a stop or crash a new worker is
    /// launched. When the worker reports a retryable initialization
    /// failure it is relaunched, up to the configured attempt count.
    ///
    /// # Errors
    ///
    /// - [`Error::ProcessLaunchFailed`] if the worker cannot be spawned
    /// - [`Error::HandshakeTimeout`] if the worker does not become ready
    /// - [`Error::InitializationFailed`] if the worker reports a failure
    ///   that is not retryable or attempts are exhausted
    /// - [`Error::ConnectionClosed`] if the worker exits while receiving
    ///   its settings
    pub async fn start_server(&self) -> Result<ReadyData> {
        let _guard = self.inner.start_lock.lock().await;
        let session = &self.inner.session;

        if session.state() == SessionState::Ready {
            debug!("Worker already ready");
            return session.on_ready().await;
        }

        let max = self.inner.max_start_attempts;
        let mut attempt = 0;
        let ready = loop {
            attempt += 1;
            session.start()?;

            match session.on_ready().await {
                Ok(data) => break data,
                Err(e) if e.is_recoverable() && attempt < max => {
                    warn!(attempt, max, error = %e, "Worker asked to be relaunched");
                }
                Err(e) => {
                    if e.is_handshake_error() {
                        warn!(attempts = attempt, error = %e, "Worker failed to start");
                    }
                    return Err(e);
                }
            }
        };

        let pushed = self.push_current_settings().await?;
        if !pushed.successful {
            warn!(message = pushed.failure_message(), "Worker rejected initial settings");
        }

        self.inner.bus.on(
            BusEventKind::SettingsChanged,
            Arc::clone(&self.inner.settings_handler),
        );

        let notified = self.inner.bus.emit(&BusEvent::WorkerReady(WorkerReadyEvent {
            worker: ready.clone(),
            collaborator: self.inner.vcs.clone(),
        }));

        info!(
            worker_pid = ready.process_id,
            attempts = attempt,
            notified,
            "File service started"
        );
        Ok(ready)
    }

    /// Stops the worker.
    ///
    /// In-flight requests fail with [`Error::ConnectionClosed`]. A later
    /// [`start_server`](Self::start_server) launches a new worker.
    pub async fn stop(&self) {
        let _guard = self.inner.start_lock.lock().await;
        self.inner.session.stop().await;
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Returns the event bus.
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

// ============================================================================
// FileServiceClient - Operations
// ============================================================================

impl FileServiceClient {
    /// Lists every tracked file.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the worker is not ready
    /// - [`Error::OperationFailed`] if the worker reports a failure
    pub async fn get_all_descriptors(&self) -> Result<Vec<FileDescriptor>> {
        self.inner
            .session
            .send(EventKind::DescriptorsAll, None)
            .await?
            .into_descriptors()
    }

    /// Lists tracked files whose status is in `statuses`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the worker is not ready
    /// - [`Error::OperationFailed`] if the worker reports a failure
    pub async fn get_descriptors_by_status(
        &self,
        statuses: StatusSet,
    ) -> Result<Vec<FileDescriptor>> {
        self.inner
            .session
            .send(
                EventKind::DescriptorsByStatus,
                Some(Payload::StatusFilter(statuses)),
            )
            .await?
            .into_descriptors()
    }

    /// Lists tracked files matching the VCS collaborator's status filter.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no VCS collaborator is configured
    /// - otherwise as [`get_descriptors_by_status`](Self::get_descriptors_by_status)
    pub async fn get_vcs_descriptors(&self) -> Result<Vec<FileDescriptor>> {
        let vcs = self
            .inner
            .vcs
            .as_ref()
            .ok_or_else(|| Error::config("No VCS collaborator configured. Use .vcs() to set it."))?;
        self.get_descriptors_by_status(vcs.status_filter()).await
    }

    /// Asks the worker to rescan its workspace.
    ///
    /// Returns the raw result so callers can inspect an unsuccessful
    /// refresh; see [`ResultEnvelope::into_update_results`].
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the worker is not ready
    /// - [`Error::ConnectionClosed`] if the worker exits before replying
    pub async fn request_update(&self) -> Result<ResultEnvelope> {
        self.inner.session.send(EventKind::Update, None).await
    }

    /// Rescans the workspace and returns the changes.
    ///
    /// # Errors
    ///
    /// As [`request_update`](Self::request_update), plus
    /// [`Error::OperationFailed`] if the rescan failed.
    pub async fn update(&self) -> Result<Vec<UpdateResult>> {
        self.request_update().await?.into_update_results()
    }

    /// Replaces the worker's settings with `snapshot`.
    ///
    /// The worker applies the snapshot as a whole or not at all; an
    /// unsuccessful result means the previous settings are still active.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the worker is not ready
    /// - [`Error::ConnectionClosed`] if the worker exits before replying
    pub async fn push_settings(&self, snapshot: SettingsSnapshot) -> Result<ResultEnvelope> {
        self.inner
            .session
            .send(EventKind::Settings, Some(Payload::Settings(snapshot)))
            .await
    }

    /// Pushes the settings collaborator's current snapshot.
    ///
    /// # Errors
    ///
    /// As [`push_settings`](Self::push_settings).
    pub async fn push_current_settings(&self) -> Result<ResultEnvelope> {
        let snapshot = self.inner.settings.snapshot();
        self.push_settings(snapshot).await
    }
}
