//! Worker session lifecycle.
//!
//! A [`Session`] owns exactly one worker at a time: its process, its
//! [`Connection`], and through the connection the table of in-flight calls.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start──► Starting ──on_ready──► Ready ──stop──► Stopped
//!                          │                     │
//!                          └──── worker exits ───┴──────────► Crashed
//! ```
//!
//! `start` on a live worker is a no-op returning the existing handle;
//! `start` after `Stopped` or `Crashed` launches a fresh worker.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{EventKind, Payload, ReadyData, Request, RequestEnvelope, ResultEnvelope};

use super::connection::Connection;
use super::process::{Launcher, ProcessGuard};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the readiness handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No worker has been launched.
    NotStarted,
    /// Worker launched, handshake pending.
    Starting,
    /// Handshake completed; requests accepted.
    Ready,
    /// Worker shut down on request.
    Stopped,
    /// Worker exited or failed its handshake.
    Crashed,
}

impl SessionState {
    /// Returns `true` if a worker is launched and not known to be dead.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// WorkerHandle
// ============================================================================

/// Handle to the currently launched worker.
#[derive(Clone)]
pub struct WorkerHandle {
    /// Launch counter, distinguishes restarts.
    generation: u64,
    /// Process ID, `None` for in-process workers.
    pid: Option<u32>,
    /// Channel to the worker.
    connection: Connection,
}

impl WorkerHandle {
    /// Returns the worker process ID, if the worker is a process.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the launch generation (1 for the first launch).
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if the channel to the worker is still open.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.connection.is_closed()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Mutable session state, guarded by one lock.
struct SessionInner {
    /// Last recorded state; `Starting`/`Ready` are re-checked against the
    /// connection on read.
    state: SessionState,
    /// Current worker.
    worker: Option<WorkerHandle>,
    /// Current worker process.
    process: Option<ProcessGuard>,
    /// Number of launches so far.
    generation: u64,
}

/// Owns the worker and carries requests to it.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use file_service::transport::{ProcessLauncher, Session};
/// use file_service::{EventKind, WorkerOptions};
///
/// let launcher = ProcessLauncher::new(WorkerOptions::new("./file-service-worker"));
/// let session = Session::new(Arc::new(launcher));
///
/// session.start()?;
/// session.on_ready().await?;
/// let result = session.send(EventKind::DescriptorsAll, None).await?;
/// ```
pub struct Session {
    launcher: Arc<dyn Launcher>,
    handshake_timeout: Duration,
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a session with the default handshake timeout.
    #[must_use]
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self::with_handshake_timeout(launcher, DEFAULT_HANDSHAKE_TIMEOUT)
    }

    /// Creates a session with a custom handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(launcher: Arc<dyn Launcher>, handshake_timeout: Duration) -> Self {
        Self {
            launcher,
            handshake_timeout,
            inner: Mutex::new(SessionInner {
                state: SessionState::NotStarted,
                worker: None,
                process: None,
                generation: 0,
            }),
        }
    }
}

// ============================================================================
// Session - Public API
// ============================================================================

impl Session {
    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let inner = self.inner.lock();
        Self::effective_state(&inner)
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the current worker handle, if any.
    #[must_use]
    pub fn worker(&self) -> Option<WorkerHandle> {
        self.inner.lock().worker.clone()
    }

    /// Launches the worker and establishes the channel.
    ///
    /// Does not wait for the handshake. If a live worker exists this is a
    /// no-op returning its handle; after a stop or crash the old worker is
    /// discarded and a new one is launched.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher fails.
    pub fn start(&self) -> Result<WorkerHandle> {
        let mut inner = self.inner.lock();

        let state = Self::effective_state(&inner);
        if state.is_live()
            && let Some(handle) = &inner.worker
        {
            debug!(generation = handle.generation, %state, "Worker already started");
            return Ok(handle.clone());
        }

        if let Some(old) = inner.worker.take() {
            debug!(generation = old.generation, %state, "Discarding previous worker");
            old.connection.shutdown();
        }
        // Dropping the guard sends the kill signal.
        inner.process = None;

        let launched = self.launcher.launch()?;
        let connection = Connection::new(launched.reader, launched.writer);
        let process = launched.process.map(ProcessGuard::new);

        inner.generation += 1;
        let handle = WorkerHandle {
            generation: inner.generation,
            pid: process.as_ref().map(ProcessGuard::pid),
            connection,
        };

        inner.state = SessionState::Starting;
        inner.worker = Some(handle.clone());
        inner.process = process;

        info!(
            generation = handle.generation,
            pid = handle.pid,
            "Worker started, awaiting handshake"
        );

        Ok(handle)
    }

    /// Waits for the worker's readiness handshake.
    ///
    /// Resolves once per launch; calling it again after success returns the
    /// same data without touching the worker. On any failure the worker is
    /// discarded and the session moves to [`SessionState::Crashed`].
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if no worker has been started
    /// - [`Error::HandshakeTimeout`] if the worker does not signal in time or
    ///   exits before signaling
    /// - [`Error::InitializationFailed`] if the worker reports a failure
    pub async fn on_ready(&self) -> Result<ReadyData> {
        // Recorded state, not the live one: a worker that already exited
        // still owes us its handshake outcome.
        let handle = {
            let inner = self.inner.lock();
            match (&inner.worker, inner.state) {
                (Some(handle), SessionState::Starting | SessionState::Ready) => handle.clone(),
                _ => return Err(Error::not_ready(Self::effective_state(&inner))),
            }
        };

        let timeout_ms = self.handshake_timeout.as_millis() as u64;
        let outcome = match handle.connection.wait_ready(self.handshake_timeout).await {
            Err(Error::ConnectionClosed) => {
                warn!(
                    generation = handle.generation,
                    "Worker exited before signaling ready"
                );
                Err(Error::handshake_timeout(timeout_ms))
            }
            other => other,
        };

        match outcome {
            Ok(data) => {
                let mut inner = self.inner.lock();
                if inner.generation == handle.generation && inner.state == SessionState::Starting {
                    inner.state = SessionState::Ready;
                    info!(
                        generation = handle.generation,
                        worker_pid = data.process_id,
                        version = %data.version,
                        "Worker ready"
                    );
                }
                Ok(data)
            }
            Err(e) => {
                self.discard(handle.generation, SessionState::Crashed).await;
                Err(e)
            }
        }
    }

    /// Sends a request and waits for its result.
    ///
    /// The envelope is validated before anything is written, and the result
    /// is validated against the request's kind on arrival. An unsuccessful
    /// result is returned as data, not as an error.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedPayload`] if the payload does not fit `kind`, or
    ///   the worker rejects or mis-tags the exchange
    /// - [`Error::NotReady`] if the session is not ready
    /// - [`Error::ConnectionClosed`] if the worker exits before replying
    pub async fn send(&self, kind: EventKind, payload: Option<Payload>) -> Result<ResultEnvelope> {
        let envelope = RequestEnvelope::new(kind, payload);
        envelope.validate()?;

        let connection = self.ready_connection()?;
        let request = Request::new(&envelope)?;
        let request_id = request.id;

        trace!(%request_id, %kind, "Sending request");
        let response = connection.send(request).await?;

        let result = response.into_result()?;
        result.validate_for(kind)?;

        debug!(%request_id, %kind, successful = result.successful, "Request completed");
        Ok(result)
    }

    /// Shuts the worker down and moves to [`SessionState::Stopped`].
    ///
    /// In-flight requests fail with [`Error::ConnectionClosed`]. Does
    /// nothing if no worker was ever started.
    pub async fn stop(&self) {
        let generation = self.inner.lock().generation;
        if generation == 0 {
            return;
        }
        self.discard(generation, SessionState::Stopped).await;
        info!(generation, "Worker stopped");
    }
}

// ============================================================================
// Session - Internal
// ============================================================================

impl Session {
    /// Computes the state, demoting a live state whose channel closed.
    fn effective_state(inner: &SessionInner) -> SessionState {
        match &inner.worker {
            Some(handle) if inner.state.is_live() && !handle.is_alive() => SessionState::Crashed,
            _ => inner.state,
        }
    }

    /// Returns the connection if the session is ready.
    fn ready_connection(&self) -> Result<Connection> {
        let inner = self.inner.lock();
        let state = Self::effective_state(&inner);
        match (&inner.worker, state) {
            (Some(handle), SessionState::Ready) => Ok(handle.connection.clone()),
            _ => Err(Error::not_ready(state)),
        }
    }

    /// Tears down the worker of `generation` if it is still current.
    async fn discard(&self, generation: u64, next: SessionState) {
        let (worker, process) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.state = next;
            (inner.worker.take(), inner.process.take())
        };

        if let Some(worker) = worker {
            worker.connection.shutdown();
        }
        if let Some(mut process) = process {
            process.kill().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    use crate::protocol::{Notification, Response, codes};
    use crate::transport::process::LaunchedWorker;

    /// Scripted worker behaviour for one launch.
    #[derive(Clone, Copy)]
    enum Script {
        /// Send `ready`, then answer every request with a successful
        /// `settings` result.
        Ready,
        /// Send nothing and stay open.
        Silent,
        /// Close the channel immediately.
        Exit,
        /// Send `ready`, then answer with a wire error.
        RejectAll,
    }

    struct ScriptedLauncher {
        script: Script,
        launches: AtomicUsize,
    }

    impl ScriptedLauncher {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                launches: AtomicUsize::new(0),
            })
        }
    }

    impl Launcher for ScriptedLauncher {
        fn launch(&self) -> Result<LaunchedWorker> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let (local_read, mut remote_write) = duplex(64 * 1024);
            let (remote_read, local_write) = duplex(64 * 1024);
            let script = self.script;

            tokio::spawn(async move {
                let mut lines = BufReader::new(remote_read).lines();
                match script {
                    Script::Exit => return,
                    Script::Silent => {
                        while let Ok(Some(_)) = lines.next_line().await {}
                        return;
                    }
                    Script::Ready | Script::RejectAll => {}
                }

                let ready = Notification::ready(&ReadyData {
                    process_id: 1,
                    version: "test".into(),
                });
                let mut line = serde_json::to_string(&ready).expect("serialize");
                line.push('\n');
                if remote_write.write_all(line.as_bytes()).await.is_err() {
                    return;
                }

                while let Ok(Some(text)) = lines.next_line().await {
                    let request: Request = serde_json::from_str(&text).expect("request");
                    let response = match script {
                        Script::RejectAll => {
                            Response::error(request.id, codes::INVALID_PARAMS, "rejected")
                        }
                        _ => Response::result(
                            request.id,
                            ResultEnvelope::success(EventKind::Settings, None),
                        ),
                    };
                    let mut line = serde_json::to_string(&response).expect("serialize");
                    line.push('\n');
                    if remote_write.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });

            Ok(LaunchedWorker {
                reader: Box::new(local_read),
                writer: Box::new(local_write),
                process: None,
            })
        }
    }

    fn session(launcher: Arc<ScriptedLauncher>) -> Session {
        Session::with_handshake_timeout(launcher, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_start_and_ready() {
        let session = session(ScriptedLauncher::new(Script::Ready));
        assert_eq!(session.state(), SessionState::NotStarted);

        let handle = session.start().expect("start");
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.pid(), None);
        assert_eq!(session.state(), SessionState::Starting);

        let data = session.on_ready().await.expect("ready");
        assert_eq!(data.version, "test");
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let launcher = ScriptedLauncher::new(Script::Ready);
        let session = session(Arc::clone(&launcher));

        let first = session.start().expect("start");
        let second = session.start().expect("start again");
        assert_eq!(first.generation(), second.generation());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_before_ready_fails() {
        let session = session(ScriptedLauncher::new(Script::Ready));
        let err = session
            .send(EventKind::DescriptorsAll, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotReady {
                state: SessionState::NotStarted
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_checked_before_state() {
        let session = session(ScriptedLauncher::new(Script::Ready));
        let err = session
            .send(EventKind::Settings, Some(Payload::Descriptors(Vec::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn test_silent_worker_times_out() {
        let session = session(ScriptedLauncher::new(Script::Silent));
        session.start().expect("start");

        let err = session.on_ready().await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { timeout_ms: 200 }));
        assert_eq!(session.state(), SessionState::Crashed);
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_handshake_timeout() {
        let session = session(ScriptedLauncher::new(Script::Exit));
        session.start().expect("start");

        let err = session.on_ready().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.state(), SessionState::Crashed);
    }

    #[tokio::test]
    async fn test_restart_after_crash() {
        let launcher = ScriptedLauncher::new(Script::Exit);
        let session = session(Arc::clone(&launcher));

        session.start().expect("start");
        let _ = session.on_ready().await;
        assert_eq!(session.state(), SessionState::Crashed);

        let handle = session.start().expect("restart");
        assert_eq!(handle.generation(), 2);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wire_rejection_is_malformed_payload() {
        let session = session(ScriptedLauncher::new(Script::RejectAll));
        session.start().expect("start");
        session.on_ready().await.expect("ready");

        let err = session
            .send(EventKind::DescriptorsAll, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn test_mistagged_result_is_malformed_payload() {
        // The scripted worker always answers with a `settings` result.
        let session = session(ScriptedLauncher::new(Script::Ready));
        session.start().expect("start");
        session.on_ready().await.expect("ready");

        let ok = session
            .send(
                EventKind::Settings,
                Some(Payload::Settings(Default::default())),
            )
            .await
            .expect("settings");
        assert!(ok.successful);

        let err = session.send(EventKind::Update, None).await.unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn test_stop() {
        let session = session(ScriptedLauncher::new(Script::Ready));
        session.stop().await;
        assert_eq!(session.state(), SessionState::NotStarted);

        session.start().expect("start");
        session.on_ready().await.expect("ready");
        session.stop().await;

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.worker().is_none());
        let err = session.send(EventKind::Update, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotReady {
                state: SessionState::Stopped
            }
        ));
    }
}
