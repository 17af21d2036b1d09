//! Worker connection and event loop.
//!
//! This module handles the byte channel to the worker process, including
//! request/response correlation and the readiness handshake.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming lines from the worker (responses, notifications)
//! - Outgoing requests from the Rust API
//! - Request/response correlation by UUID
//! - Failing every in-flight request when the channel closes
//!
//! The channel is any `AsyncRead`/`AsyncWrite` pair: the piped stdio of a
//! child process in production, an in-memory duplex in tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{from_str, to_string};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{FailureSignal, Notification, ParsedNotification, ReadyData, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
pub const MAX_PENDING_REQUESTS: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

/// How the handshake ended, once it has.
#[derive(Debug, Clone, PartialEq)]
enum HandshakeOutcome {
    /// Worker sent `ready`.
    Ready(ReadyData),
    /// Worker sent `initializeFailed`.
    Failed {
        message: String,
        signal: FailureSignal,
    },
    /// Channel closed before either notification.
    Closed,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Line-oriented JSON connection to a worker.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the same
/// event loop. Every caller awaits its own reply, so one slow request never
/// blocks another.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Handshake outcome, written once by the event loop.
    handshake: watch::Receiver<Option<HandshakeOutcome>>,
    /// Set when the event loop terminates.
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a new connection over a reader/writer pair.
    ///
    /// Spawns the event loop task internally, so this must be called from
    /// within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake) = watch::channel(None);
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            reader,
            writer,
            command_rx,
            Arc::clone(&correlation),
            handshake_tx,
            Arc::clone(&closed),
        ));

        Self {
            command_tx,
            correlation,
            handshake,
            closed,
        }
    }

    /// Waits for the worker's handshake notification.
    ///
    /// Resolves with the same outcome however many times it is called.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeTimeout`] if nothing arrives within `handshake_timeout`
    /// - [`Error::InitializationFailed`] if the worker sent `initializeFailed`
    /// - [`Error::ConnectionClosed`] if the channel closed before the handshake
    pub async fn wait_ready(&self, handshake_timeout: Duration) -> Result<ReadyData> {
        let mut handshake = self.handshake.clone();

        let outcome = timeout(handshake_timeout, handshake.wait_for(Option::is_some))
            .await
            .map_err(|_| Error::handshake_timeout(handshake_timeout.as_millis() as u64))?
            .map_err(|_| Error::ConnectionClosed)?
            .clone();

        match outcome {
            Some(HandshakeOutcome::Ready(data)) => {
                debug!(pid = data.process_id, version = %data.version, "Handshake completed");
                Ok(data)
            }
            Some(HandshakeOutcome::Failed { message, signal }) => {
                warn!(%message, retry = signal.retry, "Worker initialization failed");
                Err(Error::initialization_failed(message, signal.retry))
            }
            Some(HandshakeOutcome::Closed) | None => Err(Error::ConnectionClosed),
        }
    }

    /// Returns `true` once the handshake has completed successfully.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.handshake.borrow(), Some(HandshakeOutcome::Ready(_)))
    }

    /// Sends a request and waits for its correlated response.
    ///
    /// There is no timeout; the call resolves when the worker replies or the
    /// channel closes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel closes before the reply
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn send(&self, request: Request) -> Result<Response> {
        // Check pending request limit
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the event loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shuts down the connection, closing the write half.
    ///
    /// In-flight requests fail with [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles channel I/O.
    async fn run_event_loop<R, W>(
        reader: R,
        writer: W,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        handshake: watch::Sender<Option<HandshakeOutcome>>,
        closed: Arc<AtomicBool>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut writer = BufWriter::new(writer);

        loop {
            tokio::select! {
                // Incoming lines from worker
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if !text.trim().is_empty() {
                                Self::handle_incoming_message(&text, &correlation, &handshake);
                            }
                        }

                        Ok(None) => {
                            debug!("Worker channel reached EOF");
                            break;
                        }

                        Err(e) => {
                            error!(error = %e, "Worker channel read error");
                            break;
                        }
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            let written = Self::handle_send_command(
                                request,
                                response_tx,
                                &mut writer,
                                &correlation,
                            ).await;

                            if !written {
                                break;
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = writer.shutdown().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        closed.store(true, Ordering::SeqCst);

        handshake.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(HandshakeOutcome::Closed);
                true
            } else {
                false
            }
        });

        // Fail all pending requests on shutdown
        Self::fail_pending_requests(&correlation);

        debug!("Event loop terminated");
    }

    /// Handles an incoming line from the worker.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        handshake: &watch::Sender<Option<HandshakeOutcome>>,
    ) {
        // Try to parse as Response first
        if let Ok(response) = from_str::<Response>(text) {
            let tx = correlation.lock().remove(&response.id);

            if let Some(tx) = tx {
                let _ = tx.send(Ok(response));
            } else {
                warn!(id = %response.id, "Response for unknown request");
            }

            return;
        }

        // Try to parse as Notification
        if let Ok(notification) = from_str::<Notification>(text) {
            let outcome = match notification.parse() {
                ParsedNotification::Ready(data) => HandshakeOutcome::Ready(data),
                ParsedNotification::InitializeFailed { message, signal } => {
                    HandshakeOutcome::Failed { message, signal }
                }
                ParsedNotification::Unknown { method, .. } => {
                    debug!(%method, "Ignoring unknown notification");
                    return;
                }
            };

            let accepted = handshake.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(outcome);
                    true
                } else {
                    false
                }
            });

            if !accepted {
                warn!(method = %notification.method, "Duplicate handshake notification ignored");
            }
            return;
        }

        warn!(text = %text, "Failed to parse incoming message");
    }

    /// Handles a send command from the Rust API.
    ///
    /// Returns `false` if the channel is no longer writable.
    async fn handle_send_command<W>(
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        writer: &mut BufWriter<W>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        let request_id = request.id;

        // Serialize request
        let mut line = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return true;
            }
        };
        line.push('\n');

        // Store correlation before sending
        correlation.lock().insert(request_id, response_tx);

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };

        if let Err(e) = write.await {
            debug!(%request_id, error = %e, "Write to worker failed");
            if let Some(tx) = correlation.lock().remove(&request_id) {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
            return false;
        }

        trace!(%request_id, "Request sent");
        true
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
