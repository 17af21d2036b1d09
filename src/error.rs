//! Error types for the file service protocol.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use file_service::{FileServiceClient, Result};
//!
//! async fn example(client: &FileServiceClient) -> Result<()> {
//!     client.start_server().await?;
//!     let descriptors = client.get_all_descriptors().await?;
//!     println!("{} files", descriptors.len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::WorkerNotFound`], [`Error::ProcessLaunchFailed`] |
//! | Handshake | [`Error::HandshakeTimeout`], [`Error::InitializationFailed`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::NotReady`] |
//! | Protocol | [`Error::MalformedPayload`], [`Error::Protocol`] |
//! | Operation | [`Error::OperationFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::ChannelClosed`] |
//!
//! Operation-level failures normally travel as data
//! (`ResultEnvelope::successful == false`). [`Error::OperationFailed`] only
//! appears when a caller asks for the payload of an unsuccessful result.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::protocol::EventKind;
use crate::transport::SessionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client or worker configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Worker entrypoint not found at path.
    #[error("Worker entrypoint not found at: {path}")]
    WorkerNotFound {
        /// Path where the worker was expected.
        path: PathBuf,
    },

    /// Failed to launch the worker process.
    #[error("Failed to launch worker: {message}")]
    ProcessLaunchFailed {
        /// Description of the launch failure.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Worker never signaled readiness.
    ///
    /// Returned when the worker does not send `ready` within the handshake
    /// timeout, or exits before sending it.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// Worker reported that its own initialization failed.
    #[error("Worker initialization failed: {message} (retry: {retry})")]
    InitializationFailed {
        /// Message reported by the worker.
        message: String,
        /// Whether the controller should relaunch and try again.
        retry: bool,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport failure while talking to the worker.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Worker connection closed before a reply arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request issued while the session is not ready.
    #[error("Session not ready (state: {state})")]
    NotReady {
        /// Session state at the time of the call.
        state: SessionState,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Payload shape does not match the event kind.
    ///
    /// Raised locally before anything is written, or when the worker rejects
    /// an envelope on its receive path.
    #[error("Malformed payload: {message}")]
    MalformedPayload {
        /// Description of the mismatch.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// Worker returned `successful: false`.
    #[error("{kind} failed: {message}")]
    OperationFailed {
        /// Event kind of the failed request.
        kind: EventKind,
        /// Message returned by the worker.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a worker not found error.
    #[inline]
    pub fn worker_not_found(path: impl Into<PathBuf>) -> Self {
        Self::WorkerNotFound { path: path.into() }
    }

    /// Creates a process launch failed error.
    #[inline]
    pub fn process_launch_failed(err: IoError) -> Self {
        Self::ProcessLaunchFailed {
            message: err.to_string(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates an initialization failed error.
    #[inline]
    pub fn initialization_failed(message: impl Into<String>, retry: bool) -> Self {
        Self::InitializationFailed {
            message: message.into(),
            retry,
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a not ready error.
    #[inline]
    pub fn not_ready(state: SessionState) -> Self {
        Self::NotReady { state }
    }

    /// Creates a malformed payload error.
    #[inline]
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an operation failed error.
    #[inline]
    pub fn operation_failed(kind: EventKind, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            kind,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::NotReady { .. }
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if the failure happened before the worker was ready.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::InitializationFailed { .. }
        )
    }

    /// Returns `true` if relaunching the worker may succeed.
    ///
    /// Only the worker's own [`FailureSignal`](crate::protocol::FailureSignal)
    /// makes an initialization failure retryable.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InitializationFailed { retry, .. } => *retry,
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
