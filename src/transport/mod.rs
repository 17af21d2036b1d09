//! Worker transport layer.
//!
//! This module launches the worker, carries line-delimited JSON between
//! the controller and the worker, and tracks the worker's lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Controller     │                              │  Worker         │
//! │                 │        stdin / stdout        │  (child process │
//! │  Session        │─────────────────────────────►│   or in-process)│
//! │  → Connection   │◄─────────────────────────────│                 │
//! │                 │     one JSON value per line  │  serve()        │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Session Lifecycle
//!
//! 1. `Session::start` - Launch the worker through a [`Launcher`]
//! 2. `Session::on_ready` - Wait for the `ready` notification
//! 3. `Session::send` - Correlated requests, any number in flight
//! 4. `Session::stop` - Close the channel and kill the process
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Line channel and event loop |
//! | `options` | Worker launch configuration |
//! | `process` | Launchers and child process ownership |
//! | `session` | Lifecycle state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Line channel and event loop.
pub mod connection;

/// Worker launch configuration.
pub mod options;

/// Launchers and child process ownership.
pub mod process;

/// Worker lifecycle.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, MAX_PENDING_REQUESTS};
pub use options::{WORKER_LOG_ENV, WorkerOptions};
pub use process::{LaunchedWorker, Launcher, ProcessLauncher, WorkerReader, WorkerWriter};
pub use session::{DEFAULT_HANDSHAKE_TIMEOUT, Session, SessionState, WorkerHandle};
