//! File service - typed request/response protocol to a long-lived worker.
//!
//! This library lets a controller process drive a file service worker:
//! launch it, wait for its readiness handshake, and exchange typed requests
//! and results with it over newline-delimited JSON.
//!
//! # Architecture
//!
//! The service follows a controller-worker model:
//!
//! - **Controller**: builds request envelopes, sends them, awaits correlated
//!   results
//! - **Worker**: validates envelopes, dispatches them to the file container,
//!   replies
//!
//! Key design principles:
//!
//! - One [`FileServiceClient`] per controller process, passed to consumers
//!   explicitly (it is cheap to clone)
//! - Every request carries its own correlation id, so any number may be in
//!   flight and replies may arrive in any order
//! - Payload shapes are checked against the event kind on both sides
//! - Operation failures are data (`successful: false`), protocol failures
//!   are [`Error`]s
//!
//! # Quick Start
//!
//! ```no_run
//! use file_service::{FileServiceClient, Result, SettingsSnapshot, WorkerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = FileServiceClient::builder()
//!         .worker(WorkerOptions::new("file-service-worker").with_args(["--root", "."]))
//!         .build()?;
//!
//!     client.start_server().await?;
//!     client.request_update().await?;
//!
//!     client
//!         .push_settings(SettingsSnapshot::new().with_format_on_save(true))
//!         .await?;
//!
//!     for descriptor in client.get_all_descriptors().await? {
//!         println!("{} {}", descriptor.status, descriptor.path.display());
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`FileServiceClient`] facade and builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | In-process [`EventBus`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelopes, payloads and wire messages |
//! | [`transport`] | Worker launch, connection and session lifecycle |
//! | [`worker`] | Worker-side dispatcher and protocol loop |

// ============================================================================
// Modules
// ============================================================================

/// Client facade.
///
/// Use [`FileServiceClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// In-process publish/subscribe.
pub mod events;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Protocol message types.
///
/// Envelopes, the payload union and the JSON-RPC shaped wire messages.
pub mod protocol;

/// Worker transport layer.
///
/// Launches the worker and manages the connection to it.
pub mod transport;

/// Worker side of the protocol.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientBuilder, FileServiceClient, SettingsSource, SharedSettings, StaticSettings,
    VcsCollaborator,
};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{BusEvent, BusEventKind, EventBus, EventHandler, WorkerReadyEvent};

// Identifier types
pub use identifiers::{CallerId, RequestId};

// Protocol types
pub use protocol::{
    EventKind, FailureSignal, FileDescriptor, Payload, RawFile, ReadyData, RequestEnvelope,
    ResultEnvelope, SettingsSnapshot, Status, StatusSet, UpdateChange, UpdateResult,
};

// Transport types
pub use transport::{Launcher, Session, SessionState, WorkerOptions};

// Worker types
pub use worker::{Dispatcher, FileContainer};
