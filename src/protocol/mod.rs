//! Wire protocol message types.
//!
//! This module defines the message format for communication between the
//! controller (local end) and the file service worker (remote end).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Controller → Worker | Carries a [`RequestEnvelope`] |
//! | `Response` | Worker → Controller | Carries a [`ResultEnvelope`] or wire error |
//! | `Notification` | Worker → Controller | Handshake (`ready` / `initializeFailed`) |
//!
//! Messages are newline-delimited JSON shaped after JSON-RPC 2.0.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Event kinds, payload union, shape validation |
//! | `notification` | Handshake notifications |
//! | `request` | Request and Response wire messages |
//! | `types` | Domain values carried in payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Event kinds, payloads and envelopes.
pub mod envelope;

/// Handshake notification types.
pub mod notification;

/// Request and Response message types.
pub mod request;

/// Domain values carried in payloads.
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{
    EventKind, FailureSignal, Payload, PayloadShape, RequestEnvelope, ResultEnvelope,
};
pub use notification::{Notification, ParsedNotification, ReadyData};
pub use request::{ErrorObject, Request, Response, codes};
pub use types::{
    FileDescriptor, RawFile, SettingsSnapshot, Status, StatusSet, UpdateChange, UpdateResult,
};
