//! Worker side of the protocol.
//!
//! The worker is a long-lived process that owns the file container. It
//! reads requests from its input, dispatches them, and writes replies to its
//! output. The same code runs in the `file-service-worker` binary and
//! in-process over a duplex pipe.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `container` | Reference [`Dispatcher`] over a workspace directory |
//! | `dispatcher` | Dispatcher trait |
//! | `server` | Protocol loop: handshake, validation, concurrent dispatch |

// ============================================================================
// Submodules
// ============================================================================

/// Reference file container.
pub mod container;

/// Dispatcher trait.
pub mod dispatcher;

/// Protocol loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use container::FileContainer;
pub use dispatcher::Dispatcher;
pub use server::{announce_failure, serve};
