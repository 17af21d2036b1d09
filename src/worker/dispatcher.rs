//! Dispatcher interface.

use async_trait::async_trait;

use crate::protocol::{RequestEnvelope, ResultEnvelope};

/// Performs the operation named by an envelope's event kind.
///
/// Called with envelopes that already passed receive-side validation, so
/// the payload matches the kind. Must return exactly one result whose
/// `event_type` echoes the request; operation failures are reported as
/// unsuccessful results, never as panics. May be called concurrently.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handles one request.
    async fn dispatch(&self, envelope: RequestEnvelope) -> ResultEnvelope;
}

