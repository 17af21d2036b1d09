//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing a per-call correlation id with the
//! process-level caller id at compile time.
//!
//! | Type | Wraps | Purpose |
//! |------|-------|---------|
//! | [`RequestId`] | `Uuid` | Correlates one request with its one reply |
//! | [`CallerId`] | `u32` | Identifies the controller process that sent a request |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Unique identifier for request/reply correlation.
///
/// Generated fresh for every call, so replies to concurrent requests from the
/// same caller can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CallerId
// ============================================================================

/// Identifier of the process that originated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(u32);

impl CallerId {
    /// Creates a caller ID from a raw process id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the caller ID of the current process.
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// Returns the raw process id.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_id_serializes_as_plain_uuid() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").expect("uuid");
        let id = RequestId::from_uuid(uuid);

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_caller_id_current_matches_process() {
        assert_eq!(CallerId::current().as_u32(), std::process::id());
        assert_eq!(serde_json::to_string(&CallerId::new(42)).expect("serialize"), "42");
    }
}
