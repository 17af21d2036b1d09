//! Handshake notifications.
//!
//! Notifications are one-way messages from the worker to the controller.
//! They carry no `id` and expect no reply. The worker sends exactly one of
//! them right after launch:
//!
//! | Method | Params | Meaning |
//! |--------|--------|---------|
//! | `ready` | [`ReadyData`] | Initialization finished, requests accepted |
//! | `initializeFailed` | message + [`FailureSignal`] | Initialization failed |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::envelope::FailureSignal;
use super::request::JSONRPC_VERSION;

// ============================================================================
// Constants
// ============================================================================

/// Method of the readiness notification.
pub const METHOD_READY: &str = "ready";

/// Method of the initialization-failure notification.
pub const METHOD_INITIALIZE_FAILED: &str = "initializeFailed";

// ============================================================================
// ReadyData
// ============================================================================

/// Data received in the `ready` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyData {
    /// Worker process id.
    pub process_id: u32,

    /// Worker crate version.
    pub version: String,
}

impl ReadyData {
    /// Returns the ready data of the current process.
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self {
            process_id: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A notification from worker to controller.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "method": "ready",
///   "params": { "processId": 4711, "version": "0.1.0" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version marker.
    pub jsonrpc: String,

    /// Notification name.
    pub method: String,

    /// Notification-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Creates a `ready` notification.
    #[must_use]
    pub fn ready(data: &ReadyData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: METHOD_READY.to_string(),
            params: json!({
                "processId": data.process_id,
                "version": data.version,
            }),
        }
    }

    /// Creates an `initializeFailed` notification.
    #[must_use]
    pub fn initialize_failed(message: impl Into<String>, signal: FailureSignal) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: METHOD_INITIALIZE_FAILED.to_string(),
            params: json!({
                "message": message.into(),
                "retry": signal.retry,
            }),
        }
    }

    /// Parses the notification into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedNotification {
        match self.method.as_str() {
            METHOD_READY => ParsedNotification::Ready(ReadyData {
                process_id: self.get_u64("processId") as u32,
                version: self.get_string("version"),
            }),

            METHOD_INITIALIZE_FAILED => ParsedNotification::InitializeFailed {
                message: self.get_string("message"),
                signal: FailureSignal {
                    retry: self.get_bool("retry"),
                },
            },

            _ => ParsedNotification::Unknown {
                method: self.method.clone(),
                params: self.params.clone(),
            },
        }
    }

    /// Gets a string from params.
    #[inline]
    fn get_string(&self, key: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 from params.
    #[inline]
    fn get_u64(&self, key: &str) -> u64 {
        self.params
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }

    /// Gets a bool from params.
    #[inline]
    fn get_bool(&self, key: &str) -> bool {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }
}

// ============================================================================
// ParsedNotification
// ============================================================================

/// Parsed notification types for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNotification {
    /// Worker finished initialization.
    Ready(ReadyData),

    /// Worker failed to initialize.
    InitializeFailed {
        /// Reason reported by the worker.
        message: String,
        /// Whether the controller should relaunch.
        signal: FailureSignal,
    },

    /// Unknown notification.
    Unknown {
        /// Notification method.
        method: String,
        /// Notification params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================
