//! Request and Response wire messages.
//!
//! Every message is one line of JSON shaped after JSON-RPC 2.0. There is a
//! single logical method, `"request"`; the operation is selected by the
//! envelope's `eventType`, never by the wire method.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::envelope::{RequestEnvelope, ResultEnvelope};

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The one wire method used for every request.
pub const METHOD_REQUEST: &str = "request";

/// Standard JSON-RPC error codes.
pub mod codes {
    /// JSON was not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method other than `"request"`.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Envelope failed to decode or validate.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Dispatcher failed without producing a result.
    pub const INTERNAL_ERROR: i64 = -32603;
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

// ============================================================================
// Request
// ============================================================================

/// A request from controller to worker.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": "uuid",
///   "method": "request",
///   "params": { "callerId": 4242, "eventType": "update" }
/// }
/// ```
///
/// `params` stays untyped on the wire so the worker can tell a bad method
/// from a bad envelope and answer each with its own error code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version marker.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Wire method, always [`METHOD_REQUEST`] for valid requests.
    pub method: String,

    /// Encoded [`RequestEnvelope`].
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the envelope cannot be encoded.
    pub fn new(envelope: &RequestEnvelope) -> Result<Self> {
        Self::with_id(RequestId::generate(), envelope)
    }

    /// Creates a new request with specific ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the envelope cannot be encoded.
    pub fn with_id(id: RequestId, envelope: &RequestEnvelope) -> Result<Self> {
        Ok(Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: METHOD_REQUEST.to_string(),
            params: serde_json::to_value(envelope)?,
        })
    }

    /// Decodes and validates the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if `params` is not a valid
    /// envelope or its payload does not match its event kind.
    pub fn envelope(&self) -> Result<RequestEnvelope> {
        let envelope: RequestEnvelope = serde_json::from_value(self.params.clone())
            .map_err(|e| Error::malformed_payload(format!("undecodable envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

// ============================================================================
// Response
// ============================================================================

/// A reply from worker to controller.
///
/// # Format
///
/// Success:
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": "uuid",
///   "result": { "eventType": "settings", "successful": true }
/// }
/// ```
///
/// Error:
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": "uuid",
///   "error": { "code": -32602, "message": "..." }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version marker.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    /// Matches the request `id`.
    pub id: RequestId,

    /// Result envelope (if the request was dispatched).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultEnvelope>,

    /// Wire error (if the request was rejected before dispatch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Creates a response carrying a result envelope.
    #[inline]
    #[must_use]
    pub fn result(id: RequestId, result: ResultEnvelope) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a response carrying a wire error.
    #[inline]
    #[must_use]
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    /// Extracts the result envelope, mapping wire errors to crate errors.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedPayload`] if the worker rejected the envelope
    /// - [`Error::Protocol`] for any other wire error, or a reply with
    ///   neither result nor error
    pub fn into_result(self) -> Result<ResultEnvelope> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error.into_error()),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::protocol(format!(
                "response {} has neither result nor error",
                self.id
            ))),
        }
    }
}

// ============================================================================
// ErrorObject
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code, see [`codes`].
    pub code: i64,

    /// Human-readable message.
    pub message: String,
}

impl ErrorObject {
    /// Converts the wire error into a crate error.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.code {
            codes::INVALID_PARAMS => Error::malformed_payload(self.message),
            code => Error::protocol(format!("worker error {code}: {}", self.message)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventKind, Payload, SettingsSnapshot};

    #[test]
    fn test_request_serialization() {
        let envelope = RequestEnvelope::new(
            EventKind::Settings,
            Some(Payload::Settings(SettingsSnapshot::default())),
        );
        let request = Request::new(&envelope).expect("request");
        let json = serde_json::to_string(&request).expect("serialize");

        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"request\""));
        assert!(json.contains("\"eventType\":\"settings\""));
    }

    #[test]
    fn test_request_envelope_roundtrip_validates() {
        let envelope = RequestEnvelope::new(EventKind::DescriptorsAll, None);
        let request = Request::new(&envelope).expect("request");
        assert_eq!(request.envelope().expect("valid"), envelope);
    }

    #[test]
    fn test_request_envelope_rejects_bad_params() {
        let json_str = r#"{
            "jsonrpc": "2.0",
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "method": "request",
            "params": { "callerId": 1, "eventType": "teleport" }
        }"#;
        let request: Request = serde_json::from_str(json_str).expect("parse");
        assert!(matches!(
            request.envelope(),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_success_response() {
        let json_str = r#"{
            "jsonrpc": "2.0",
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "result": { "eventType": "settings", "successful": true }
        }"#;

        let response: Response = serde_json::from_str(json_str).expect("parse");
        assert!(response.error.is_none());
        let result = response.into_result().expect("result");
        assert!(result.successful);
        assert_eq!(result.event_type, EventKind::Settings);
    }

    #[test]
    fn test_invalid_params_maps_to_malformed_payload() {
        let response = Response::error(
            RequestId::generate(),
            codes::INVALID_PARAMS,
            "settings request requires a settings payload",
        );
        assert!(response.result.is_none());
        assert!(matches!(
            response.into_result(),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_other_error_maps_to_protocol() {
        let response = Response::error(RequestId::generate(), codes::METHOD_NOT_FOUND, "nope");
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn test_empty_response_is_protocol_error() {
        let json_str = r#"{ "id": "550e8400-e29b-41d4-a716-446655440000" }"#;
        let response: Response = serde_json::from_str(json_str).expect("parse");
        assert!(matches!(response.into_result(), Err(Error::Protocol { .. })));
    }
}
