//! Request and result envelopes.
//!
//! The envelope is the typed body of every request: which operation to run
//! ([`EventKind`]) and its argument ([`Payload`]). Each kind accepts exactly
//! one payload shape, or none, in each direction:
//!
//! | EventKind | Request payload | Successful result payload |
//! |-----------|-----------------|---------------------------|
//! | `update` | none | update result list |
//! | `descriptorsAll` | none | descriptor list |
//! | `descriptorsByStatus` | status filter | descriptor list |
//! | `settings` | settings snapshot | none |
//!
//! Validation guards the untyped wire representation and runs on both
//! sides of the channel.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::CallerId;

use super::types::{FileDescriptor, RawFile, SettingsSnapshot, StatusSet, UpdateResult};

// ============================================================================
// EventKind
// ============================================================================

/// The operation a request asks the worker to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Rescan the workspace.
    Update,
    /// List every descriptor.
    DescriptorsAll,
    /// List descriptors whose status is in a filter.
    DescriptorsByStatus,
    /// Replace the worker configuration.
    Settings,
}

impl EventKind {
    /// All event kinds.
    pub const ALL: [EventKind; 4] = [
        Self::Update,
        Self::DescriptorsAll,
        Self::DescriptorsByStatus,
        Self::Settings,
    ];

    /// Returns the wire name of this kind.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::DescriptorsAll => "descriptorsAll",
            Self::DescriptorsByStatus => "descriptorsByStatus",
            Self::Settings => "settings",
        }
    }

    /// Payload shape a request of this kind must carry.
    #[inline]
    #[must_use]
    pub const fn request_shape(&self) -> Option<PayloadShape> {
        match self {
            Self::Update | Self::DescriptorsAll => None,
            Self::DescriptorsByStatus => Some(PayloadShape::StatusFilter),
            Self::Settings => Some(PayloadShape::Settings),
        }
    }

    /// Payload shape a successful result of this kind must carry.
    #[inline]
    #[must_use]
    pub const fn result_shape(&self) -> Option<PayloadShape> {
        match self {
            Self::Update => Some(PayloadShape::UpdateResults),
            Self::DescriptorsAll | Self::DescriptorsByStatus => Some(PayloadShape::Descriptors),
            Self::Settings => None,
        }
    }

    /// Returns `true` if the operation only reads worker state.
    #[inline]
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::DescriptorsAll | Self::DescriptorsByStatus)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Tagged union of everything that can travel inside an envelope.
///
/// # Format
///
/// ```json
/// { "kind": "descriptors", "value": [ ... ] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Payload {
    /// A single file descriptor.
    Descriptor(FileDescriptor),
    /// A list of file descriptors.
    Descriptors(Vec<FileDescriptor>),
    /// A single update result.
    UpdateResult(UpdateResult),
    /// A list of update results.
    UpdateResults(Vec<UpdateResult>),
    /// A single raw file.
    File(RawFile),
    /// A list of raw files.
    Files(Vec<RawFile>),
    /// A settings snapshot.
    Settings(SettingsSnapshot),
    /// A status filter.
    StatusFilter(StatusSet),
}

impl Payload {
    /// Returns the shape of this payload.
    #[inline]
    #[must_use]
    pub const fn shape(&self) -> PayloadShape {
        match self {
            Self::Descriptor(_) => PayloadShape::Descriptor,
            Self::Descriptors(_) => PayloadShape::Descriptors,
            Self::UpdateResult(_) => PayloadShape::UpdateResult,
            Self::UpdateResults(_) => PayloadShape::UpdateResults,
            Self::File(_) => PayloadShape::File,
            Self::Files(_) => PayloadShape::Files,
            Self::Settings(_) => PayloadShape::Settings,
            Self::StatusFilter(_) => PayloadShape::StatusFilter,
        }
    }
}

/// Data-less discriminant of [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadShape {
    /// [`Payload::Descriptor`].
    Descriptor,
    /// [`Payload::Descriptors`].
    Descriptors,
    /// [`Payload::UpdateResult`].
    UpdateResult,
    /// [`Payload::UpdateResults`].
    UpdateResults,
    /// [`Payload::File`].
    File,
    /// [`Payload::Files`].
    Files,
    /// [`Payload::Settings`].
    Settings,
    /// [`Payload::StatusFilter`].
    StatusFilter,
}

impl fmt::Display for PayloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Descriptor => "descriptor",
            Self::Descriptors => "descriptors",
            Self::UpdateResult => "updateResult",
            Self::UpdateResults => "updateResults",
            Self::File => "file",
            Self::Files => "files",
            Self::Settings => "settings",
            Self::StatusFilter => "statusFilter",
        };
        f.write_str(name)
    }
}

/// Checks a payload against the shape the table expects.
fn check_shape(
    kind: EventKind,
    direction: &str,
    expected: Option<PayloadShape>,
    actual: Option<&Payload>,
) -> Result<()> {
    match (expected, actual.map(Payload::shape)) {
        (None, None) => Ok(()),
        (Some(want), Some(got)) if want == got => Ok(()),
        (None, Some(got)) => Err(Error::malformed_payload(format!(
            "{kind} {direction} takes no payload, got {got}"
        ))),
        (Some(want), None) => Err(Error::malformed_payload(format!(
            "{kind} {direction} requires a {want} payload"
        ))),
        (Some(want), Some(got)) => Err(Error::malformed_payload(format!(
            "{kind} {direction} requires a {want} payload, got {got}"
        ))),
    }
}

// ============================================================================
// RequestEnvelope
// ============================================================================

/// Parameters of a request.
///
/// # Format
///
/// ```json
/// {
///   "callerId": 4242,
///   "eventType": "descriptorsByStatus",
///   "payload": { "kind": "statusFilter", "value": ["modified"] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Process that originated the request.
    pub caller_id: CallerId,

    /// Operation to perform.
    pub event_type: EventKind,

    /// Operation argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl RequestEnvelope {
    /// Creates an envelope for the current process.
    #[inline]
    #[must_use]
    pub fn new(event_type: EventKind, payload: Option<Payload>) -> Self {
        Self {
            caller_id: CallerId::current(),
            event_type,
            payload,
        }
    }

    /// Checks the payload shape against the event kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] on a mismatch.
    pub fn validate(&self) -> Result<()> {
        check_shape(
            self.event_type,
            "request",
            self.event_type.request_shape(),
            self.payload.as_ref(),
        )
    }
}

// ============================================================================
// ResultEnvelope
// ============================================================================

/// Outcome of a request, returned exactly once.
///
/// # Format
///
/// Success:
/// ```json
/// { "eventType": "descriptorsAll", "successful": true, "payload": { ... } }
/// ```
///
/// Failure:
/// ```json
/// { "eventType": "update", "successful": false, "message": "root missing" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    /// Kind of the request this answers.
    pub event_type: EventKind,

    /// Whether the operation succeeded.
    pub successful: bool,

    /// Failure explanation, or an informational note on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Operation output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl ResultEnvelope {
    /// Creates a successful result.
    #[inline]
    #[must_use]
    pub fn success(event_type: EventKind, payload: Option<Payload>) -> Self {
        Self {
            event_type,
            successful: true,
            message: None,
            payload,
        }
    }

    /// Creates an unsuccessful result.
    #[inline]
    #[must_use]
    pub fn failure(event_type: EventKind, message: impl Into<String>) -> Self {
        Self {
            event_type,
            successful: false,
            message: Some(message.into()),
            payload: None,
        }
    }

    /// Checks that this result answers a request of `requested` kind and
    /// carries the shape the table allows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] on a mismatch.
    pub fn validate_for(&self, requested: EventKind) -> Result<()> {
        if self.event_type != requested {
            return Err(Error::malformed_payload(format!(
                "result tagged {} answers a {requested} request",
                self.event_type
            )));
        }

        if !self.successful {
            return check_shape(self.event_type, "failure", None, self.payload.as_ref());
        }

        check_shape(
            self.event_type,
            "result",
            self.event_type.result_shape(),
            self.payload.as_ref(),
        )
    }

    /// Returns the failure message, or a generic one.
    #[inline]
    #[must_use]
    pub fn failure_message(&self) -> &str {
        self.message.as_deref().unwrap_or("operation failed")
    }

    /// Converts an unsuccessful result into [`Error::OperationFailed`] and
    /// returns the payload of a successful one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if `successful` is false.
    pub fn into_payload(self) -> Result<Option<Payload>> {
        if self.successful {
            Ok(self.payload)
        } else {
            Err(Error::operation_failed(
                self.event_type,
                self.failure_message(),
            ))
        }
    }

    /// Extracts a descriptor list.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationFailed`] if the result is unsuccessful
    /// - [`Error::MalformedPayload`] if the payload is not a descriptor list
    pub fn into_descriptors(self) -> Result<Vec<FileDescriptor>> {
        let kind = self.event_type;
        match self.into_payload()? {
            Some(Payload::Descriptors(descriptors)) => Ok(descriptors),
            other => Err(unexpected(kind, PayloadShape::Descriptors, other.as_ref())),
        }
    }

    /// Extracts an update result list.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationFailed`] if the result is unsuccessful
    /// - [`Error::MalformedPayload`] if the payload is not an update list
    pub fn into_update_results(self) -> Result<Vec<UpdateResult>> {
        let kind = self.event_type;
        match self.into_payload()? {
            Some(Payload::UpdateResults(results)) => Ok(results),
            other => Err(unexpected(kind, PayloadShape::UpdateResults, other.as_ref())),
        }
    }
}

fn unexpected(kind: EventKind, want: PayloadShape, got: Option<&Payload>) -> Error {
    match got {
        Some(payload) => Error::malformed_payload(format!(
            "{kind} result carries {}, expected {want}",
            payload.shape()
        )),
        None => Error::malformed_payload(format!("{kind} result carries no {want} payload")),
    }
}

// ============================================================================
// FailureSignal
// ============================================================================

/// Tells the controller whether to relaunch after an initialization
/// failure. Never used for steady-state requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureSignal {
    /// Relaunch and try the handshake again.
    pub retry: bool,
}

// ============================================================================
// Tests
// ============================================================================
