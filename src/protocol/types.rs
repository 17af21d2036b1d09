//! Domain values carried inside payloads.
//!
//! These are the typed shapes the external collaborators deal in: file
//! descriptors for quick-pick style listings, update results produced by a
//! refresh, and the settings snapshot pushed to the worker.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// Status
// ============================================================================

/// Version-control status of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    /// Tracked and unchanged.
    Clean,
    /// Tracked with local modifications.
    Modified,
    /// Staged for addition.
    Added,
    /// Deleted from the working tree.
    Deleted,
    /// Renamed or moved.
    Renamed,
    /// Not tracked.
    Untracked,
    /// Matched by an ignore rule.
    Ignored,
    /// Unresolved merge conflict.
    Conflicted,
}

impl Status {
    /// Returns the wire name of this status.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Untracked => "untracked",
            Self::Ignored => "ignored",
            Self::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of statuses used to filter descriptors.
///
/// Ordered so the wire form is deterministic.
pub type StatusSet = BTreeSet<Status>;

// ============================================================================
// FileDescriptor
// ============================================================================

/// Lightweight reference to a file plus display and status metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// File name, shown as the primary label.
    pub label: String,

    /// Parent directory relative to the workspace root.
    pub description: String,

    /// Path relative to the workspace root.
    pub path: PathBuf,

    /// Version-control status.
    pub status: Status,

    /// Whether the active settings format this file on save.
    pub format_on_save: bool,
}

// ============================================================================
// RawFile
// ============================================================================

/// A file as seen on disk, without presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFile {
    /// Path relative to the workspace root.
    pub path: PathBuf,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

// ============================================================================
// UpdateResult
// ============================================================================

/// How a file changed between two refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateChange {
    /// File appeared.
    Added,
    /// File disappeared.
    Removed,
    /// File size or modification time changed.
    Changed,
}

/// One entry of a refresh report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// The file as last observed.
    pub file: RawFile,

    /// What happened to it.
    pub change: UpdateChange,
}

// ============================================================================
// SettingsSnapshot
// ============================================================================

/// Complete configuration pushed from the controller to the worker.
///
/// Always applied as a whole; the worker never merges two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsSnapshot {
    /// Workspace root to scan. `None` keeps the worker's launch root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Format files on save.
    pub format_on_save: bool,

    /// Include dot-files and dot-directories.
    pub include_hidden: bool,

    /// Regular expressions matched against workspace-relative paths.
    pub exclude: Vec<String>,
}

impl SettingsSnapshot {
    /// Creates a snapshot with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the workspace root.
    #[inline]
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Enables or disables format on save.
    #[inline]
    #[must_use]
    pub fn with_format_on_save(mut self, enabled: bool) -> Self {
        self.format_on_save = enabled;
        self
    }

    /// Enables or disables hidden files.
    #[inline]
    #[must_use]
    pub fn with_include_hidden(mut self, enabled: bool) -> Self {
        self.include_hidden = enabled;
        self
    }

    /// Adds an exclude pattern.
    #[inline]
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
