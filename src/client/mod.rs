//! Client facade.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ClientBuilder`] configuration and validation |
//! | `collaborators` | Settings and VCS seams |
//! | `core` | [`FileServiceClient`] operations and lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Client configuration.
pub mod builder;

/// Settings and VCS collaborators.
pub mod collaborators;

/// Client operations.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ClientBuilder, DEFAULT_MAX_START_ATTEMPTS};
pub use collaborators::{SettingsSource, SharedSettings, StaticSettings, VcsCollaborator};
pub use core::FileServiceClient;
