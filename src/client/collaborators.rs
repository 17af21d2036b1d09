//! Collaborator seams of the client.
//!
//! The client does not own settings or version-control state. It reads them
//! through these traits and reacts to their changes through the
//! [`EventBus`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::RwLock;
use tracing::debug;

use crate::events::{BusEvent, EventBus};
use crate::protocol::{SettingsSnapshot, StatusSet};

// ============================================================================
// Traits
// ============================================================================

/// Supplies the settings to push to the worker.
pub trait SettingsSource: Send + Sync {
    /// Returns the complete current snapshot.
    fn snapshot(&self) -> SettingsSnapshot;
}

/// Version-control integration activated once the worker is ready.
pub trait VcsCollaborator: Send + Sync {
    /// Display name, used in logs.
    fn name(&self) -> &str;

    /// Statuses this collaborator lists.
    fn status_filter(&self) -> StatusSet;
}

// ============================================================================
// StaticSettings
// ============================================================================

/// A settings source that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(SettingsSnapshot);

impl StaticSettings {
    /// Wraps a fixed snapshot.
    #[inline]
    #[must_use]
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        Self(snapshot)
    }
}

impl SettingsSource for StaticSettings {
    fn snapshot(&self) -> SettingsSnapshot {
        self.0.clone()
    }
}

// ============================================================================
// SharedSettings
// ============================================================================

/// A mutable settings source that announces replacements on a bus.
///
/// Each [`replace`](Self::replace) emits
/// [`BusEvent::SettingsChanged`], which a started client answers by pushing
/// the new snapshot to its worker.
pub struct SharedSettings {
    current: RwLock<SettingsSnapshot>,
    bus: EventBus,
}

impl SharedSettings {
    /// Creates a source holding `initial` that publishes on `bus`.
    #[must_use]
    pub fn new(bus: EventBus, initial: SettingsSnapshot) -> Self {
        Self {
            current: RwLock::new(initial),
            bus,
        }
    }

    /// Replaces the snapshot and emits `SettingsChanged`.
    ///
    /// Returns the number of handlers notified.
    pub fn replace(&self, snapshot: SettingsSnapshot) -> usize {
        *self.current.write() = snapshot.clone();
        let notified = self.bus.emit(&BusEvent::SettingsChanged(snapshot));
        debug!(notified, "Settings replaced");
        notified
    }
}

impl SettingsSource for SharedSettings {
    fn snapshot(&self) -> SettingsSnapshot {
        self.current.read().clone()
    }
}

impl fmt::Debug for SharedSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSettings")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::events::{BusEventKind, EventHandler, HandlerError};

    #[test]
    fn test_static_settings() {
        let snapshot = SettingsSnapshot::new().with_format_on_save(true);
        let source = StaticSettings::new(snapshot.clone());
        assert_eq!(source.snapshot(), snapshot);
    }

    #[test]
    fn test_shared_settings_replace_emits() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicBool::new(false));

        let handler: EventHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |event: &BusEvent| -> Result<(), HandlerError> {
                if let BusEvent::SettingsChanged(snapshot) = event {
                    seen.store(snapshot.format_on_save, Ordering::SeqCst);
                }
                Ok(())
            })
        };
        bus.on(BusEventKind::SettingsChanged, handler);

        let source = SharedSettings::new(bus, SettingsSnapshot::default());
        assert!(!source.snapshot().format_on_save);

        let notified = source.replace(SettingsSnapshot::new().with_format_on_save(true));
        assert_eq!(notified, 1);
        assert!(source.snapshot().format_on_save);
        assert!(seen.load(Ordering::SeqCst));
    }
}
