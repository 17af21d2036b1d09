//! In-process event bus.
//!
//! Carries two notifications between the client and its collaborators:
//!
//! | Event | Emitted by | Payload |
//! |-------|------------|---------|
//! | [`BusEventKind::WorkerReady`] | client, after a successful start | [`WorkerReadyEvent`] |
//! | [`BusEventKind::SettingsChanged`] | settings collaborator | [`SettingsSnapshot`] |
//!
//! Handlers run synchronously inside [`EventBus::emit`], in registration
//! order. A handler returning an error is logged and skipped; later handlers
//! still run.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use file_service::events::{BusEvent, BusEventKind, EventBus, EventHandler, HandlerError};
//!
//! let bus = EventBus::new();
//! let handler: EventHandler = Arc::new(|event: &BusEvent| -> Result<(), HandlerError> {
//!     println!("got {}", event.kind());
//!     Ok(())
//! });
//!
//! bus.on(BusEventKind::WorkerReady, Arc::clone(&handler));
//! bus.on(BusEventKind::WorkerReady, handler); // no-op, already registered
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::client::VcsCollaborator;
use crate::protocol::{ReadyData, SettingsSnapshot};

// ============================================================================
// Types
// ============================================================================

/// Error returned by a failing handler.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Event handler callback.
///
/// Identity is the allocation: registering a clone of the same `Arc` twice
/// is a no-op, registering two separately allocated closures is not.
pub type EventHandler = Arc<dyn Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync>;

// ============================================================================
// BusEventKind
// ============================================================================

/// Names of the events the bus carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEventKind {
    /// The worker completed its handshake and received settings.
    WorkerReady,
    /// The active settings changed.
    SettingsChanged,
}

impl fmt::Display for BusEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerReady => f.write_str("workerReady"),
            Self::SettingsChanged => f.write_str("settingsChanged"),
        }
    }
}

// ============================================================================
// BusEvent
// ============================================================================

/// Payload of [`BusEventKind::WorkerReady`].
#[derive(Clone)]
pub struct WorkerReadyEvent {
    /// Handshake data reported by the worker.
    pub worker: ReadyData,
    /// Downstream collaborator to activate, if configured.
    pub collaborator: Option<Arc<dyn VcsCollaborator>>,
}

impl fmt::Debug for WorkerReadyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerReadyEvent")
            .field("worker", &self.worker)
            .field("collaborator", &self.collaborator.as_ref().map(|c| c.name()))
            .finish()
    }
}

/// An event with its typed payload.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// See [`BusEventKind::WorkerReady`].
    WorkerReady(WorkerReadyEvent),
    /// See [`BusEventKind::SettingsChanged`].
    SettingsChanged(SettingsSnapshot),
}

impl BusEvent {
    /// Returns the event's name.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> BusEventKind {
        match self {
            Self::WorkerReady(_) => BusEventKind::WorkerReady,
            Self::SettingsChanged(_) => BusEventKind::SettingsChanged,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Process-wide publish/subscribe registry.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<FxHashMap<BusEventKind, Vec<EventHandler>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_struct("EventBus")
            .field(
                "handlers",
                &handlers.iter().map(|(k, v)| (*k, v.len())).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`.
    ///
    /// Returns `false` if the same handler was already registered for it.
    pub fn on(&self, kind: BusEventKind, handler: EventHandler) -> bool {
        let mut handlers = self.handlers.lock();
        let registered = handlers.entry(kind).or_default();

        if registered.iter().any(|h| same_handler(h, &handler)) {
            trace!(%kind, "Handler already registered");
            return false;
        }

        registered.push(handler);
        debug!(%kind, count = registered.len(), "Handler registered");
        true
    }

    /// Removes `handler` from `kind`.
    ///
    /// Returns `false` if it was not registered.
    pub fn off(&self, kind: BusEventKind, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(registered) = handlers.get_mut(&kind) else {
            return false;
        };

        let before = registered.len();
        registered.retain(|h| !same_handler(h, handler));
        before != registered.len()
    }

    /// Invokes every handler registered for the event's kind.
    ///
    /// Handlers run outside the registry lock, so they may register or
    /// emit themselves. Returns the number of handlers invoked.
    pub fn emit(&self, event: &BusEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = self
            .handlers
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for (index, handler) in snapshot.iter().enumerate() {
            if let Err(e) = handler(event) {
                warn!(%kind, index, error = %e, "Event handler failed");
            }
        }

        trace!(%kind, handlers = snapshot.len(), "Event emitted");
        snapshot.len()
    }

    /// Returns the number of handlers registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: BusEventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &BusEvent| -> Result<(), HandlerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn settings_event() -> BusEvent {
        BusEvent::SettingsChanged(SettingsSnapshot::default())
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);

        assert!(bus.on(BusEventKind::SettingsChanged, Arc::clone(&handler)));
        assert!(!bus.on(BusEventKind::SettingsChanged, Arc::clone(&handler)));
        assert_eq!(bus.handler_count(BusEventKind::SettingsChanged), 1);

        assert_eq!(bus.emit(&settings_event()), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_handler_different_kinds() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);

        assert!(bus.on(BusEventKind::SettingsChanged, Arc::clone(&handler)));
        assert!(bus.on(BusEventKind::WorkerReady, handler));

        bus.emit(&settings_event());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_does_not_stop_later_ones() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            Arc::new(move |_: &BusEvent| -> Result<(), HandlerError> {
                order.lock().push("first");
                Err("boom".into())
            }) as EventHandler
        };
        let second = {
            let order = Arc::clone(&order);
            Arc::new(move |_: &BusEvent| -> Result<(), HandlerError> {
                order.lock().push("second");
                Ok(())
            }) as EventHandler
        };

        bus.on(BusEventKind::SettingsChanged, first);
        bus.on(BusEventKind::SettingsChanged, second);

        assert_eq!(bus.emit(&settings_event()), 2);
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_off_and_reregister() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);

        bus.on(BusEventKind::SettingsChanged, Arc::clone(&handler));
        assert!(bus.off(BusEventKind::SettingsChanged, &handler));
        assert!(!bus.off(BusEventKind::SettingsChanged, &handler));
        assert_eq!(bus.emit(&settings_event()), 0);

        assert!(bus.on(BusEventKind::SettingsChanged, handler));
        bus.emit(&settings_event());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_register_during_emit() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let late = counting(&counter);

        let registering: EventHandler = Arc::new(move |_: &BusEvent| -> Result<(), HandlerError> {
            inner_bus.on(BusEventKind::SettingsChanged, Arc::clone(&late));
            Ok(())
        });
        bus.on(BusEventKind::SettingsChanged, registering);

        assert_eq!(bus.emit(&settings_event()), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emit(&settings_event()), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_kind() {
        let event = BusEvent::WorkerReady(WorkerReadyEvent {
            worker: ReadyData {
                process_id: 7,
                version: "1".into(),
            },
            collaborator: None,
        });
        assert_eq!(event.kind(), BusEventKind::WorkerReady);
        assert_eq!(event.kind().to_string(), "workerReady");
        assert_eq!(settings_event().kind(), BusEventKind::SettingsChanged);
    }
}
