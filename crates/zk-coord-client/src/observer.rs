//! Path observer registry and event fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;
use zk_coord_store::paths;
use zk_coord_store::types::{EventKind, WatchedEvent};

/// Receives change events for paths it registered interest in.
///
/// Callbacks run on the connection's event-pump task and must not block;
/// dispatch anything slow to a separate task.
pub trait PathObserver: Send + Sync {
    /// A watch event for the observed path, or for a child of it when the
    /// event is a child deletion (the revocation check).
    fn on_event(&self, event: &WatchedEvent);

    /// The coordination object's state is no longer knowable -- an
    /// observed entity root vanished.
    fn on_state_unknown(&self);
}

/// Maps paths to registered observers and fans out watch events.
///
/// Events for paths with no observer on the path or its parent are
/// dropped before any further work.
#[derive(Default)]
pub struct ObserverManager {
    observers: Mutex<HashMap<String, Vec<Arc<dyn PathObserver>>>>,
}

impl ObserverManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &str, observer: Arc<dyn PathObserver>) {
        let mut observers = self.lock();
        observers.entry(path.to_string()).or_default().push(observer);
    }

    /// Removes one observer registration by identity.
    pub fn unregister(&self, path: &str, observer: &Arc<dyn PathObserver>) {
        let mut observers = self.lock();
        if let Some(list) = observers.get_mut(path) {
            list.retain(|o| !Arc::ptr_eq(o, observer));
            if list.is_empty() {
                observers.remove(path);
            }
        }
    }

    /// Whether any observer is registered for the exact path.
    pub fn is_observed(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    /// Tells every observer the store state is no longer knowable (an
    /// entity root vanished, or the whole session expired).
    pub fn signal_state_unknown(&self) {
        let all: Vec<_> = self.lock().values().flatten().cloned().collect();
        for observer in all {
            observer.on_state_unknown();
        }
    }

    /// Routes one watch event.
    ///
    /// Deletion of an observed path is an entity root vanishing: every
    /// observer, on every path, is told the state is unknown. Deletion of
    /// a child under an observed parent goes to the parent's observers
    /// (which check it against their held reservations). Everything else
    /// goes to exact-path observers only.
    pub fn dispatch(&self, event: &WatchedEvent) {
        let (exact, parent_list, all) = {
            let observers = self.lock();
            let exact = observers.get(&event.path).cloned();
            if event.kind == EventKind::NodeDeleted && exact.is_some() {
                (None, None, true)
            } else {
                let parent_list = if event.kind == EventKind::NodeDeleted {
                    paths::parent_of(&event.path)
                        .and_then(|parent| observers.get(parent).cloned())
                } else {
                    None
                };
                (exact, parent_list, false)
            }
        };

        if all {
            trace!(path = %event.path, "observed entity root deleted; signaling state unknown");
            self.signal_state_unknown();
            return;
        }
        if let Some(exact) = exact {
            for observer in exact {
                observer.on_event(event);
            }
            return;
        }
        if let Some(parent_list) = parent_list {
            for observer in parent_list {
                observer.on_event(event);
            }
            return;
        }
        trace!(path = %event.path, kind = ?event.kind, "dropping event for unobserved path");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<dyn PathObserver>>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
