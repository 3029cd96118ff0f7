//! Tick listener contract and registry

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::ListenerError;
use crate::TimeLapse;

/// Work performed once per tick.
///
/// Both callbacks run on the clock's execution thread, one listener at a time,
/// in registration order. A `TimeLapse` must not be retained beyond the call.
pub trait TickListener: Send + Sync {
    /// Called with the budget of the current tick. Listeners may consume part of it.
    fn tick(&self, time_lapse: &mut TimeLapse) -> Result<(), ListenerError>;

    /// Called once every listener has ticked. The budget is already exhausted.
    fn after_tick(&self, _time_lapse: &TimeLapse) -> Result<(), ListenerError> {
        Ok(())
    }
}

pub(crate) type ListenerSnapshot = Arc<Vec<Arc<dyn TickListener>>>;

/// Copy-on-write listener registry.
///
/// Readers take a snapshot (`Arc` clone) and iterate it without holding any lock,
/// so listeners may register or unregister other listeners mid-dispatch; such
/// changes become visible from the next tick on.
pub(crate) struct ListenerRegistry {
    listeners: RwLock<ListenerSnapshot>,
    write_lock: Mutex<()>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self { listeners: RwLock::new(Arc::new(Vec::new())), write_lock: Mutex::new(()) }
    }

    /// Returns `false` if the same listener is already registered
    pub(crate) fn register(&self, listener: Arc<dyn TickListener>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        if current.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(listener);
        *self.listeners.write() = Arc::new(next);
        true
    }

    pub(crate) fn unregister(&self, listener: &Arc<dyn TickListener>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        let Some(position) = current.iter().position(|existing| same_listener(existing, listener))
        else {
            return false;
        };

        let mut next: Vec<_> = current.iter().cloned().collect();
        next.remove(position);
        *self.listeners.write() = Arc::new(next);
        true
    }

    pub(crate) fn snapshot(&self) -> ListenerSnapshot {
        self.listeners.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

fn same_listener(a: &Arc<dyn TickListener>, b: &Arc<dyn TickListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl TickListener for Noop {
        fn tick(&self, _time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = ListenerRegistry::new();
        let listener: Arc<dyn TickListener> = Arc::new(Noop);

        assert!(registry.register(listener.clone()));
        assert!(!registry.register(listener.clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_instances_are_distinct_listeners() {
        let registry = ListenerRegistry::new();
        assert!(registry.register(Arc::new(Noop)));
        assert!(registry.register(Arc::new(Noop)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = ListenerRegistry::new();
        let a: Arc<dyn TickListener> = Arc::new(Noop);
        let b: Arc<dyn TickListener> = Arc::new(Noop);
        registry.register(a.clone());
        registry.register(b.clone());

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(same_listener(&snapshot[0], &b));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_changes() {
        let registry = ListenerRegistry::new();
        let a: Arc<dyn TickListener> = Arc::new(Noop);
        registry.register(a.clone());

        let snapshot = registry.snapshot();
        registry.register(Arc::new(Noop));
        registry.unregister(&a);

        assert_eq!(snapshot.len(), 1);
        assert!(same_listener(&snapshot[0], &a));
        assert_eq!(registry.len(), 1);
    }
}
