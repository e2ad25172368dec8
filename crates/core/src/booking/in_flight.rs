use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Re-entrancy flag for one asynchronous action.
///
/// Clones share the same flag, so a UI can hold one to render a busy state
/// while the owner awaits the collaborator.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    active: Arc<AtomicBool>,
}

impl InFlight {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claims the flag, or returns `None` when the action is already running.
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { active: Arc::clone(&self.active) })
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::InFlight;

    #[test]
    fn second_begin_is_refused_until_guard_drops() {
        let flag = InFlight::default();
        let observer = flag.clone();

        let guard = flag.try_begin().expect("first claim");
        assert!(observer.is_active());
        assert!(flag.try_begin().is_none());

        drop(guard);
        assert!(!observer.is_active());
        assert!(flag.try_begin().is_some());
    }
}
