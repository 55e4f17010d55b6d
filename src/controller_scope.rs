//! The loop-breaking mechanism (§4.7, §9).
//!
//! §9 flags the source's task-local flag as process-global mutable state
//! and recommends a scoped value bound for the dispatch closure instead.
//! This is modeled as a `Cell<bool>` plus an RAII guard: entering sets the
//! flag, and the guard's `Drop` clears it on every exit path (success,
//! error, or early return) without the caller having to remember to do so.

use std::cell::Cell;

/// Per-handler-task marker, set for the duration of any local mutation
/// caused by replay so the local mirror source does not re-emit the event.
///
/// Only ever touched from the single handler task for a link (§5) — no
/// synchronization needed, hence the plain `Cell` rather than an atomic.
#[derive(Default)]
pub struct ControllerScope {
    active: Cell<bool>,
}

impl ControllerScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the scope for the duration of the returned guard. The scope
    /// is exited (flag cleared) when the guard drops, on every outcome.
    pub fn enter(&self) -> ControllerScopeGuard<'_> {
        self.active.set(true);
        ControllerScopeGuard { scope: self }
    }

    /// Read by the local mirror source before deciding whether to emit an
    /// outbound mirror event for an observed mutation.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

/// Guard returned by [`ControllerScope::enter`]; clears the scope on drop.
pub struct ControllerScopeGuard<'a> {
    scope: &'a ControllerScope,
}

impl Drop for ControllerScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.active.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_active_only_within_guard_lifetime() {
        let scope = ControllerScope::new();
        assert!(!scope.is_active());
        {
            let _guard = scope.enter();
            assert!(scope.is_active());
        }
        assert!(!scope.is_active());
    }

    #[test]
    fn scope_clears_even_on_early_return_via_panic_unwind() {
        let scope = ControllerScope::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = scope.enter();
            panic!("simulated failure mid-dispatch");
        }));
        assert!(result.is_err());
        assert!(!scope.is_active(), "guard must clear the scope even on unwind");
    }
}
