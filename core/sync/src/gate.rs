//! Re-entrancy guard between engine writes and the push hook.
//!
//! While an import, a resync or a push holds the gate, record saves that the
//! engine itself performs must not trigger another push.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared push gate.
///
/// Clones share the same hold count, so a host can hand a clone to its save
/// hook while the engine keeps the original. The gate stays closed while any
/// guard is alive, whatever order overlapping operations release in.
#[derive(Debug, Clone, Default)]
pub struct PushGate {
    holds: Arc<AtomicUsize>,
}

impl PushGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate until the returned guard is dropped.
    ///
    /// Holds nest and may overlap; the gate opens when the last one drops.
    pub fn hold(&self) -> PushGuard {
        self.holds.fetch_add(1, Ordering::SeqCst);
        PushGuard {
            holds: Arc::clone(&self.holds),
        }
    }

    /// Whether an engine operation currently holds the gate.
    pub fn is_held(&self) -> bool {
        self.holds.load(Ordering::SeqCst) > 0
    }
}

/// Scoped hold on a [`PushGate`]. Releases on drop, including unwinds and
/// early `?` returns.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct PushGuard {
    holds: Arc<AtomicUsize>,
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        self.holds.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsbridge_common::{Error, Result};

    #[test]
    fn test_hold_and_release() {
        let gate = PushGate::new();
        assert!(!gate.is_held());

        {
            let _guard = gate.hold();
            assert!(gate.is_held());
        }

        assert!(!gate.is_held());
    }

    #[test]
    fn test_nested_hold_keeps_outer() {
        let gate = PushGate::new();
        let outer = gate.hold();
        {
            let _inner = gate.hold();
        }
        assert!(gate.is_held());
        drop(outer);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_overlapping_holds_released_out_of_order() {
        let gate = PushGate::new();
        let first = gate.hold();
        let second = gate.hold();

        drop(first);
        assert!(gate.is_held());
        drop(second);
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_overlapping_tasks_leave_gate_open() {
        let gate = PushGate::new();
        let (release_first, wait_first) = tokio::sync::oneshot::channel::<()>();

        let long = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _guard = gate.hold();
                let _ = wait_first.await;
            })
        };
        tokio::task::yield_now().await;

        let short = gate.hold();
        let _ = release_first.send(());
        long.await.unwrap();
        assert!(gate.is_held());

        drop(short);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_released_on_error_path() {
        fn failing(gate: &PushGate) -> Result<()> {
            let _guard = gate.hold();
            Err(Error::Validation("boom".to_string()))
        }

        let gate = PushGate::new();
        assert!(failing(&gate).is_err());
        assert!(!gate.is_held());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = PushGate::new();
        let observer = gate.clone();
        let _guard = gate.hold();
        assert!(observer.is_held());
    }

    #[test]
    fn test_separate_gates_are_independent() {
        let a = PushGate::new();
        let b = PushGate::new();
        let _guard = a.hold();
        assert!(!b.is_held());
    }
}
