//! Host platform hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the host still has room for another exchange.
///
/// The background worker asks before each exchange and stops itself when
/// the answer is no; the lifecycle check re-spawns it later.
pub trait ResourceBudget: Send + Sync {
    fn has_headroom(&self) -> bool;
}

/// Budget for hosts without a memory constraint.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl ResourceBudget for Unbounded {
    fn has_headroom(&self) -> bool {
        true
    }
}

/// Budget toggled from outside, e.g. by a host memory monitor.
#[derive(Debug, Clone)]
pub struct SwitchBudget {
    headroom: Arc<AtomicBool>,
}

impl SwitchBudget {
    pub fn new(headroom: bool) -> Self {
        Self {
            headroom: Arc::new(AtomicBool::new(headroom)),
        }
    }

    pub fn set(&self, headroom: bool) {
        self.headroom.store(headroom, Ordering::Release);
    }
}

impl ResourceBudget for SwitchBudget {
    fn has_headroom(&self) -> bool {
        self.headroom.load(Ordering::Acquire)
    }
}
