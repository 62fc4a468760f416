//! Outward notifications of the scheduler
//!
//! The host application and device drivers observe the bridge through
//! [`CycleListener`]. All methods default to no-ops so implementors only
//! override what they consume.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::element::Element;
use super::task::ComponentId;

pub trait CycleListener: Send + Sync {
    /// Reported once per cycle; `true` if the previous cycle was not drained in time
    fn on_cycle_time_is_too_short(&self, _too_short: bool) {}

    /// Wait delay computed for the HIGH reads of the new cycle
    fn on_cycle_delay(&self, _delay: Duration) {}

    /// At least one component is defective (`true`) or all are healthy again
    fn on_communication_failed(&self, _failed: bool) {}

    /// Values of `elements` are stale after a transport failure
    fn on_invalidate(&self, _component: &ComponentId, _elements: &[Arc<Element>]) {}
}

/// Fan-out over several listeners
#[derive(Default, Clone)]
pub struct Listeners {
    inner: Vec<Arc<dyn CycleListener>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.inner.len())
            .finish()
    }
}

impl Listeners {
    pub fn new(listeners: Vec<Arc<dyn CycleListener>>) -> Self {
        Self { inner: listeners }
    }

    pub fn push(&mut self, listener: Arc<dyn CycleListener>) {
        self.inner.push(listener);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CycleListener for Listeners {
    fn on_cycle_time_is_too_short(&self, too_short: bool) {
        for listener in &self.inner {
            listener.on_cycle_time_is_too_short(too_short);
        }
    }

    fn on_cycle_delay(&self, delay: Duration) {
        for listener in &self.inner {
            listener.on_cycle_delay(delay);
        }
    }

    fn on_communication_failed(&self, failed: bool) {
        for listener in &self.inner {
            listener.on_communication_failed(failed);
        }
    }

    fn on_invalidate(&self, component: &ComponentId, elements: &[Arc<Element>]) {
        for listener in &self.inner {
            listener.on_invalidate(component, elements);
        }
    }
}
