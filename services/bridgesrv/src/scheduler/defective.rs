//! Quarantine table for components whose transport calls failed
//!
//! A component present in the table is defective; absence means healthy. The
//! timestamp of the first failure is kept until the entry is cleared, so a
//! component that keeps failing becomes due for retry on a fixed schedule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::clock::Clock;
use super::task::ComponentId;
use crate::constants::RETRY_INTERVAL;

#[derive(Debug)]
pub struct DefectiveComponents {
    clock: Arc<dyn Clock>,
    retry_interval: Duration,
    entries: Mutex<HashMap<ComponentId, Instant>>,
}

impl DefectiveComponents {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            retry_interval: RETRY_INTERVAL,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `component` defective; returns `true` if it was healthy before
    ///
    /// An already defective component keeps its original timestamp.
    pub fn add(&self, component: &ComponentId) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(component) {
            return false;
        }
        entries.insert(component.clone(), self.clock.now());
        warn!(component = %component, "Component marked defective");
        true
    }

    /// Clear the defective status; returns `true` if the component was defective
    pub fn remove(&self, component: &str) -> bool {
        let removed = self.entries.lock().remove(component).is_some();
        if removed {
            info!(component = %component, "Component no longer defective");
        }
        removed
    }

    pub fn is_known(&self, component: &str) -> bool {
        self.entries.lock().contains_key(component)
    }

    /// `None` if healthy, otherwise whether the retry interval has passed
    pub fn is_due_for_retry(&self, component: &str) -> Option<bool> {
        let marked_at = *self.entries.lock().get(component)?;
        let elapsed = self.clock.now().saturating_duration_since(marked_at);
        Some(elapsed > self.retry_interval)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ids of all defective components, sorted
    pub fn components(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
