//! Bridge status channels
//!
//! Lock-free counters and flags updated by the scheduler and readable from any
//! thread. [`StatusSnapshot`] is the serializable view of them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::scheduler::CycleListener;

#[derive(Debug, Default)]
pub struct BridgeStatus {
    cycle_time_is_too_short: AtomicBool,
    cycle_delay_us: AtomicU64,
    communication_failed: AtomicBool,
    cycles: AtomicU64,
    executed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
}

/// Point-in-time view of the bridge state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub cycle_time_is_too_short: bool,
    pub cycle_delay_ms: u64,
    /// At least one component is defective
    pub communication_failed: bool,
    pub defective_components: Vec<String>,
    pub total_tasks: usize,
    pub cycles: u64,
    pub executed_tasks: u64,
    pub failed_tasks: u64,
}

impl BridgeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_time_is_too_short(&self) -> bool {
        self.cycle_time_is_too_short.load(Ordering::Relaxed)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_micros(self.cycle_delay_us.load(Ordering::Relaxed))
    }

    pub fn communication_failed(&self) -> bool {
        self.communication_failed.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn executed_tasks(&self) -> u64 {
        self.executed_tasks.load(Ordering::Relaxed)
    }

    pub fn failed_tasks(&self) -> u64 {
        self.failed_tasks.load(Ordering::Relaxed)
    }

    pub fn snapshot(
        &self,
        name: &str,
        defective_components: Vec<String>,
        total_tasks: usize,
    ) -> StatusSnapshot {
        StatusSnapshot {
            name: name.to_string(),
            cycle_time_is_too_short: self.cycle_time_is_too_short(),
            cycle_delay_ms: self.cycle_delay().as_millis() as u64,
            communication_failed: self.communication_failed(),
            defective_components,
            total_tasks,
            cycles: self.cycles(),
            executed_tasks: self.executed_tasks(),
            failed_tasks: self.failed_tasks(),
        }
    }
}

impl CycleListener for BridgeStatus {
    fn on_cycle_time_is_too_short(&self, too_short: bool) {
        self.cycle_time_is_too_short.store(too_short, Ordering::Relaxed);
    }

    fn on_cycle_delay(&self, delay: Duration) {
        self.cycle_delay_us
            .store(delay.as_micros() as u64, Ordering::Relaxed);
    }

    fn on_communication_failed(&self, failed: bool) {
        self.communication_failed.store(failed, Ordering::Relaxed);
    }
}
