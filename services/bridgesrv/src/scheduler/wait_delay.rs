//! Adaptive wait delay before HIGH reads
//!
//! After the HIGH reads of a cycle are done a stopwatch starts. At the next
//! before-process-image event the time we could additionally have waited is
//! `last_waiting_time + elapsed`. The shortest of these observations over one
//! full LOW round-robin period, minus a safety buffer, becomes the next delay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use super::clock::Clock;
use crate::constants::WAIT_DELAY_BUFFER;

#[derive(Debug)]
pub struct WaitDelayHandler {
    clock: Arc<dyn Clock>,
    history: VecDeque<Duration>,
    history_size: usize,
    stopwatch: Option<Instant>,
    last_waiting_time: Duration,
    cycle_contained_defective_component: bool,
}

impl WaitDelayHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: VecDeque::new(),
            history_size: 1,
            stopwatch: None,
            last_waiting_time: Duration::ZERO,
            cycle_contained_defective_component: false,
        }
    }

    /// Resize the history to one full round-robin period (at least one entry)
    pub fn set_history_size(&mut self, size: usize) {
        self.history_size = size.max(1);
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
    }

    /// All tasks of the cycle are finished; start measuring the spare time
    pub fn on_finished(&mut self) {
        if self.stopwatch.is_none() {
            self.stopwatch = Some(self.clock.now());
        }
    }

    /// The running cycle touched a defective component; its measurement is skipped
    pub fn set_cycle_contained_defective_component(&mut self) {
        self.cycle_contained_defective_component = true;
    }

    /// Close the measurement of the finished cycle and compute the next delay
    pub fn on_before_process_image(&mut self, cycle_time_is_too_short: bool) {
        let possible_waiting_time = match self.stopwatch.take() {
            Some(started) if !cycle_time_is_too_short => {
                self.last_waiting_time + self.clock.now().saturating_duration_since(started)
            },
            _ => Duration::ZERO,
        };

        if std::mem::take(&mut self.cycle_contained_defective_component) {
            self.prune_zero_artifacts();
        } else {
            if self.history.len() >= self.history_size {
                self.history.pop_front();
            }
            self.history.push_back(possible_waiting_time);
        }

        self.last_waiting_time = self.compute_wait_delay();
        trace!(
            possible_ms = possible_waiting_time.as_millis() as u64,
            delay_ms = self.last_waiting_time.as_millis() as u64,
            "Wait delay updated"
        );
    }

    /// Drop trailing zero entries that follow a real measurement
    fn prune_zero_artifacts(&mut self) {
        if self.history.iter().all(Duration::is_zero) {
            return;
        }
        while self.history.back().is_some_and(Duration::is_zero) {
            self.history.pop_back();
        }
    }

    fn compute_wait_delay(&self) -> Duration {
        self.history
            .iter()
            .min()
            .map(|shortest| shortest.saturating_sub(WAIT_DELAY_BUFFER))
            .unwrap_or(Duration::ZERO)
    }

    /// Delay to apply before the HIGH reads of the current cycle
    pub fn wait_delay(&self) -> Duration {
        self.last_waiting_time
    }

    /// Copy of the observation history, oldest first
    pub fn history(&self) -> Vec<Duration> {
        self.history.iter().copied().collect()
    }
}
