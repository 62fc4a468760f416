//! Cycle state machine
//!
//! Every cycle runs through the same states:
//!
//! ```text
//! InitialWait -> ReadBeforeWrite -> WaitForWrite -> Write -> WaitBeforeRead -> ReadAfterWrite -> Finished
//!   Delay          LOW read          (mutex)         writes    Delay             HIGH reads        Mutex
//! ```
//!
//! `WaitForWrite` is released by `on_execute_write`, `Finished` by the next
//! `on_before_process_image`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::defective::DefectiveComponents;
use super::listener::CycleListener;
use super::registry::{CycleTasks, TaskRegistry};
use super::task::{ComponentId, ReadTask, Task, WriteTask};
use super::wait_delay::WaitDelayHandler;

/// Next step for the worker
#[derive(Debug, Clone)]
pub enum CycleTask {
    /// Sleep, interrupted by a new cycle
    WaitDelay(Duration),
    Read(Arc<ReadTask>),
    Write(Arc<WriteTask>),
    /// Block until the manager signals a change
    WaitMutex,
}

impl CycleTask {
    /// The Modbus task to execute, if any
    pub fn task(&self) -> Option<Task> {
        match self {
            CycleTask::Read(task) => Some(Task::Read(task.clone())),
            CycleTask::Write(task) => Some(Task::Write(task.clone())),
            CycleTask::WaitDelay(_) | CycleTask::WaitMutex => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    InitialWait,
    ReadBeforeWrite,
    WaitForWrite,
    Write,
    WaitBeforeRead,
    ReadAfterWrite,
    Finished,
}

/// Result of opening a new cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub tasks: usize,
    pub cycle_time_is_too_short: bool,
    pub cycle_delay: Duration,
}

#[derive(Debug)]
struct CycleInner {
    state: CycleState,
    low_read: Option<Arc<ReadTask>>,
    writes: std::vec::IntoIter<Arc<WriteTask>>,
    high_reads: std::vec::IntoIter<Arc<ReadTask>>,
    probed: Vec<ComponentId>,
    write_permitted: bool,
    cycle_time_is_too_short: bool,
    /// Number of cycles opened so far
    cycle_seq: u64,
    wait_delay: WaitDelayHandler,
}

impl CycleInner {
    fn install(&mut self, tasks: CycleTasks) {
        self.low_read = tasks.low_read;
        self.writes = tasks.writes.into_iter();
        self.high_reads = tasks.high_reads.into_iter();
        self.probed = tasks.probed;
        self.write_permitted = false;
        self.state = CycleState::InitialWait;
        self.cycle_seq = self.cycle_seq.wrapping_add(1);
    }

    /// Flag the measurement of this cycle if `component` is being probed
    fn mark_if_probe(&mut self, component: &ComponentId) {
        if self.probed.contains(component) {
            self.wait_delay.set_cycle_contained_defective_component();
        }
    }
}

/// Serves the tasks of the current cycle in order
pub struct CycleTasksManager {
    registry: Arc<Mutex<TaskRegistry>>,
    defective: Arc<DefectiveComponents>,
    listener: Arc<dyn CycleListener>,
    pre_write_delay: Duration,
    inner: Mutex<CycleInner>,
    /// Bumped on every event the worker may be waiting for
    event_tx: watch::Sender<u64>,
    /// Bumped only when a new cycle is opened
    cycle_tx: watch::Sender<u64>,
}

impl std::fmt::Debug for CycleTasksManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleTasksManager")
            .field("state", &self.state())
            .field("pre_write_delay", &self.pre_write_delay)
            .finish()
    }
}

impl CycleTasksManager {
    pub fn new(
        registry: Arc<Mutex<TaskRegistry>>,
        defective: Arc<DefectiveComponents>,
        wait_delay: WaitDelayHandler,
        listener: Arc<dyn CycleListener>,
        pre_write_delay: Duration,
    ) -> Self {
        let (event_tx, _) = watch::channel(0);
        let (cycle_tx, _) = watch::channel(0);
        Self {
            registry,
            defective,
            listener,
            pre_write_delay,
            inner: Mutex::new(CycleInner {
                // Nothing pending before the first cycle
                state: CycleState::Finished,
                low_read: None,
                writes: Vec::new().into_iter(),
                high_reads: Vec::new().into_iter(),
                probed: Vec::new(),
                write_permitted: false,
                cycle_time_is_too_short: false,
                cycle_seq: 0,
                wait_delay,
            }),
            event_tx,
            cycle_tx,
        }
    }

    /// Host event: close the running cycle and open the next one
    pub fn on_before_process_image(&self) -> CycleSummary {
        let (tasks, history_size) = {
            let mut registry = self.registry.lock();
            let tasks = registry.next_cycle_tasks(&self.defective);
            (tasks, registry.low_task_count())
        };
        let task_count = tasks.len();

        let (first, too_short, changed, delay) = {
            let mut inner = self.inner.lock();
            // Nothing was measured before the first cycle
            let first = inner.cycle_seq == 0;
            let too_short = first || inner.state != CycleState::Finished;
            let changed = first || too_short != inner.cycle_time_is_too_short;
            inner.cycle_time_is_too_short = too_short;

            inner.wait_delay.set_history_size(history_size);
            inner.wait_delay.on_before_process_image(too_short);
            let delay = inner.wait_delay.wait_delay();

            inner.install(tasks);
            (first, too_short, changed, delay)
        };

        if first {
            debug!(tasks = task_count, "First cycle opened, no timing measured yet");
        } else if changed {
            if too_short {
                warn!("Cycle time is too short: previous cycle was not drained");
            } else {
                debug!("Cycle time is sufficient again");
            }
        }
        self.listener.on_cycle_time_is_too_short(too_short);
        self.listener.on_cycle_delay(delay);

        self.cycle_tx.send_modify(|seq| *seq = seq.wrapping_add(1));
        self.event_tx.send_modify(|seq| *seq = seq.wrapping_add(1));

        CycleSummary {
            tasks: task_count,
            cycle_time_is_too_short: too_short,
            cycle_delay: delay,
        }
    }

    /// Host event: the write phase may begin
    pub fn on_execute_write(&self) {
        {
            let mut inner = self.inner.lock();
            inner.write_permitted = true;
            if inner.state == CycleState::WaitForWrite {
                inner.state = CycleState::Write;
            }
        }
        self.event_tx.send_modify(|seq| *seq = seq.wrapping_add(1));
    }

    /// A task dispatched in cycle `cycle` failed
    ///
    /// Marks the timing of that cycle as not representative. Returns `false`
    /// and changes nothing when `cycle` has already been closed.
    pub fn on_task_failed(&self, cycle: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.cycle_seq != cycle {
            debug!(
                cycle,
                current = inner.cycle_seq,
                "Ignoring failure of a task from a closed cycle"
            );
            return false;
        }
        inner.wait_delay.set_cycle_contained_defective_component();
        true
    }

    /// Return the task of the current state and advance the state machine
    pub fn get_next_task(&self) -> CycleTask {
        self.next_task_with_cycle().1
    }

    /// Like [`get_next_task`](Self::get_next_task), also returning the
    /// sequence number of the cycle the task belongs to
    pub fn next_task_with_cycle(&self) -> (u64, CycleTask) {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle_seq;
        (cycle, Self::advance(&mut inner, self.pre_write_delay))
    }

    fn advance(inner: &mut CycleInner, pre_write_delay: Duration) -> CycleTask {
        loop {
            match inner.state {
                CycleState::InitialWait => {
                    inner.state = CycleState::ReadBeforeWrite;
                    return CycleTask::WaitDelay(pre_write_delay);
                },
                CycleState::ReadBeforeWrite => {
                    inner.state = CycleState::WaitForWrite;
                    if let Some(task) = inner.low_read.take() {
                        inner.mark_if_probe(task.component());
                        return CycleTask::Read(task);
                    }
                },
                CycleState::WaitForWrite => {
                    if !inner.write_permitted {
                        return CycleTask::WaitMutex;
                    }
                    inner.state = CycleState::Write;
                },
                CycleState::Write => match inner.writes.next() {
                    Some(task) => {
                        inner.mark_if_probe(task.component());
                        return CycleTask::Write(task);
                    },
                    None => inner.state = CycleState::WaitBeforeRead,
                },
                CycleState::WaitBeforeRead => {
                    inner.state = CycleState::ReadAfterWrite;
                    return CycleTask::WaitDelay(inner.wait_delay.wait_delay());
                },
                CycleState::ReadAfterWrite => match inner.high_reads.next() {
                    Some(task) => {
                        inner.mark_if_probe(task.component());
                        return CycleTask::Read(task);
                    },
                    None => {
                        inner.state = CycleState::Finished;
                        inner.wait_delay.on_finished();
                    },
                },
                CycleState::Finished => return CycleTask::WaitMutex,
            }
        }
    }

    pub fn state(&self) -> CycleState {
        self.inner.lock().state
    }

    /// Sequence number of the current cycle, 0 before the first one
    pub fn cycle_sequence(&self) -> u64 {
        self.inner.lock().cycle_seq
    }

    pub fn cycle_time_is_too_short(&self) -> bool {
        self.inner.lock().cycle_time_is_too_short
    }

    pub fn wait_delay(&self) -> Duration {
        self.inner.lock().wait_delay.wait_delay()
    }

    /// Receiver that changes on any event (new cycle or execute-write)
    pub fn subscribe_events(&self) -> watch::Receiver<u64> {
        self.event_tx.subscribe()
    }

    /// Receiver that changes only when a new cycle is opened
    pub fn subscribe_cycles(&self) -> watch::Receiver<u64> {
        self.cycle_tx.subscribe()
    }
}
