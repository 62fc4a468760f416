//! Worker loop
//!
//! The only code path that touches the transport. Runs on its own thread with a
//! current-thread tokio runtime and pulls tasks from the [`CycleTasksManager`]
//! until cancelled.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cycle::{CycleTask, CycleTasksManager};
use super::defective::DefectiveComponents;
use super::listener::CycleListener;
use super::task::{ExecuteState, Task};
use crate::config::LogVerbosity;
use crate::error::{BridgeError, Result};
use crate::status::BridgeStatus;
use crate::transport::ModbusTransport;

pub struct Worker {
    name: String,
    manager: Arc<CycleTasksManager>,
    defective: Arc<DefectiveComponents>,
    transport: Box<dyn ModbusTransport>,
    listener: Arc<dyn CycleListener>,
    status: Arc<BridgeStatus>,
    verbosity: LogVerbosity,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        manager: Arc<CycleTasksManager>,
        defective: Arc<DefectiveComponents>,
        transport: Box<dyn ModbusTransport>,
        listener: Arc<dyn CycleListener>,
        status: Arc<BridgeStatus>,
        verbosity: LogVerbosity,
    ) -> Self {
        Self {
            name: name.into(),
            manager,
            defective,
            transport,
            listener,
            status,
            verbosity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull and execute tasks until `token` is cancelled
    pub async fn run(mut self, token: CancellationToken) {
        let mut events = self.manager.subscribe_events();
        let mut cycles = self.manager.subscribe_cycles();
        info!(bridge = %self.name, "Modbus worker started");

        loop {
            // Anything signalled after this point wakes the wait below
            events.borrow_and_update();
            cycles.borrow_and_update();
            let (cycle, next) = self.manager.next_task_with_cycle();

            let keep_running = tokio::select! {
                biased;
                () = token.cancelled() => false,
                keep_running = self.step(cycle, next, &mut events, &mut cycles) => keep_running,
            };
            if !keep_running {
                break;
            }
        }

        info!(bridge = %self.name, "Modbus worker stopped");
    }

    async fn step(
        &mut self,
        cycle: u64,
        next: CycleTask,
        events: &mut watch::Receiver<u64>,
        cycles: &mut watch::Receiver<u64>,
    ) -> bool {
        match next {
            CycleTask::WaitMutex => events.changed().await.is_ok(),
            CycleTask::WaitDelay(delay) if delay.is_zero() => true,
            CycleTask::WaitDelay(delay) => {
                // A new cycle cuts the delay short
                tokio::select! {
                    () = tokio::time::sleep(delay) => true,
                    changed = cycles.changed() => changed.is_ok(),
                }
            },
            CycleTask::Read(task) => {
                self.execute_in_cycle(&Task::Read(task), cycle).await;
                true
            },
            CycleTask::Write(task) => {
                self.execute_in_cycle(&Task::Write(task), cycle).await;
                true
            },
        }
    }

    /// Execute one task of the current cycle and apply the quarantine rules
    pub async fn execute(&mut self, task: &Task) -> ExecuteState {
        let cycle = self.manager.cycle_sequence();
        self.execute_in_cycle(task, cycle).await
    }

    /// Execute a task dispatched in cycle `cycle`
    ///
    /// A failure only spoils the wait-delay measurement if `cycle` is still open.
    pub async fn execute_in_cycle(&mut self, task: &Task, cycle: u64) -> ExecuteState {
        let started = Instant::now();
        let state = task.execute(self.transport.as_mut()).await;
        self.log_task(task, &state, started.elapsed());

        match &state {
            ExecuteState::Ok(_) => {
                self.status.record_executed();
                if self.defective.remove(task.component()) {
                    self.listener
                        .on_communication_failed(!self.defective.is_empty());
                }
            },
            ExecuteState::NoOp => {},
            ExecuteState::Error(e) => {
                self.status.record_failed();
                warn!(
                    bridge = %self.name,
                    component = %task.component(),
                    task = %task,
                    communication = e.is_communication_error(),
                    "Task failed: {}", e
                );
                self.manager.on_task_failed(cycle);
                self.defective.add(task.component());
                for element in task.elements() {
                    element.invalidate();
                }
                self.listener.on_invalidate(task.component(), task.elements());
                self.listener.on_communication_failed(true);
            },
        }
        state
    }

    fn log_task(&self, task: &Task, state: &ExecuteState, elapsed: Duration) {
        if !self.verbosity.logs_tasks() || matches!(state, ExecuteState::NoOp) {
            return;
        }
        let outcome = match state {
            ExecuteState::Ok(count) => format!("ok({count})"),
            ExecuteState::NoOp => "noop".to_string(),
            ExecuteState::Error(e) => format!("error({e})"),
        };
        match self.verbosity {
            LogVerbosity::ReadsAndWritesVerbose => {
                let values: Vec<Option<Vec<u16>>> =
                    task.elements().iter().map(|element| element.value()).collect();
                info!(bridge = %self.name, task = %task, outcome = %outcome, values = ?values, "Executed");
            },
            LogVerbosity::ReadsAndWritesDurationTraceEvents => {
                info!(
                    bridge = %self.name,
                    task = %task,
                    outcome = %outcome,
                    duration_us = elapsed.as_micros() as u64,
                    "Executed"
                );
            },
            _ => info!(bridge = %self.name, task = %task, outcome = %outcome, "Executed"),
        }
    }
}

/// Owns the worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start `worker` on a dedicated thread named `modbus-<name>`
    pub fn spawn(worker: Worker) -> Result<Self> {
        let name = worker.name().to_string();
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::internal(format!("failed to build worker runtime: {e}")))?;

        let thread = std::thread::Builder::new()
            .name(format!("modbus-{name}"))
            .spawn(move || runtime.block_on(worker.run(worker_token)))
            .map_err(|e| BridgeError::internal(format!("failed to spawn worker thread: {e}")))?;

        debug!(bridge = %name, "Worker thread spawned");
        Ok(Self {
            name,
            token,
            thread: Some(thread),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the worker and wait for the thread to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| BridgeError::internal(format!("worker {} panicked", self.name)))?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::clock::{Clock, SystemClock};
    use crate::scheduler::element::Element;
    use crate::scheduler::protocol::Protocol;
    use crate::scheduler::registry::TaskRegistry;
    use crate::scheduler::task::Priority;
    use crate::scheduler::wait_delay::WaitDelayHandler;
    use crate::transport::{ReadFunction, SimulatedTransport};
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    struct Setup {
        registry: Arc<Mutex<TaskRegistry>>,
        defective: Arc<DefectiveComponents>,
        manager: Arc<CycleTasksManager>,
        status: Arc<BridgeStatus>,
        sim: SimulatedTransport,
    }

    fn setup() -> (Setup, Worker) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(Mutex::new(TaskRegistry::new()));
        let defective = Arc::new(DefectiveComponents::new(clock.clone()));
        let status = Arc::new(BridgeStatus::new());
        let listener: Arc<dyn CycleListener> = status.clone();
        let manager = Arc::new(CycleTasksManager::new(
            registry.clone(),
            defective.clone(),
            WaitDelayHandler::new(clock),
            listener.clone(),
            Duration::ZERO,
        ));
        let sim = SimulatedTransport::new();
        let worker = Worker::new(
            "test",
            manager.clone(),
            defective.clone(),
            Box::new(sim.clone()),
            listener,
            status.clone(),
            LogVerbosity::ReadsAndWrites,
        );
        (
            Setup {
                registry,
                defective,
                manager,
                status,
                sim,
            },
            worker,
        )
    }

    fn read_task(component: &str, unit_id: u8) -> (Arc<Element>, Task) {
        let element = Arc::new(Element::new(0, 2));
        let task = Protocol::new(component, unit_id)
            .add_read_task(
                ReadFunction::HoldingRegisters,
                Priority::High,
                vec![element.clone()],
            )
            .unwrap();
        (element, Task::Read(task))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_quarantines_and_invalidates() {
        let (s, mut worker) = setup();
        s.sim.add_unit(1);
        s.sim.set_holding_register(1, 0, 7);
        s.sim.set_holding_register(1, 1, 8);
        let (element, task) = read_task("meter0", 1);

        assert!(matches!(worker.execute(&task).await, ExecuteState::Ok(2)));
        assert_eq!(element.value(), Some(vec![7, 8]));
        assert_eq!(s.status.executed_tasks(), 1);

        s.sim.set_offline(1, true);
        assert!(matches!(worker.execute(&task).await, ExecuteState::Error(_)));
        assert!(s.defective.is_known("meter0"));
        assert_eq!(element.value(), None);
        assert!(s.status.communication_failed());
        assert_eq!(s.status.failed_tasks(), 1);
        assert!(logs_contain("Task failed"));

        s.sim.set_offline(1, false);
        assert!(matches!(worker.execute(&task).await, ExecuteState::Ok(2)));
        assert!(!s.defective.is_known("meter0"));
        assert!(!s.status.communication_failed());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_after_cycle_closed_still_quarantines() {
        let (s, mut worker) = setup();
        s.sim.add_unit(1);
        s.sim.set_offline(1, true);
        let (element, task) = read_task("meter0", 1);

        s.manager.on_before_process_image();
        let dispatched = s.manager.cycle_sequence();
        // The host opens the next cycle while the request is in flight
        s.manager.on_before_process_image();

        let state = worker.execute_in_cycle(&task, dispatched).await;
        assert!(matches!(state, ExecuteState::Error(_)));
        assert!(s.defective.is_known("meter0"));
        assert_eq!(element.value(), None);
        assert!(logs_contain("Ignoring failure of a task from a closed cycle"));
    }

    #[tokio::test]
    async fn test_noop_leaves_state_untouched() {
        let (s, mut worker) = setup();
        let element = Arc::new(Element::single(5));
        let task = Protocol::new("meter0", 1)
            .add_write_task(
                crate::transport::WriteFunction::SingleRegister,
                vec![element],
            )
            .unwrap();

        s.defective.add(&"meter0".into());
        assert!(matches!(
            worker.execute(&Task::Write(task)).await,
            ExecuteState::NoOp
        ));
        assert!(s.defective.is_known("meter0"));
        assert_eq!(s.status.executed_tasks(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_cycles_until_cancelled() {
        let (s, worker) = setup();
        s.sim.add_unit(1);
        let element = Arc::new(Element::new(0, 2));
        let protocol = Protocol::new("meter0", 1)
            .with_read(ReadFunction::HoldingRegisters, Priority::High, vec![element.clone()])
            .unwrap();
        s.registry.lock().add_protocol(Arc::new(protocol));

        let token = CancellationToken::new();
        let handle = tokio::spawn(worker.run(token.clone()));

        for _ in 0..3 {
            s.manager.on_before_process_image();
            s.manager.on_execute_write();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();
        handle.await.unwrap();
        assert_eq!(s.status.executed_tasks(), 3);
        assert!(!s.manager.cycle_time_is_too_short());
        assert_eq!(element.value(), Some(vec![0, 0]));
    }
}
