//! Modbus bridge facade
//!
//! One explicitly constructed [`ModbusBridge`] per physical link. Drivers
//! register their protocols, the host cycle clock fires the two cycle events,
//! and exactly one worker owns the transport.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{BridgeConfig, LogVerbosity};
use crate::error::Result;
use crate::scheduler::{
    Clock, CycleListener, CycleSummary, CycleTasksManager, DefectiveComponents, Listeners,
    Protocol, SystemClock, TaskRegistry, WaitDelayHandler, Worker, WorkerHandle,
};
use crate::status::{BridgeStatus, StatusSnapshot};
use crate::transport::ModbusTransport;

pub struct ModbusBridge {
    name: String,
    verbosity: LogVerbosity,
    registry: Arc<Mutex<TaskRegistry>>,
    defective: Arc<DefectiveComponents>,
    manager: Arc<CycleTasksManager>,
    status: Arc<BridgeStatus>,
    listener: Arc<dyn CycleListener>,
}

impl std::fmt::Debug for ModbusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusBridge")
            .field("name", &self.name)
            .field("verbosity", &self.verbosity)
            .field("manager", &self.manager)
            .finish()
    }
}

impl ModbusBridge {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock), Vec::new())
    }

    /// Build a bridge with an explicit clock and additional listeners
    pub fn with_clock(
        config: &BridgeConfig,
        clock: Arc<dyn Clock>,
        listeners: Vec<Arc<dyn CycleListener>>,
    ) -> Result<Self> {
        config.validate()?;

        let status = Arc::new(BridgeStatus::new());
        let mut fan_out = Listeners::new(listeners);
        fan_out.push(status.clone());
        let listener: Arc<dyn CycleListener> = Arc::new(fan_out);

        let registry = Arc::new(Mutex::new(TaskRegistry::new()));
        let defective = Arc::new(DefectiveComponents::new(clock.clone()));
        let manager = Arc::new(CycleTasksManager::new(
            registry.clone(),
            defective.clone(),
            WaitDelayHandler::new(clock),
            listener.clone(),
            config.pre_write_delay(),
        ));

        Ok(Self {
            name: config.name.clone(),
            verbosity: config.log_verbosity,
            registry,
            defective,
            manager,
            status,
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the protocol of a component; replaces a previous registration
    pub fn register(&self, protocol: Arc<Protocol>) {
        let component = protocol.component().clone();
        let tasks = protocol.task_count();
        self.registry.lock().add_protocol(protocol);
        info!(bridge = %self.name, component = %component, tasks, "Protocol registered");
    }

    /// Remove the protocol of a component; unknown ids are ignored
    ///
    /// Takes effect with the next cycle. The quarantine entry of the component is
    /// cleared as well.
    pub fn deregister(&self, component: &str) -> Option<Arc<Protocol>> {
        let removed = self.registry.lock().remove_protocol(component);
        if removed.is_some() {
            info!(bridge = %self.name, component = %component, "Protocol deregistered");
            if self.defective.remove(component) {
                self.listener
                    .on_communication_failed(!self.defective.is_empty());
            }
        }
        removed
    }

    /// Host event: release the write phase of the running cycle
    pub fn on_execute_write(&self) {
        self.manager.on_execute_write();
    }

    /// Host event: close the running cycle and schedule the next one
    pub fn on_before_process_image(&self) -> CycleSummary {
        let summary = self.manager.on_before_process_image();
        self.status.record_cycle();
        if self.verbosity == LogVerbosity::DebugLog {
            info!("{}", self.debug_log());
        }
        summary
    }

    /// Clear the quarantine of `component` without waiting for the retry interval
    pub fn retry_now(&self, component: &str) -> bool {
        let cleared = self.defective.remove(component);
        if cleared {
            info!(bridge = %self.name, component = %component, "Manual retry requested");
            self.listener
                .on_communication_failed(!self.defective.is_empty());
        } else if !self.registry.lock().contains(component) {
            warn!(bridge = %self.name, component = %component, "Retry requested for unknown component");
        }
        cleared
    }

    pub fn status(&self) -> StatusSnapshot {
        let defective = self
            .defective
            .components()
            .iter()
            .map(ToString::to_string)
            .collect();
        let total_tasks = self.registry.lock().task_count();
        self.status.snapshot(&self.name, defective, total_tasks)
    }

    /// One-line summary of the bridge state
    pub fn debug_log(&self) -> String {
        let snapshot = self.status();
        format!(
            "[{}] cycle={} delay={}ms too_short={} tasks={} executed={} failed={} defective=[{}]",
            snapshot.name,
            snapshot.cycles,
            snapshot.cycle_delay_ms,
            snapshot.cycle_time_is_too_short,
            snapshot.total_tasks,
            snapshot.executed_tasks,
            snapshot.failed_tasks,
            snapshot.defective_components.join(",")
        )
    }

    pub fn task_count(&self) -> usize {
        self.registry.lock().task_count()
    }

    pub fn component_task_count(&self, component: &str) -> Option<usize> {
        self.registry.lock().component_task_count(component)
    }

    pub fn defective_components(&self) -> &Arc<DefectiveComponents> {
        &self.defective
    }

    pub fn cycle_tasks_manager(&self) -> &Arc<CycleTasksManager> {
        &self.manager
    }

    /// Create the worker that owns `transport`
    pub fn worker(&self, transport: Box<dyn ModbusTransport>) -> Worker {
        Worker::new(
            self.name.clone(),
            self.manager.clone(),
            self.defective.clone(),
            transport,
            self.listener.clone(),
            self.status.clone(),
            self.verbosity,
        )
    }

    /// Run the worker on its own thread
    pub fn start(&self, transport: Box<dyn ModbusTransport>) -> Result<WorkerHandle> {
        WorkerHandle::spawn(self.worker(transport))
    }
}
