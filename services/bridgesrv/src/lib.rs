//! Modbus bridge scheduling core
//!
//! Many device drivers share one physical Modbus link. Each driver registers a
//! [`Protocol`] (its read and write tasks); a single [`Worker`] executes them in a
//! fixed order every host cycle:
//!
//! ```text
//! before-process-image                      execute-write
//!   │ Delay │ LOW read │ ... │ Writes │ Delay │ HIGH reads │ wait
//! ```
//!
//! - HIGH reads and writes run every cycle, one LOW read per cycle in round-robin
//! - components that fail are quarantined for 30 s and then probed with one task
//! - the delay before the HIGH reads adapts so they land just before the next cycle

pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod scheduler;
pub mod status;
pub mod transport;

pub use bridge::ModbusBridge;
pub use config::{BridgeConfig, LogVerbosity, LoggingConfig, SimulatedDevice};
pub use error::{BridgeError, Result};
pub use scheduler::{
    Clock, ComponentId, CycleListener, CycleTask, CycleTasksManager, DefectiveComponents,
    Element, ExecuteState, ManualClock, Priority, Protocol, SystemClock, Task, TaskRegistry,
    WaitDelayHandler, Worker, WorkerHandle,
};
pub use status::{BridgeStatus, StatusSnapshot};
pub use transport::{ModbusTransport, ReadFunction, SimulatedTransport, WriteFunction};
