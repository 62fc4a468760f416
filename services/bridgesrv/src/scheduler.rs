//! Cycle-synchronized task scheduling
//!
//! - [`TaskRegistry`]: registered protocols and the per-cycle task snapshot
//! - [`DefectiveComponents`]: quarantine of failing components
//! - [`CycleTasksManager`]: the per-cycle state machine
//! - [`WaitDelayHandler`]: adaptive delay before HIGH reads
//! - [`Worker`]: executes tasks against the transport

pub mod clock;
pub mod cycle;
pub mod defective;
pub mod element;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod task;
pub mod wait_delay;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{CycleState, CycleSummary, CycleTask, CycleTasksManager};
pub use defective::DefectiveComponents;
pub use element::{Element, UpdateCallback};
pub use listener::{CycleListener, Listeners};
pub use protocol::Protocol;
pub use registry::{CycleTasks, TaskRegistry};
pub use task::{ComponentId, ExecuteState, Priority, ReadTask, Task, WriteTask};
pub use wait_delay::WaitDelayHandler;
pub use worker::{Worker, WorkerHandle};
