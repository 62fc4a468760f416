//! Modbus bridge constants

use std::time::Duration;

/// Maximum registers per read request (FC03/FC04)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils/discrete inputs per read request (FC01/FC02)
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum registers per write request (FC16)
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum coils per write request (FC15)
pub const MAX_WRITE_COILS: u16 = 1968;

/// Time a defective component stays quarantined before one probe task is scheduled
pub const RETRY_INTERVAL: Duration = Duration::from_millis(30_000);

/// Safety margin subtracted from the shortest observed waiting time
pub const WAIT_DELAY_BUFFER: Duration = Duration::from_millis(20);

/// Number of requests the simulated transport keeps for inspection
pub const REQUEST_LOG_CAPACITY: usize = 1024;

/// Default bridge id
pub const DEFAULT_BRIDGE_NAME: &str = "modbus0";

/// Default host cycle period
pub const DEFAULT_CYCLE_TIME_MS: u64 = 1000;

/// Default offset of the execute-write event within a cycle
pub const DEFAULT_EXECUTE_WRITE_OFFSET_MS: u64 = 100;
