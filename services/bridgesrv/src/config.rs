//! Bridge configuration
//!
//! Loaded through `common::load_config` (defaults, then file, then
//! `BRIDGESRV_` environment variables).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BRIDGE_NAME, DEFAULT_CYCLE_TIME_MS, DEFAULT_EXECUTE_WRITE_OFFSET_MS};
use crate::error::{BridgeError, Result};

/// How much per-task traffic the worker logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogVerbosity {
    #[default]
    None,
    /// One summary line per cycle
    DebugLog,
    /// Every executed task
    ReadsAndWrites,
    /// Every executed task including register values
    ReadsAndWritesVerbose,
    /// Every executed task including its duration
    ReadsAndWritesDurationTraceEvents,
}

impl LogVerbosity {
    pub fn logs_tasks(self) -> bool {
        matches!(
            self,
            LogVerbosity::ReadsAndWrites
                | LogVerbosity::ReadsAndWritesVerbose
                | LogVerbosity::ReadsAndWritesDurationTraceEvents
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge id used in logs and the worker thread name
    #[serde(default = "default_name")]
    pub name: String,

    /// Host cycle period
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Offset after cycle start at which writes are released
    #[serde(default = "default_execute_write_offset_ms")]
    pub execute_write_offset_ms: u64,

    /// Idle period at the start of every cycle, before the LOW read
    #[serde(default)]
    pub pre_write_delay_ms: u64,

    #[serde(default)]
    pub log_verbosity: LogVerbosity,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Devices served by the simulated transport
    #[serde(default)]
    pub simulator: Vec<SimulatedDevice>,

    /// Response time of every simulated request
    #[serde(default)]
    pub simulator_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: common::LogFormat,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: common::LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub component_id: String,
    pub unit_id: u8,

    /// Device never answers
    #[serde(default)]
    pub fail: bool,

    /// Probability in `[0, 1]` that a request fails
    #[serde(default)]
    pub error_rate: f64,
}

fn default_name() -> String {
    DEFAULT_BRIDGE_NAME.to_string()
}

fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}

fn default_execute_write_offset_ms() -> u64 {
    DEFAULT_EXECUTE_WRITE_OFFSET_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            cycle_time_ms: default_cycle_time_ms(),
            execute_write_offset_ms: default_execute_write_offset_ms(),
            pre_write_delay_ms: 0,
            log_verbosity: LogVerbosity::default(),
            logging: LoggingConfig::default(),
            simulator: Vec::new(),
            simulator_latency_ms: 0,
        }
    }
}

impl BridgeConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    pub fn execute_write_offset(&self) -> Duration {
        Duration::from_millis(self.execute_write_offset_ms)
    }

    pub fn pre_write_delay(&self) -> Duration {
        Duration::from_millis(self.pre_write_delay_ms)
    }

    pub fn simulator_latency(&self) -> Duration {
        Duration::from_millis(self.simulator_latency_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::config("bridge name must not be empty"));
        }
        if self.cycle_time_ms == 0 {
            return Err(BridgeError::config("cycle_time_ms must be greater than 0"));
        }
        if self.execute_write_offset_ms >= self.cycle_time_ms {
            return Err(BridgeError::config(format!(
                "execute_write_offset_ms ({}) must be less than cycle_time_ms ({})",
                self.execute_write_offset_ms, self.cycle_time_ms
            )));
        }
        if self.pre_write_delay_ms >= self.cycle_time_ms {
            return Err(BridgeError::config(format!(
                "pre_write_delay_ms ({}) must be less than cycle_time_ms ({})",
                self.pre_write_delay_ms, self.cycle_time_ms
            )));
        }
        if self.simulator_latency_ms >= self.cycle_time_ms {
            return Err(BridgeError::config(format!(
                "simulator_latency_ms ({}) must be less than cycle_time_ms ({})",
                self.simulator_latency_ms, self.cycle_time_ms
            )));
        }

        let mut seen = HashSet::new();
        for device in &self.simulator {
            if !seen.insert(device.component_id.as_str()) {
                return Err(BridgeError::config(format!(
                    "duplicate simulated component: {}",
                    device.component_id
                )));
            }
            if !(0.0..=1.0).contains(&device.error_rate) {
                return Err(BridgeError::config(format!(
                    "error_rate of {} must be within [0, 1]",
                    device.component_id
                )));
            }
        }
        Ok(())
    }
}
