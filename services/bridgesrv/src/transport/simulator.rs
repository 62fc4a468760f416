//! In-memory Modbus transport for testing and demo runs
//!
//! Each unit id owns a register image. Units can be taken offline or given an
//! error rate to exercise the quarantine path. The most recent requests are
//! recorded so tests can assert the dispatch order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::trace;

use super::{ModbusTransport, ReadFunction, WriteFunction};
use crate::constants::REQUEST_LOG_CAPACITY;
use crate::error::{BridgeError, Result};

/// One request as seen by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRequest {
    pub unit_id: u8,
    pub function_code: u8,
    pub start: u16,
    pub quantity: u16,
}

#[derive(Debug, Default)]
struct SimulatedUnit {
    holding_registers: HashMap<u16, u16>,
    input_registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete_inputs: HashMap<u16, bool>,
    offline: bool,
    error_rate: f64,
}

#[derive(Debug, Default)]
struct SimulatorState {
    units: HashMap<u8, SimulatedUnit>,
    requests: VecDeque<SimulatedRequest>,
    latency: Duration,
}

/// Cloneable handle to a shared simulated bus
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimulatorState>>,
}

impl SimulatedTransport {
    /// Create new simulator without units
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a responding unit (registers default to 0)
    pub fn add_unit(&self, unit_id: u8) {
        self.state.lock().units.entry(unit_id).or_default();
    }

    /// Simulate a device that stops answering
    pub fn set_offline(&self, unit_id: u8, offline: bool) {
        self.state.lock().units.entry(unit_id).or_default().offline = offline;
    }

    /// Probability in `[0, 1]` that a request to `unit_id` fails
    pub fn set_error_rate(&self, unit_id: u8, error_rate: f64) {
        self.state.lock().units.entry(unit_id).or_default().error_rate = error_rate.clamp(0.0, 1.0);
    }

    /// Delay applied to every request
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn set_holding_register(&self, unit_id: u8, address: u16, value: u16) {
        self.state
            .lock()
            .units
            .entry(unit_id)
            .or_default()
            .holding_registers
            .insert(address, value);
    }

    pub fn set_input_register(&self, unit_id: u8, address: u16, value: u16) {
        self.state
            .lock()
            .units
            .entry(unit_id)
            .or_default()
            .input_registers
            .insert(address, value);
    }

    pub fn set_discrete_input(&self, unit_id: u8, address: u16, value: bool) {
        self.state
            .lock()
            .units
            .entry(unit_id)
            .or_default()
            .discrete_inputs
            .insert(address, value);
    }

    pub fn holding_register(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.state
            .lock()
            .units
            .get(&unit_id)
            .and_then(|u| u.holding_registers.get(&address).copied())
    }

    pub fn coil(&self, unit_id: u8, address: u16) -> Option<bool> {
        self.state
            .lock()
            .units
            .get(&unit_id)
            .and_then(|u| u.coils.get(&address).copied())
    }

    /// The last [`REQUEST_LOG_CAPACITY`] requests, oldest first
    pub fn requests(&self) -> Vec<SimulatedRequest> {
        self.state.lock().requests.iter().cloned().collect()
    }

    /// Record the request and check that the unit answers
    fn begin(&self, request: SimulatedRequest) -> Result<()> {
        let mut state = self.state.lock();
        trace!(
            "Simulator request unit={} fc={} start={} qty={}",
            request.unit_id,
            request.function_code,
            request.start,
            request.quantity
        );
        let unit_id = request.unit_id;
        if state.requests.len() >= REQUEST_LOG_CAPACITY {
            state.requests.pop_front();
        }
        state.requests.push_back(request);

        let unit = state
            .units
            .get(&unit_id)
            .ok_or_else(|| BridgeError::timeout(format!("unit {} did not respond", unit_id)))?;
        if unit.offline {
            return Err(BridgeError::timeout(format!("unit {} is offline", unit_id)));
        }
        if unit.error_rate > 0.0 && rand::thread_rng().gen_bool(unit.error_rate) {
            return Err(BridgeError::transport(format!(
                "unit {} returned a CRC error",
                unit_id
            )));
        }
        Ok(())
    }

    fn latency(&self) -> Duration {
        self.state.lock().latency
    }
}

#[async_trait]
impl ModbusTransport for SimulatedTransport {
    async fn read(
        &mut self,
        unit_id: u8,
        function: ReadFunction,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.begin(SimulatedRequest {
            unit_id,
            function_code: function.code(),
            start,
            quantity,
        })?;

        let state = self.state.lock();
        let unit = state
            .units
            .get(&unit_id)
            .ok_or_else(|| BridgeError::timeout(format!("unit {} did not respond", unit_id)))?;

        let values = (0..quantity)
            .map(|offset| {
                let address = start.wrapping_add(offset);
                match function {
                    ReadFunction::HoldingRegisters => {
                        unit.holding_registers.get(&address).copied().unwrap_or(0)
                    },
                    ReadFunction::InputRegisters => {
                        unit.input_registers.get(&address).copied().unwrap_or(0)
                    },
                    ReadFunction::Coils => u16::from(unit.coils.get(&address).copied().unwrap_or(false)),
                    ReadFunction::DiscreteInputs => {
                        u16::from(unit.discrete_inputs.get(&address).copied().unwrap_or(false))
                    },
                }
            })
            .collect();
        Ok(values)
    }

    async fn write(
        &mut self,
        unit_id: u8,
        function: WriteFunction,
        start: u16,
        values: &[u16],
    ) -> Result<()> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.begin(SimulatedRequest {
            unit_id,
            function_code: function.code(),
            start,
            quantity: values.len() as u16,
        })?;

        let mut state = self.state.lock();
        let unit = state
            .units
            .get_mut(&unit_id)
            .ok_or_else(|| BridgeError::timeout(format!("unit {} did not respond", unit_id)))?;

        for (offset, value) in values.iter().enumerate() {
            let address = start.wrapping_add(offset as u16);
            if function.is_coil() {
                unit.coils.insert(address, *value != 0);
            } else {
                unit.holding_registers.insert(address, *value);
            }
        }
        Ok(())
    }
}
