//! Modbus transport interface
//!
//! The transport is the single physical link (serial line or TCP socket) shared by
//! all components of one bridge. It is owned exclusively by the worker loop and is
//! never accessed concurrently. Frame encoding and I/O timeouts are the
//! transport's concern.

pub mod simulator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::Result;

pub use simulator::SimulatedTransport;

/// Read function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadFunction {
    /// FC01
    Coils,
    /// FC02
    DiscreteInputs,
    /// FC03
    HoldingRegisters,
    /// FC04
    InputRegisters,
}

impl ReadFunction {
    pub fn code(self) -> u8 {
        match self {
            ReadFunction::Coils => 1,
            ReadFunction::DiscreteInputs => 2,
            ReadFunction::HoldingRegisters => 3,
            ReadFunction::InputRegisters => 4,
        }
    }

    /// Maximum quantity of one request
    pub fn max_quantity(self) -> u16 {
        match self {
            ReadFunction::Coils | ReadFunction::DiscreteInputs => MAX_READ_COILS,
            ReadFunction::HoldingRegisters | ReadFunction::InputRegisters => MAX_READ_REGISTERS,
        }
    }
}

/// Write function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteFunction {
    /// FC05
    SingleCoil,
    /// FC06
    SingleRegister,
    /// FC15
    MultipleCoils,
    /// FC16
    MultipleRegisters,
}

impl WriteFunction {
    pub fn code(self) -> u8 {
        match self {
            WriteFunction::SingleCoil => 5,
            WriteFunction::SingleRegister => 6,
            WriteFunction::MultipleCoils => 15,
            WriteFunction::MultipleRegisters => 16,
        }
    }

    pub fn max_quantity(self) -> u16 {
        match self {
            WriteFunction::SingleCoil | WriteFunction::SingleRegister => 1,
            WriteFunction::MultipleCoils => MAX_WRITE_COILS,
            WriteFunction::MultipleRegisters => MAX_WRITE_REGISTERS,
        }
    }

    pub fn is_coil(self) -> bool {
        matches!(self, WriteFunction::SingleCoil | WriteFunction::MultipleCoils)
    }
}

/// Physical Modbus link
///
/// Coil and discrete input values are carried as `0`/`1` words.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Read `quantity` items starting at `start`; returns exactly `quantity` values on success
    async fn read(
        &mut self,
        unit_id: u8,
        function: ReadFunction,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>>;

    /// Write `values` starting at `start`
    async fn write(
        &mut self,
        unit_id: u8,
        function: WriteFunction,
        start: u16,
        values: &[u16],
    ) -> Result<()>;
}
