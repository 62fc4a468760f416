//! Read and write tasks
//!
//! A task is one Modbus request over a contiguous address range, bound to the
//! component that owns it. Elements must be sorted by address and must not
//! overlap; gaps between elements are read but discarded.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::element::Element;
use crate::error::{BridgeError, Result};
use crate::transport::{ModbusTransport, ReadFunction, WriteFunction};

/// Id of the logical device (component) owning a protocol
pub type ComponentId = Arc<str>;

/// Scheduling class of a read task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Read every cycle, as late as possible
    High,
    /// Read round-robin, one task per cycle
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// Outcome of one task execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteState {
    /// Request succeeded; number of registers/coils transferred
    Ok(u32),
    /// Nothing to send
    NoOp,
    /// Transport failure
    Error(BridgeError),
}

/// Check element order and compute the covered `(start, length)`
fn covered_range(elements: &[Arc<Element>], max_quantity: u16) -> Result<(u16, u16)> {
    let first = elements
        .first()
        .ok_or_else(|| BridgeError::task("task has no elements"))?;
    let start = first.address();
    let mut end = u32::from(start);

    for element in elements {
        if element.length() == 0 {
            return Err(BridgeError::task(format!(
                "element at {} has zero length",
                element.address()
            )));
        }
        if u32::from(element.address()) < end {
            return Err(BridgeError::task(format!(
                "element at {} overlaps or is out of order",
                element.address()
            )));
        }
        end = element.end();
    }

    if end > u32::from(u16::MAX) + 1 {
        return Err(BridgeError::task("address range exceeds 65535"));
    }
    let length = end - u32::from(start);
    if length > u32::from(max_quantity) {
        return Err(BridgeError::task(format!(
            "range {}..{} spans {} items, limit is {}",
            start, end, length, max_quantity
        )));
    }
    Ok((start, length as u16))
}

/// Read task (FC01-FC04)
#[derive(Debug)]
pub struct ReadTask {
    component: ComponentId,
    unit_id: u8,
    function: ReadFunction,
    priority: Priority,
    start: u16,
    length: u16,
    elements: Vec<Arc<Element>>,
}

impl ReadTask {
    pub fn new(
        component: ComponentId,
        unit_id: u8,
        function: ReadFunction,
        priority: Priority,
        elements: Vec<Arc<Element>>,
    ) -> Result<Self> {
        let (start, length) = covered_range(&elements, function.max_quantity())?;
        Ok(Self {
            component,
            unit_id,
            function,
            priority,
            start,
            length,
            elements,
        })
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn function(&self) -> ReadFunction {
        self.function
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn elements(&self) -> &[Arc<Element>] {
        &self.elements
    }

    /// Read the covered range once and distribute the words to the elements
    pub async fn execute(&self, transport: &mut dyn ModbusTransport) -> ExecuteState {
        let words = match transport
            .read(self.unit_id, self.function, self.start, self.length)
            .await
        {
            Ok(words) => words,
            Err(e) => return ExecuteState::Error(e),
        };

        if words.len() < usize::from(self.length) {
            return ExecuteState::Error(BridgeError::transport(format!(
                "short response: expected {} words, got {}",
                self.length,
                words.len()
            )));
        }

        for element in &self.elements {
            let offset = usize::from(element.address() - self.start);
            element.update(&words[offset..offset + usize::from(element.length())]);
        }
        ExecuteState::Ok(u32::from(self.length))
    }
}

impl fmt::Display for ReadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} FC{} unit={} {}..{} {}",
            self.component,
            self.function.code(),
            self.unit_id,
            self.start,
            u32::from(self.start) + u32::from(self.length),
            self.priority
        )
    }
}

/// Write task (FC05, FC06, FC15, FC16)
#[derive(Debug)]
pub struct WriteTask {
    component: ComponentId,
    unit_id: u8,
    function: WriteFunction,
    start: u16,
    length: u16,
    elements: Vec<Arc<Element>>,
}

impl WriteTask {
    pub fn new(
        component: ComponentId,
        unit_id: u8,
        function: WriteFunction,
        elements: Vec<Arc<Element>>,
    ) -> Result<Self> {
        let (start, length) = covered_range(&elements, function.max_quantity())?;
        Ok(Self {
            component,
            unit_id,
            function,
            start,
            length,
            elements,
        })
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn function(&self) -> WriteFunction {
        self.function
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn elements(&self) -> &[Arc<Element>] {
        &self.elements
    }

    /// Take pending values and merge address-adjacent ones into blocks
    fn take_pending_blocks(&self) -> Vec<(u16, Vec<u16>)> {
        let mut blocks: Vec<(u16, Vec<u16>)> = Vec::new();
        for element in &self.elements {
            let Some(words) = element.take_next_write() else {
                continue;
            };
            let adjacent = blocks.last().is_some_and(|(start, block)| {
                u32::from(*start) + block.len() as u32 == u32::from(element.address())
            });
            if let (true, Some((_, block))) = (adjacent, blocks.last_mut()) {
                block.extend_from_slice(&words);
                continue;
            }
            blocks.push((element.address(), words));
        }
        blocks
    }

    /// Write all pending element values; `NoOp` when nothing is pending
    pub async fn execute(&self, transport: &mut dyn ModbusTransport) -> ExecuteState {
        let blocks = self.take_pending_blocks();
        if blocks.is_empty() {
            return ExecuteState::NoOp;
        }

        let mut written = 0u32;
        for (start, words) in blocks {
            if let Err(e) = transport
                .write(self.unit_id, self.function, start, &words)
                .await
            {
                return ExecuteState::Error(e);
            }
            written += words.len() as u32;
        }
        ExecuteState::Ok(written)
    }
}

impl fmt::Display for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} FC{} unit={} {}..{}",
            self.component,
            self.function.code(),
            self.unit_id,
            self.start,
            u32::from(self.start) + u32::from(self.length)
        )
    }
}

/// Any task of a protocol
#[derive(Debug, Clone)]
pub enum Task {
    Read(Arc<ReadTask>),
    Write(Arc<WriteTask>),
}

impl Task {
    pub fn component(&self) -> &ComponentId {
        match self {
            Task::Read(task) => task.component(),
            Task::Write(task) => task.component(),
        }
    }

    pub fn elements(&self) -> &[Arc<Element>] {
        match self {
            Task::Read(task) => task.elements(),
            Task::Write(task) => task.elements(),
        }
    }

    pub async fn execute(&self, transport: &mut dyn ModbusTransport) -> ExecuteState {
        match self {
            Task::Read(task) => task.execute(transport).await,
            Task::Write(task) => task.execute(transport).await,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Read(task) => write!(f, "read {}", task),
            Task::Write(task) => write!(f, "write {}", task),
        }
    }
}
