//! Protocol: the complete set of tasks of one component

use std::sync::Arc;

use super::element::Element;
use super::task::{ComponentId, Priority, ReadTask, Task, WriteTask};
use crate::error::Result;
use crate::transport::{ReadFunction, WriteFunction};

/// Read and write tasks of one component, registered and removed as a unit
#[derive(Debug)]
pub struct Protocol {
    component: ComponentId,
    unit_id: u8,
    reads: Vec<Arc<ReadTask>>,
    writes: Vec<Arc<WriteTask>>,
}

impl Protocol {
    /// Create an empty protocol for `component` talking to `unit_id`
    pub fn new(component: impl Into<ComponentId>, unit_id: u8) -> Self {
        Self {
            component: component.into(),
            unit_id,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Add a read task and return it
    pub fn add_read_task(
        &mut self,
        function: ReadFunction,
        priority: Priority,
        elements: Vec<Arc<Element>>,
    ) -> Result<Arc<ReadTask>> {
        let task = Arc::new(ReadTask::new(
            self.component.clone(),
            self.unit_id,
            function,
            priority,
            elements,
        )?);
        self.reads.push(task.clone());
        Ok(task)
    }

    /// Add a write task and return it
    pub fn add_write_task(
        &mut self,
        function: WriteFunction,
        elements: Vec<Arc<Element>>,
    ) -> Result<Arc<WriteTask>> {
        let task = Arc::new(WriteTask::new(
            self.component.clone(),
            self.unit_id,
            function,
            elements,
        )?);
        self.writes.push(task.clone());
        Ok(task)
    }

    /// Builder-style variant of [`Protocol::add_read_task`]
    pub fn with_read(
        mut self,
        function: ReadFunction,
        priority: Priority,
        elements: Vec<Arc<Element>>,
    ) -> Result<Self> {
        self.add_read_task(function, priority, elements)?;
        Ok(self)
    }

    /// Builder-style variant of [`Protocol::add_write_task`]
    pub fn with_write(mut self, function: WriteFunction, elements: Vec<Arc<Element>>) -> Result<Self> {
        self.add_write_task(function, elements)?;
        Ok(self)
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn read_tasks(&self) -> &[Arc<ReadTask>] {
        &self.reads
    }

    pub fn write_tasks(&self) -> &[Arc<WriteTask>] {
        &self.writes
    }

    pub fn read_tasks_with(&self, priority: Priority) -> impl Iterator<Item = &Arc<ReadTask>> {
        self.reads.iter().filter(move |t| t.priority() == priority)
    }

    pub fn task_count(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    /// Single task used to test whether a quarantined device answers again
    ///
    /// Prefers a HIGH read, then any read, then a write.
    pub fn probe_task(&self) -> Option<Task> {
        self.read_tasks_with(Priority::High)
            .next()
            .or_else(|| self.reads.first())
            .map(|t| Task::Read(t.clone()))
            .or_else(|| self.writes.first().map(|t| Task::Write(t.clone())))
    }
}
