//! Task registry
//!
//! Holds the registered protocols keyed by component id and computes the task
//! snapshot of each cycle:
//! - every HIGH read and every write of healthy components
//! - one probe task per defective component that is due for retry
//! - one LOW read, drawn round-robin over all healthy components

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use super::defective::DefectiveComponents;
use super::protocol::Protocol;
use super::task::{ComponentId, Priority, ReadTask, Task, WriteTask};

/// Per-cycle snapshot of the tasks to execute
#[derive(Debug, Default, Clone)]
pub struct CycleTasks {
    /// Round-robin LOW read of this cycle
    pub low_read: Option<Arc<ReadTask>>,
    /// HIGH reads plus probe reads of defective components due for retry
    pub high_reads: Vec<Arc<ReadTask>>,
    /// Writes of healthy components, in registration order
    pub writes: Vec<Arc<WriteTask>>,
    /// Defective components that contributed a probe task
    pub probed: Vec<ComponentId>,
}

impl CycleTasks {
    pub fn is_empty(&self) -> bool {
        self.low_read.is_none() && self.high_reads.is_empty() && self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        usize::from(self.low_read.is_some()) + self.high_reads.len() + self.writes.len()
    }
}

#[derive(Debug)]
struct Registration {
    sequence: u64,
    protocol: Arc<Protocol>,
}

/// Registered protocols plus the LOW round-robin state
#[derive(Debug, Default)]
pub struct TaskRegistry {
    protocols: HashMap<ComponentId, Registration>,
    next_sequence: u64,
    low_queue: VecDeque<Arc<ReadTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `protocol`, replacing any protocol of the same component
    pub fn add_protocol(&mut self, protocol: Arc<Protocol>) {
        let component = protocol.component().clone();
        self.purge_low_queue(&component);

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let replaced = self
            .protocols
            .insert(component.clone(), Registration { sequence, protocol })
            .is_some();
        debug!(component = %component, replaced, "Protocol registered");
    }

    /// Remove all tasks of `component`; unknown ids are ignored
    pub fn remove_protocol(&mut self, component: &str) -> Option<Arc<Protocol>> {
        let removed = self.protocols.remove(component)?;
        self.purge_low_queue(component);
        debug!(component = %component, "Protocol removed");
        Some(removed.protocol)
    }

    pub fn contains(&self, component: &str) -> bool {
        self.protocols.contains_key(component)
    }

    pub fn protocol(&self, component: &str) -> Option<Arc<Protocol>> {
        self.protocols.get(component).map(|r| r.protocol.clone())
    }

    pub fn component_count(&self) -> usize {
        self.protocols.len()
    }

    /// Number of tasks over all protocols
    pub fn task_count(&self) -> usize {
        self.protocols.values().map(|r| r.protocol.task_count()).sum()
    }

    /// Number of tasks of one component, `None` if not registered
    pub fn component_task_count(&self, component: &str) -> Option<usize> {
        self.protocols.get(component).map(|r| r.protocol.task_count())
    }

    /// Number of LOW reads, i.e. the length of one full round-robin period
    pub fn low_task_count(&self) -> usize {
        self.protocols
            .values()
            .map(|r| r.protocol.read_tasks_with(Priority::Low).count())
            .sum()
    }

    /// Protocols in registration order
    fn ordered(&self) -> Vec<&Arc<Protocol>> {
        let mut registrations: Vec<&Registration> = self.protocols.values().collect();
        registrations.sort_by_key(|r| r.sequence);
        registrations.into_iter().map(|r| &r.protocol).collect()
    }

    fn purge_low_queue(&mut self, component: &str) {
        self.low_queue.retain(|t| &**t.component() != component);
    }

    fn refill_low_queue(&mut self) {
        let tasks: Vec<Arc<ReadTask>> = self
            .ordered()
            .into_iter()
            .flat_map(|p| p.read_tasks_with(Priority::Low).cloned())
            .collect();
        self.low_queue.extend(tasks);
    }

    /// Next LOW read whose component is not defective
    ///
    /// The queue is refilled at most once per call; when that still yields
    /// nothing, the cycle gets no LOW read.
    fn next_low_priority_task(&mut self, defective: &DefectiveComponents) -> Option<Arc<ReadTask>> {
        let mut refilled = false;
        loop {
            while let Some(task) = self.low_queue.pop_front() {
                if !defective.is_known(task.component()) {
                    return Some(task);
                }
            }
            if refilled {
                return None;
            }
            self.refill_low_queue();
            refilled = true;
            if self.low_queue.is_empty() {
                return None;
            }
        }
    }

    /// Compute the task snapshot for the next cycle
    pub fn next_cycle_tasks(&mut self, defective: &DefectiveComponents) -> CycleTasks {
        let mut cycle = CycleTasks::default();

        for protocol in self.ordered() {
            let component = protocol.component();
            match defective.is_due_for_retry(component) {
                None => {
                    cycle
                        .high_reads
                        .extend(protocol.read_tasks_with(Priority::High).cloned());
                    cycle.writes.extend(protocol.write_tasks().iter().cloned());
                },
                Some(true) => match protocol.probe_task() {
                    Some(Task::Read(task)) => {
                        cycle.high_reads.push(task);
                        cycle.probed.push(component.clone());
                    },
                    Some(Task::Write(task)) => {
                        cycle.writes.push(task);
                        cycle.probed.push(component.clone());
                    },
                    None => {},
                },
                Some(false) => {},
            }
        }

        cycle.low_read = self.next_low_priority_task(defective);
        cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::clock::ManualClock;
    use crate::scheduler::element::Element;
    use crate::transport::{ReadFunction, WriteFunction};
    use std::time::Duration;

    fn element(address: u16) -> Vec<Arc<Element>> {
        vec![Arc::new(Element::single(address))]
    }

    fn protocol(id: &str, high: &[u16], low: &[u16], writes: &[u16]) -> Arc<Protocol> {
        let mut protocol = Protocol::new(id, 1);
        for &address in high {
            protocol
                .add_read_task(ReadFunction::HoldingRegisters, Priority::High, element(address))
                .unwrap();
        }
        for &address in low {
            protocol
                .add_read_task(ReadFunction::HoldingRegisters, Priority::Low, element(address))
                .unwrap();
        }
        for &address in writes {
            protocol
                .add_write_task(WriteFunction::MultipleRegisters, element(address))
                .unwrap();
        }
        Arc::new(protocol)
    }

    fn setup() -> (Arc<ManualClock>, DefectiveComponents, TaskRegistry) {
        let clock = Arc::new(ManualClock::new());
        let defective = DefectiveComponents::new(clock.clone());
        (clock, defective, TaskRegistry::new())
    }

    fn starts(tasks: &[Arc<ReadTask>]) -> Vec<u16> {
        tasks.iter().map(|t| t.start()).collect()
    }

    #[test]
    fn test_round_robin_visits_every_low_task_once() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("a", &[], &[1, 2, 3], &[]));
        registry.add_protocol(protocol("b", &[], &[4, 5], &[]));
        let n = registry.low_task_count();
        assert_eq!(n, 5);

        for _round in 0..3 {
            let mut seen: Vec<u16> = (0..n)
                .map(|_| {
                    registry
                        .next_cycle_tasks(&defective)
                        .low_read
                        .map(|t| t.start())
                        .unwrap()
                })
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_high_reads_and_writes_every_cycle_in_registration_order() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("b", &[20, 21], &[], &[90]));
        registry.add_protocol(protocol("a", &[10], &[], &[91]));

        for _ in 0..3 {
            let cycle = registry.next_cycle_tasks(&defective);
            assert_eq!(starts(&cycle.high_reads), vec![20, 21, 10]);
            let writes: Vec<u16> = cycle.writes.iter().map(|t| t.start()).collect();
            assert_eq!(writes, vec![90, 91]);
            assert!(cycle.low_read.is_none());
        }
        assert_eq!(registry.task_count(), 5);
        assert_eq!(registry.component_task_count("b"), Some(3));
        assert_eq!(registry.component_task_count("x"), None);
    }

    #[test]
    fn test_defective_component_excluded_until_due_then_probed_once() {
        let (clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("ok", &[1], &[], &[]));
        registry.add_protocol(protocol("dead", &[10, 11], &[12], &[13]));
        defective.add(&"dead".into());

        let cycle = registry.next_cycle_tasks(&defective);
        assert_eq!(starts(&cycle.high_reads), vec![1]);
        assert!(cycle.writes.is_empty());
        assert!(cycle.low_read.is_none());
        assert!(cycle.probed.is_empty());

        clock.advance(Duration::from_secs(31));
        let cycle = registry.next_cycle_tasks(&defective);
        assert_eq!(starts(&cycle.high_reads), vec![1, 10]);
        assert!(cycle.writes.is_empty());
        // LOW probing is reserved for the HIGH slot
        assert!(cycle.low_read.is_none());
        assert_eq!(cycle.probed.len(), 1);
    }

    #[test]
    fn test_write_only_component_is_probed_with_a_write() {
        let (clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("relay", &[], &[], &[40]));
        defective.add(&"relay".into());
        clock.advance(Duration::from_secs(31));

        let cycle = registry.next_cycle_tasks(&defective);
        assert_eq!(cycle.writes.len(), 1);
        assert_eq!(&*cycle.probed[0], "relay");
    }

    #[test]
    fn test_no_low_task_when_all_owners_defective() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("a", &[], &[1, 2], &[]));
        defective.add(&"a".into());

        let cycle = registry.next_cycle_tasks(&defective);
        assert!(cycle.low_read.is_none());
        assert!(cycle.is_empty());
    }

    #[test]
    fn test_remove_protocol_takes_effect_next_cycle() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("a", &[1], &[2, 3], &[]));
        registry.add_protocol(protocol("b", &[], &[4], &[]));

        // Fill the queue, consume the first LOW task of "a"
        assert_eq!(
            registry.next_cycle_tasks(&defective).low_read.map(|t| t.start()),
            Some(2)
        );
        assert!(registry.remove_protocol("a").is_some());
        assert!(registry.remove_protocol("a").is_none());

        let cycle = registry.next_cycle_tasks(&defective);
        assert!(cycle.high_reads.is_empty());
        assert_eq!(cycle.low_read.map(|t| t.start()), Some(4));
    }

    #[test]
    fn test_add_protocol_replaces_existing() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("a", &[1], &[], &[]));
        registry.add_protocol(protocol("a", &[7, 8], &[], &[]));

        assert_eq!(registry.component_count(), 1);
        let cycle = registry.next_cycle_tasks(&defective);
        assert_eq!(starts(&cycle.high_reads), vec![7, 8]);
    }

    #[test]
    fn test_every_task_of_healthy_components_is_scheduled() {
        let (_clock, defective, mut registry) = setup();
        registry.add_protocol(protocol("a", &[1, 2], &[3, 4], &[5]));
        registry.add_protocol(protocol("b", &[6], &[7], &[8, 9]));

        let rotation = registry.low_task_count();
        let mut low_seen = Vec::new();
        for _ in 0..rotation {
            let cycle = registry.next_cycle_tasks(&defective);
            assert_eq!(cycle.high_reads.len(), 3);
            assert_eq!(cycle.writes.len(), 3);
            low_seen.extend(cycle.low_read.map(|t| t.start()));
        }
        low_seen.sort_unstable();
        assert_eq!(low_seen, vec![3, 4, 7]);
    }
}
