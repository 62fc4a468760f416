//! Cycle ordering and quarantine scenarios driven through the bridge facade
//!
//! The worker is replaced by direct calls to `get_next_task` so every dispatch is
//! observable and the clock can be leapt deterministically.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use bridgesrv::{
    BridgeConfig, CycleListener, CycleTask, CycleTasksManager, Element, ManualClock,
    ModbusBridge, Priority, Protocol, ReadFunction, WriteFunction,
};
use parking_lot::Mutex;

fn bridge_with(listeners: Vec<Arc<dyn CycleListener>>) -> (Arc<ManualClock>, ModbusBridge) {
    let clock = Arc::new(ManualClock::new());
    let bridge =
        ModbusBridge::with_clock(&BridgeConfig::default(), clock.clone(), listeners).unwrap();
    (clock, bridge)
}

fn element(address: u16) -> Vec<Arc<Element>> {
    vec![Arc::new(Element::single(address))]
}

/// Name a dispatched step after the task's start address
fn label(task: &CycleTask) -> String {
    let (component, start) = match task {
        CycleTask::WaitDelay(_) => return "Delay".to_string(),
        CycleTask::WaitMutex => return "Mutex".to_string(),
        CycleTask::Read(task) => (task.component().to_string(), task.start()),
        CycleTask::Write(task) => (task.component().to_string(), task.start()),
    };
    let name = match start {
        49 => "RT_H_1",
        70 => "RT_H_2",
        20 => "RT_L_1",
        30 => "RT_L_2",
        90 => "WT_1",
        _ => return format!("{component}@{start}"),
    };
    name.to_string()
}

/// Drain one cycle; the write phase is released when the manager waits for it
fn drain(manager: &CycleTasksManager, bridge: &ModbusBridge) -> Vec<String> {
    let mut steps = Vec::new();
    let mut write_released = false;
    for _ in 0..64 {
        let task = manager.get_next_task();
        if let CycleTask::WaitMutex = task {
            if !write_released {
                steps.push("[execute-write]".to_string());
                bridge.on_execute_write();
                write_released = true;
                continue;
            }
            steps.push(label(&task));
            return steps;
        }
        steps.push(label(&task));
    }
    panic!("cycle did not finish: {steps:?}");
}

fn reference_protocol() -> Arc<Protocol> {
    Arc::new(
        Protocol::new("device0", 1)
            .with_read(ReadFunction::HoldingRegisters, Priority::High, element(49))
            .and_then(|p| p.with_read(ReadFunction::HoldingRegisters, Priority::High, element(70)))
            .and_then(|p| p.with_read(ReadFunction::HoldingRegisters, Priority::Low, element(20)))
            .and_then(|p| p.with_read(ReadFunction::HoldingRegisters, Priority::Low, element(30)))
            .and_then(|p| p.with_write(WriteFunction::MultipleRegisters, element(90)))
            .unwrap(),
    )
}

#[test]
fn test_reference_cycle_order_and_rotation() {
    let (_clock, bridge) = bridge_with(Vec::new());
    bridge.register(reference_protocol());
    let manager = bridge.cycle_tasks_manager().clone();

    bridge.on_before_process_image();
    assert_eq!(
        drain(&manager, &bridge),
        vec!["Delay", "RT_L_1", "[execute-write]", "WT_1", "Delay", "RT_H_1", "RT_H_2", "Mutex"]
    );

    bridge.on_before_process_image();
    assert_eq!(
        drain(&manager, &bridge),
        vec!["Delay", "RT_L_2", "[execute-write]", "WT_1", "Delay", "RT_H_1", "RT_H_2", "Mutex"]
    );

    // Rotation wraps around
    bridge.on_before_process_image();
    assert_eq!(drain(&manager, &bridge)[1], "RT_L_1");
}

#[test]
fn test_round_robin_fairness_across_components() {
    let (_clock, bridge) = bridge_with(Vec::new());
    for (id, unit) in [("a", 1u8), ("b", 2), ("c", 3)] {
        let protocol = Protocol::new(id, unit)
            .with_read(ReadFunction::InputRegisters, Priority::Low, element(100))
            .and_then(|p| p.with_read(ReadFunction::InputRegisters, Priority::Low, element(200)))
            .unwrap();
        bridge.register(Arc::new(protocol));
    }
    let manager = bridge.cycle_tasks_manager().clone();

    let mut seen = Vec::new();
    for _ in 0..6 {
        bridge.on_before_process_image();
        let steps = drain(&manager, &bridge);
        assert_eq!(steps.len(), 5, "one LOW read per cycle: {steps:?}");
        seen.push(steps[1].clone());
    }
    seen.sort();
    assert_eq!(seen, vec!["a@100", "a@200", "b@100", "b@200", "c@100", "c@200"]);
}

#[test]
fn test_defective_low_component_is_probed_after_retry_interval() {
    let (clock, bridge) = bridge_with(Vec::new());
    bridge.register(Arc::new(
        Protocol::new("sensor", 1)
            .with_read(ReadFunction::InputRegisters, Priority::Low, element(20))
            .unwrap(),
    ));
    bridge.register(Arc::new(
        Protocol::new("meter", 2)
            .with_read(ReadFunction::HoldingRegisters, Priority::High, element(49))
            .unwrap(),
    ));
    let manager = bridge.cycle_tasks_manager().clone();

    bridge.defective_components().add(&"sensor".into());

    // LOW slot is empty, HIGH slot unaffected
    bridge.on_before_process_image();
    assert_eq!(
        drain(&manager, &bridge),
        vec!["Delay", "[execute-write]", "Delay", "RT_H_1", "Mutex"]
    );

    clock.advance(Duration::from_secs(29));
    bridge.on_before_process_image();
    assert!(!drain(&manager, &bridge).contains(&"RT_L_1".to_string()));

    clock.advance(Duration::from_secs(2));
    bridge.on_before_process_image();
    let steps = drain(&manager, &bridge);
    assert_eq!(steps.iter().filter(|s| *s == "RT_L_1").count(), 1);
    // The probe runs with the HIGH reads, in registration order
    assert_eq!(
        steps,
        vec!["Delay", "[execute-write]", "Delay", "RT_L_1", "RT_H_1", "Mutex"]
    );
}

#[test]
fn test_deregister_takes_effect_next_cycle() {
    let (_clock, bridge) = bridge_with(Vec::new());
    bridge.register(reference_protocol());
    let manager = bridge.cycle_tasks_manager().clone();

    bridge.on_before_process_image();
    let first = manager.get_next_task();
    assert!(matches!(first, CycleTask::WaitDelay(_)));
    let low = manager.get_next_task();
    bridge.deregister("device0");

    // Already dispatched work of the current cycle is unaffected
    assert_eq!(label(&low), "RT_L_1");
    bridge.on_execute_write();
    assert_eq!(label(&manager.get_next_task()), "WT_1");

    bridge.on_before_process_image();
    assert_eq!(
        drain(&manager, &bridge),
        vec!["Delay", "[execute-write]", "Delay", "Mutex"]
    );
}

#[derive(Default)]
struct Recorder {
    too_short: Mutex<Vec<bool>>,
    delays: Mutex<Vec<Duration>>,
}

impl CycleListener for Recorder {
    fn on_cycle_time_is_too_short(&self, too_short: bool) {
        self.too_short.lock().push(too_short);
    }

    fn on_cycle_delay(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

#[test]
fn test_cycle_time_too_short_is_reported() {
    let recorder = Arc::new(Recorder::default());
    let (clock, bridge) = bridge_with(vec![recorder.clone() as Arc<dyn CycleListener>]);
    bridge.register(reference_protocol());
    let manager = bridge.cycle_tasks_manager().clone();

    bridge.on_before_process_image();
    drain(&manager, &bridge);
    clock.advance(Duration::from_millis(100));

    // Second cycle is cut off after the LOW read
    bridge.on_before_process_image();
    manager.get_next_task();
    manager.get_next_task();

    bridge.on_before_process_image();
    drain(&manager, &bridge);
    bridge.on_before_process_image();

    assert_eq!(*recorder.too_short.lock(), vec![true, false, true, false]);
    assert!(!bridge.status().cycle_time_is_too_short);

    let delays = recorder.delays.lock().clone();
    assert_eq!(delays.len(), 4);
    assert_eq!(delays[1], Duration::ZERO);
}
