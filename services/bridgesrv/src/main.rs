//! Modbus bridge service
//!
//! Runs the scheduler against the simulated transport, driven by a tokio
//! interval acting as the host cycle clock.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use bridgesrv::{
    BridgeConfig, Element, ModbusBridge, Priority, Protocol, ReadFunction, SimulatedDevice,
    SimulatedTransport, WriteFunction,
};
use common::LogConfig;

#[derive(Parser, Debug)]
#[command(name = "bridgesrv", version, about = "Modbus bridge scheduling service")]
struct Args {
    /// Configuration file (.yaml, .toml or .json)
    #[arg(short, long, env = "BRIDGESRV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Disable colored console output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config: BridgeConfig = common::load_config("bridgesrv", args.config.as_deref())?;
    config.validate()?;

    common::logging::init_with_config(LogConfig {
        service_name: "bridgesrv".to_string(),
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
        ansi: !args.no_color,
        log_dir: config.logging.dir.clone(),
    })?;

    info!(
        "Starting bridge {} (cycle {}ms, write offset {}ms)",
        config.name, config.cycle_time_ms, config.execute_write_offset_ms
    );

    let devices = if config.simulator.is_empty() {
        warn!("No simulated devices configured, using a single device meter0@1");
        vec![SimulatedDevice {
            component_id: "meter0".to_string(),
            unit_id: 1,
            fail: false,
            error_rate: 0.0,
        }]
    } else {
        config.simulator.clone()
    };

    let sim = SimulatedTransport::new();
    sim.set_latency(config.simulator_latency());
    let bridge = Arc::new(ModbusBridge::new(&config)?);
    let mut setpoints = Vec::with_capacity(devices.len());
    for device in &devices {
        setpoints.push(register_device(&bridge, &sim, device)?);
    }

    let handle = bridge.start(Box::new(sim.clone()))?;

    tokio::select! {
        () = host_cycle(&bridge, &config, &setpoints, args.cycles) => {
            info!("Cycle limit reached");
        }
        signal = common::wait_for_shutdown() => {
            info!("Received {}, stopping bridge", signal);
        }
    }

    handle.shutdown()?;
    info!("Final status: {}", serde_json::to_string(&bridge.status())?);
    Ok(())
}

/// Register the demo protocol of `device` and prepare the simulator
///
/// Returns the setpoint element written every cycle.
fn register_device(
    bridge: &ModbusBridge,
    sim: &SimulatedTransport,
    device: &SimulatedDevice,
) -> bridgesrv::Result<Arc<Element>> {
    if !device.fail {
        sim.add_unit(device.unit_id);
        sim.set_error_rate(device.unit_id, device.error_rate);
        for address in 0..4u16 {
            sim.set_holding_register(device.unit_id, address, address * 10);
        }
        sim.set_input_register(device.unit_id, 100, 230);
        sim.set_input_register(device.unit_id, 101, 50);
    }

    let measurements = (0..4u16)
        .map(|address| {
            let component = device.component_id.clone();
            Arc::new(Element::single(address).with_callback(Arc::new(move |words: Option<&[u16]>| match words {
                Some(words) => debug!(component = %component, address, ?words, "Value updated"),
                None => debug!(component = %component, address, "Value invalidated"),
            })))
        })
        .collect();
    let setpoint = Arc::new(Element::single(200));

    let protocol = Protocol::new(device.component_id.as_str(), device.unit_id)
        .with_read(ReadFunction::HoldingRegisters, Priority::High, measurements)?
        .with_read(
            ReadFunction::InputRegisters,
            Priority::Low,
            vec![Arc::new(Element::new(100, 2))],
        )?
        .with_write(WriteFunction::MultipleRegisters, vec![setpoint.clone()])?;
    bridge.register(Arc::new(protocol));

    Ok(setpoint)
}

/// Fire the two host events every cycle
async fn host_cycle(
    bridge: &ModbusBridge,
    config: &BridgeConfig,
    setpoints: &[Arc<Element>],
    limit: Option<u64>,
) {
    let mut interval = tokio::time::interval(config.cycle_time());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycle: u64 = 0;
    loop {
        interval.tick().await;
        if limit.is_some_and(|limit| cycle >= limit) {
            break;
        }

        bridge.on_before_process_image();
        tokio::time::sleep(config.execute_write_offset()).await;

        for setpoint in setpoints {
            if let Err(e) = setpoint.set_next_write(vec![cycle as u16]) {
                warn!("Failed to set setpoint: {}", e);
            }
        }
        bridge.on_execute_write();
        cycle += 1;
    }
}
