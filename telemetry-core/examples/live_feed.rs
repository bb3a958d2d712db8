//! Standalone live-feed demo
//!
//! Runs the simulator through an in-memory pipeline while two viewer threads print the
//! samples they receive, then shows the stored averages.
//!
//! Usage:
//!   cargo run --example live_feed -- [ticks]

use std::env;
use std::sync::Arc;
use std::thread;

use telemetry_core::{
    BatteryLayout, IngestionPipeline, MemoryStore, PipelineConfig, SampleKind, SampleStore,
    Simulator,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ticks: usize = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10);

    let store = Arc::new(MemoryStore::new());
    let pipeline = match IngestionPipeline::new(PipelineConfig::new(), store.clone()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Failed to create pipeline: {}", e);
            return;
        }
    };

    let ecu_feed = pipeline.live_ecu();
    let ecu_viewer = thread::spawn(move || {
        for sample in ecu_feed {
            println!(
                "[ecu]     rpm={:5} speed={:3} throttle={:3}% brake={}",
                sample.motor_rpm, sample.speed, sample.throttle_percent, sample.brake_pressure
            );
        }
    });

    let battery_feed = pipeline.live_battery();
    let battery_viewer = thread::spawn(move || {
        for sample in battery_feed {
            let cells: Vec<String> = sample
                .cells
                .iter()
                .map(|c| format!("{}C/{}", c.temp, c.voltage))
                .collect();
            println!("[battery] charge={:3}% cells={}", sample.charge_level, cells.join(" "));
        }
    });

    let simulator = Simulator::new(pipeline.codec(), BatteryLayout::TwoFrame);
    for frames in simulator.take(ticks) {
        for frame in &frames {
            pipeline.process(frame);
        }
    }

    let stats = pipeline.stats();
    drop(pipeline);
    let _ = ecu_viewer.join();
    let _ = battery_viewer.join();

    println!("\n=== SUMMARY ===");
    println!("Frames processed: {}", stats.frames);
    println!("Samples stored:   {}", stats.stored);
    for kind in [SampleKind::Ecu, SampleKind::Battery] {
        match store.query_averages(kind) {
            Ok(avg) => println!(
                "{} averages: {}",
                kind,
                serde_json::to_string(&avg).unwrap_or_default()
            ),
            Err(e) => eprintln!("Failed to compute {} averages: {}", kind, e),
        }
    }
}
