// src/bin/sim.rs - Host-side planner simulation
//
// Runs a small scripted job through the full planner/executor pipeline with
// a recording stepper, then reports what was prepared. Useful for eyeballing
// segment streams when tuning jerk and junction settings.

use std::env;
use std::time::Duration;

use gantry_rs::{
    load_config, MotionController, MotionPlanner, NullCallbacks, PlannerConfig, SimStepper,
    AXES,
};

fn target(x: f64, y: f64) -> [f64; AXES] {
    let mut t = [0.0; AXES];
    t[0] = x;
    t[1] = y;
    t
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    tracing::info!("Starting gantry-rs planner simulation");

    let args: Vec<String> = env::args().collect();
    let config = if args.len() > 1 {
        tracing::info!("Loading configuration from: {}", args[1]);
        load_config(&args[1])?
    } else {
        tracing::info!("No config given, using defaults");
        PlannerConfig::default()
    };

    tracing::info!("Pool size: {} blocks", config.pool_size);
    tracing::info!("Segment target: {} µs", config.segment_target_us);
    tracing::info!("Jerk (X): {} mm/min³", config.axes[0].jerk_max);

    let stepper = SimStepper::new();
    let planner = MotionPlanner::new(
        config,
        Box::new(stepper.clone()),
        Box::new(NullCallbacks),
    );
    let controller = MotionController::new(planner, Duration::from_micros(500));
    controller.start();

    // a small square with a dwell in one corner
    controller.submit_accel_line(target(20.0, 0.0), 0.02).await?;
    controller.submit_accel_line(target(20.0, 20.0), 0.02).await?;
    controller.submit_dwell(0.25).await?;
    controller.submit_accel_line(target(0.0, 20.0), 0.02).await?;
    controller.submit_accel_line(target(0.0, 0.0), 0.02).await?;

    // demonstrate a feedhold on the way back
    tokio::time::sleep(Duration::from_millis(3)).await;
    controller.request_feedhold().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    {
        let planner = controller.planner();
        let planner = planner.read().await;
        tracing::info!(
            x = planner.get_runtime_position(0),
            y = planner.get_runtime_position(1),
            "parked in feedhold"
        );
    }
    controller.end_feedhold().await;

    controller.wait_idle().await;
    controller.shutdown();

    let trace = stepper.trace();
    let trace = trace.lock().unwrap();
    tracing::info!(
        segments = trace.prepared.len(),
        exec_requests = trace.exec_requests,
        "job complete"
    );

    let planner = controller.planner();
    let planner = planner.read().await;
    tracing::info!(
        x = planner.get_runtime_position(0),
        y = planner.get_runtime_position(1),
        "final position"
    );
    Ok(())
}
