// Integration tests driving the planner through its public surface only:
// submissions over the async controller, segments out through a recording
// stepper.

use std::time::Duration;

use gantry_rs::{
    MotionController, MotionPlanner, NullCallbacks, PlannerConfig, SimStepper, AXES, MOTORS,
};

fn build_controller(pool_size: usize) -> (MotionController, SimStepper) {
    let mut config = PlannerConfig::default();
    config.pool_size = pool_size;
    config.steps_per_mm = [1.0; MOTORS];
    let stepper = SimStepper::new();
    let planner = MotionPlanner::new(
        config,
        Box::new(stepper.clone()),
        Box::new(NullCallbacks),
    );
    (
        MotionController::new(planner, Duration::from_micros(200)),
        stepper,
    )
}

fn target(x: f64, y: f64) -> [f64; AXES] {
    let mut t = [0.0; AXES];
    t[0] = x;
    t[1] = y;
    t
}

#[tokio::test]
async fn square_path_lands_back_on_the_origin() {
    let (controller, stepper) = build_controller(48);
    controller.start();

    controller.submit_accel_line(target(20.0, 0.0), 0.02).await.unwrap();
    controller.submit_accel_line(target(20.0, 20.0), 0.02).await.unwrap();
    controller.submit_accel_line(target(0.0, 20.0), 0.02).await.unwrap();
    controller.submit_accel_line(target(0.0, 0.0), 0.02).await.unwrap();

    tokio::time::timeout(Duration::from_secs(30), controller.wait_idle())
        .await
        .expect("square never finished");
    controller.shutdown();

    // every leg cancels out; net steps return to the origin
    assert!(stepper.total_steps(0).abs() < 1e-4);
    assert!(stepper.total_steps(1).abs() < 1e-4);
    assert!(stepper.line_count() > 20);

    let planner = controller.planner();
    let planner = planner.read().await;
    assert_eq!(planner.get_runtime_position(0), 0.0);
    assert_eq!(planner.get_runtime_position(1), 0.0);
}

#[tokio::test]
async fn submissions_pace_themselves_on_a_tiny_pool() {
    let (controller, stepper) = build_controller(4);
    controller.start();

    // four times the pool capacity; the helpers wait for slots instead of
    // tripping the fatal buffer-full path
    for i in 1..=16 {
        controller
            .submit_accel_line(target(i as f64, 0.0), 0.001)
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(30), controller.wait_idle())
        .await
        .expect("feed never drained");
    controller.shutdown();

    assert!((stepper.total_steps(0) - 16.0).abs() < 1e-4);
}
