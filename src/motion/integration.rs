// src/motion/integration.rs - End-to-end planner/executor scenarios
//
// These run the full pipeline: submission -> look-ahead -> block pool ->
// executor -> recorded stepper trace, with unit steps/mm so step counts
// read directly as millimetres.

use super::executor::NullCallbacks;
use super::planner::{MotionPlanner, PlanError};
use super::pool::MCode;
use super::state::{HoldState, MotionState};
use super::stepper::SimStepper;
use super::{ExecOutcome, AXES, MOTORS};
use crate::config::PlannerConfig;

fn planner_with_pool(pool_size: usize) -> (MotionPlanner, SimStepper) {
    let mut config = PlannerConfig::default();
    config.pool_size = pool_size;
    config.steps_per_mm = [1.0; MOTORS];
    let stepper = SimStepper::new();
    let planner = MotionPlanner::new(
        config,
        Box::new(stepper.clone()),
        Box::new(NullCallbacks),
    );
    (planner, stepper)
}

fn planner() -> (MotionPlanner, SimStepper) {
    planner_with_pool(PlannerConfig::default().pool_size)
}

fn target(x: f64, y: f64) -> [f64; AXES] {
    let mut t = [0.0; AXES];
    t[0] = x;
    t[1] = y;
    t
}

/// Pump exec (and the hold-plan callback, as the main loop would) until the
/// executor reports an idle queue.
fn run_until_idle(planner: &mut MotionPlanner) {
    for _ in 0..200_000 {
        planner.plan_hold_callback();
        match planner.exec().unwrap() {
            ExecOutcome::NoOp => return,
            _ => {}
        }
    }
    panic!("executor never went idle");
}

#[test]
fn single_straight_move() {
    let (mut planner, stepper) = planner();
    planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();

    let block = planner.block(0);
    assert!((block.length - 10.0).abs() < 1e-12);
    assert!((block.cruise_vmax - 1000.0).abs() < 1e-9);
    assert_eq!(block.entry_velocity, 0.0);
    assert_eq!(block.exit_velocity, 0.0); // end of queue
    assert!((block.head_length - block.tail_length).abs() < 1e-9);
    assert!(block.body_length >= 0.0);
    let section_sum = block.head_length + block.body_length + block.tail_length;
    assert!((section_sum - 10.0).abs() < 1e-6);

    run_until_idle(&mut planner);
    assert!((stepper.total_steps(0) - 10.0).abs() < 1e-4);
    assert_eq!(stepper.total_steps(1), 0.0);
    assert_eq!(planner.get_runtime_position(0), 10.0);
}

#[test]
fn two_collinear_moves_share_full_junction_speed() {
    let (mut planner, stepper) = planner();
    planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
    planner.submit_accel_line(target(20.0, 0.0), 0.01).unwrap();

    let first = planner.block(0);
    let second = planner.block(1);
    let tolerance = planner.config.tolerances.velocity_tolerance;
    assert!((first.exit_velocity - 1000.0).abs() < tolerance);
    assert!((first.exit_velocity - second.entry_velocity).abs() < tolerance);
    // straight-through junction: no deceleration between the blocks
    assert_eq!(first.tail_length, 0.0);

    run_until_idle(&mut planner);
    assert!((stepper.total_steps(0) - 20.0).abs() < 1e-4);
    assert_eq!(planner.get_runtime_position(0), 20.0);
}

#[test]
fn right_angle_corner_brakes_to_the_junction_limit() {
    let (mut planner, stepper) = planner();
    planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
    planner.submit_accel_line(target(10.0, 10.0), 0.01).unwrap();

    // cos(theta) = 0 for this corner; the limit is finite and well below
    // both cruise ceilings
    let junction_limit = {
        let sin_half = (0.5f64).sqrt();
        let radius = 0.05 * sin_half / (1.0 - sin_half);
        (radius * 200_000.0).sqrt()
    };
    let first = planner.block(0);
    let second = planner.block(1);
    assert!((first.exit_velocity - junction_limit).abs() < 1e-6);
    assert_eq!(first.exit_velocity, second.entry_velocity);
    assert!(first.exit_velocity < first.cruise_vmax);
    // both blocks accelerate and decelerate
    assert!(first.head_length > 0.0 && first.tail_length > 0.0);
    assert!(second.head_length > 0.0 && second.tail_length > 0.0);

    run_until_idle(&mut planner);
    assert!((stepper.total_steps(0) - 10.0).abs() < 1e-4);
    assert!((stepper.total_steps(1) - 10.0).abs() < 1e-4);
    assert_eq!(planner.get_runtime_position(0), 10.0);
    assert_eq!(planner.get_runtime_position(1), 10.0);
}

#[test]
fn sub_millimetre_move_degrades_gracefully() {
    let (mut planner, stepper) = planner();
    // 0.1µm at a requested 1000mm/min: far too short for any ramp
    planner.submit_accel_line(target(1e-4, 0.0), 1e-7).unwrap();

    let block = planner.block(0);
    assert_eq!(block.body_length, 0.0);
    assert!(block.cruise_velocity < block.cruise_vmax);
    let section_sum = block.head_length + block.body_length + block.tail_length;
    assert!((section_sum - 1e-4).abs() < 1e-10);

    run_until_idle(&mut planner);
    assert!((stepper.total_steps(0) - 1e-4).abs() < 1e-7);
    assert_eq!(planner.get_runtime_position(0), 1e-4);
}

#[test]
fn feedhold_mid_move_parks_and_resumes_to_the_exact_target() {
    let (mut planner, _stepper) = planner();
    planner.submit_accel_line(target(100.0, 0.0), 0.1).unwrap();

    // produce some segments, then assert the hold
    for _ in 0..5 {
        assert_eq!(planner.exec().unwrap(), ExecOutcome::Again);
    }
    planner.request_feedhold();
    assert_eq!(planner.machine.hold, HoldState::Sync);

    // next segment boundary yields to hold planning
    planner.exec().unwrap();
    assert_eq!(planner.machine.hold, HoldState::Plan);
    assert_eq!(planner.plan_hold_callback(), ExecOutcome::Done);
    assert_eq!(planner.machine.hold, HoldState::Decel);

    run_until_idle(&mut planner);
    assert_eq!(planner.machine.hold, HoldState::Hold);
    assert_eq!(planner.machine.motion, MotionState::Hold);
    assert_eq!(planner.get_runtime_velocity(), 0.0);
    let parked = planner.get_runtime_position(0);
    assert!(parked > 0.0 && parked < 100.0);

    planner.end_feedhold();
    run_until_idle(&mut planner);
    assert_eq!(planner.get_runtime_position(0), 100.0);
    assert_eq!(planner.get_runtime_position(1), 0.0);
    assert!(!planner.is_busy());
}

#[test]
fn queue_saturation_is_fatal_then_recovers() {
    let pool_size = 16;
    let (mut planner, _stepper) = planner_with_pool(pool_size);

    for i in 1..=pool_size {
        planner
            .submit_accel_line(target(i as f64 * 5.0, 0.0), 0.01)
            .unwrap();
    }
    for i in 1..=5 {
        let overflow =
            planner.submit_accel_line(target(1000.0 + i as f64, 0.0), 0.01);
        assert_eq!(overflow, Err(PlanError::BufferFullFatal));
    }

    run_until_idle(&mut planner);
    assert_eq!(planner.stats().length, 0);
    assert!(!planner.is_busy());

    // fresh submissions succeed again after the drain
    planner
        .submit_accel_line(target(500.0, 0.0), 0.5)
        .unwrap();
    assert_eq!(planner.stats().length, 1);
}

#[test]
fn ramp_segment_travel_integrates_to_the_section_lengths() {
    let (mut planner, stepper) = planner();
    planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
    let (head_length, body_length, tail_length, cruise_velocity) = {
        let block = planner.block(0);
        (
            block.head_length,
            block.body_length,
            block.tail_length,
            block.cruise_velocity,
        )
    };
    assert!(body_length > 0.0, "scenario expects a cruise plateau");

    run_until_idle(&mut planner);

    // recover each segment's velocity from the trace and split the move at
    // the cruise plateau: head before it, tail after it
    let trace = stepper.trace();
    let trace = trace.lock().unwrap();
    let segments: Vec<(f64, f64)> = trace
        .lines()
        .map(|(steps, microseconds)| {
            let travel = steps[0];
            let velocity = travel / microseconds * super::MICROSECONDS_PER_MINUTE;
            (travel, velocity)
        })
        .collect();
    let total: f64 = segments.iter().map(|(travel, _)| travel).sum();
    assert!((total - 10.0).abs() < 1e-4);

    let at_cruise =
        |velocity: f64| (velocity - cruise_velocity).abs() < cruise_velocity * 1e-9;
    let first_body = segments
        .iter()
        .position(|&(_, v)| at_cruise(v))
        .expect("no cruise segments found");
    let last_body = segments
        .iter()
        .rposition(|&(_, v)| at_cruise(v))
        .unwrap();

    let head_travel: f64 = segments[..first_body].iter().map(|(t, _)| t).sum();
    let body_travel: f64 = segments[first_body..=last_body].iter().map(|(t, _)| t).sum();
    let tail_travel: f64 = segments[last_body + 1..].iter().map(|(t, _)| t).sum();

    assert!((head_travel - head_length).abs() < 0.01 * head_length);
    assert!((body_travel - body_length).abs() < 0.01 * body_length.max(0.1));
    assert!((tail_travel - tail_length).abs() < 0.01 * tail_length);
}

#[test]
fn mixed_stream_executes_in_submission_order() {
    let (mut planner, stepper) = planner();
    planner.submit_mcode(MCode::SpindleCw).unwrap();
    planner.submit_accel_line(target(5.0, 0.0), 0.01).unwrap();
    planner.submit_dwell(0.5).unwrap();
    planner.submit_line(target(5.0, 2.0), 0.002).unwrap();
    planner.submit_mcode(MCode::ProgramEnd).unwrap();

    run_until_idle(&mut planner);

    let trace = stepper.trace();
    let trace = trace.lock().unwrap();
    use super::stepper::PreparedSegment as P;
    // null (M3), line segments..., dwell, line, null (M2)
    assert!(matches!(trace.prepared.first(), Some(P::Null)));
    assert!(matches!(trace.prepared.last(), Some(P::Null)));
    let dwell_at = trace
        .prepared
        .iter()
        .position(|p| matches!(p, P::Dwell { .. }))
        .expect("dwell was prepared");
    // every motion segment of the accel line precedes the dwell
    assert!(trace.prepared[1..dwell_at]
        .iter()
        .all(|p| matches!(p, P::Line { .. })));
    assert_eq!(planner.get_runtime_position(1), 2.0);
}
