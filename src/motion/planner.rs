// src/motion/planner.rs - Submission interface and look-ahead planning
//
// This layer sits below the G-code interpreter and above the motor mapping
// and pulse queues. Submissions land in the block pool, the look-ahead
// replans the queued tail on every accelerated admission, and the executor
// (executor.rs) drains the pool one segment at a time.

use thiserror::Error;

use super::executor::{ExecError, MachineCallbacks, Runtime};
use super::junction::{self, JunctionDeviation};
use super::kinematics::{CartesianKinematics, Kinematics};
use super::pool::{BlockKind, BufferPool, MCode, MoveState};
use super::state::{MachineState, MotionState, PathControl};
use super::stepper::StepperLink;
use super::trapezoid::{self, ramp_velocity};
use super::{QueueStats, AXES};
use crate::config::PlannerConfig;

/// Stands in for "no ceiling" when exact-stop mode is off.
const VELOCITY_UNBOUNDED: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Submission refused: length or duration below the zero threshold
    #[error("zero length move")]
    ZeroLengthMove,
    /// No pool slot free. Upstream must gate on `queue_has_space`, so
    /// hitting this is a protocol violation, not backpressure.
    #[error("planner buffer pool exhausted")]
    BufferFullFatal,
}

/// The trajectory planner: block pool, planning position and runtime state,
/// wired to inverse kinematics, the stepper interface, and the machine
/// callbacks for auxiliary commands.
///
/// Planning position tracks the end of the *queue*, not the tool: it
/// advances the moment a submission is accepted, so it always leads the
/// physical position the runtime reports.
pub struct MotionPlanner {
    pub(crate) config: PlannerConfig,
    pub(crate) junction: JunctionDeviation,
    pub(crate) pool: BufferPool,
    pub(crate) position: [f64; AXES],
    pub(crate) runtime: Runtime,
    pub(crate) machine: MachineState,
    pub(crate) kinematics: Box<dyn Kinematics>,
    pub(crate) stepper: Box<dyn StepperLink>,
    pub(crate) callbacks: Box<dyn MachineCallbacks>,
    pub(crate) exec_fault: Option<ExecError>,
    blocks_submitted: u32,
}

impl MotionPlanner {
    pub fn new(
        config: PlannerConfig,
        stepper: Box<dyn StepperLink>,
        callbacks: Box<dyn MachineCallbacks>,
    ) -> Self {
        let junction = JunctionDeviation::from_config(&config);
        let kinematics = Box::new(CartesianKinematics::from_config(&config));
        let pool = BufferPool::new(config.pool_size);
        Self {
            config,
            junction,
            pool,
            position: [0.0; AXES],
            runtime: Runtime::default(),
            machine: MachineState::default(),
            kinematics,
            stepper,
            callbacks,
            exec_fault: None,
            blocks_submitted: 0,
        }
    }

    /// Swap in non-Cartesian kinematics.
    pub fn set_kinematics(&mut self, kinematics: Box<dyn Kinematics>) {
        self.kinematics = kinematics;
    }

    pub fn set_path_control(&mut self, mode: PathControl) {
        self.machine.path_control = mode;
    }

    /// True if a submission would find a pool slot. Feeders must check this
    /// before submitting.
    pub fn queue_has_space(&self) -> bool {
        self.pool.has_space()
    }

    /// True while the machine is in motion or segments remain queued.
    pub fn is_busy(&self) -> bool {
        self.stepper.is_busy() || self.runtime.is_active()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            length: self.pool.occupied(),
            capacity: self.pool.capacity(),
            busy: self.is_busy(),
        }
    }

    /// Latched executor fault, if any, cleared on read.
    pub fn take_exec_fault(&mut self) -> Option<ExecError> {
        self.exec_fault.take()
    }

    /// Queue a straight move run at a single rate, without accel/decel
    /// shaping. Feed rate has already been converted to a duration.
    pub fn submit_line(&mut self, target: [f64; AXES], minutes: f64) -> Result<(), PlanError> {
        let epsilon = self.config.tolerances.epsilon;
        if minutes < epsilon {
            return Err(PlanError::ZeroLengthMove);
        }
        let index = self
            .pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;

        let length = junction::vector_length(&target, &self.position);
        if length < epsilon {
            self.pool.release_write();
            return Err(PlanError::ZeroLengthMove);
        }

        self.blocks_submitted += 1;
        let block = self.pool.block_mut(index);
        block.line_number = self.blocks_submitted;
        block.time = minutes;
        block.target = target;
        block.length = length;
        block.cruise_vmax = length / minutes;

        self.pool.commit(BlockKind::Line);
        self.position = target;
        self.stepper.request_exec();
        Ok(())
    }

    /// Queue a jerk-limited move: the main planner entry point.
    ///
    /// Sets up the block's unit vector, per-move jerk and velocity ceilings,
    /// then replans the whole replannable tail of the queue so entries and
    /// exits stay consistent with everything already committed.
    pub fn submit_accel_line(&mut self, target: [f64; AXES], minutes: f64) -> Result<(), PlanError> {
        let tol = self.config.tolerances;
        let length = junction::vector_length(&target, &self.position);
        if minutes < tol.epsilon || length < tol.epsilon {
            return Err(PlanError::ZeroLengthMove);
        }
        let index = self
            .pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;

        let unit = junction::unit_vector(&self.position, &target, length);
        let mut jerk = 0.0;
        for i in 0..AXES {
            jerk += (unit[i] * self.config.axes[i].jerk_max).powi(2);
        }
        let jerk = jerk.sqrt();

        let exact_stop = self.machine.path_control == PathControl::ExactStop;
        let exact_stop_cap = if exact_stop { 0.0 } else { VELOCITY_UNBOUNDED };

        let previous_unit = self.pool.block(self.pool.prev(index)).unit;
        let junction_velocity = self.junction.junction_vmax(&previous_unit, &unit);

        self.blocks_submitted += 1;
        let line_number = self.blocks_submitted;

        let block = self.pool.block_mut(index);
        block.line_number = line_number;
        block.time = minutes;
        block.length = length;
        block.target = target;
        block.unit = unit;
        block.jerk = jerk;
        block.recip_jerk = 1.0 / jerk;
        block.cubert_jerk = jerk.cbrt();
        block.replannable = !exact_stop;
        block.cruise_vmax = length / minutes;
        block.entry_vmax = block.cruise_vmax.min(junction_velocity).min(exact_stop_cap);
        block.delta_vmax = ramp_velocity(0.0, length, block.cubert_jerk);
        block.exit_vmax = block
            .cruise_vmax
            .min(block.entry_vmax + block.delta_vmax)
            .min(exact_stop_cap);
        block.braking_velocity = block.delta_vmax;

        tracing::debug!(
            line = line_number,
            length,
            cruise_vmax = length / minutes,
            entry_vmax = junction_velocity.min(length / minutes),
            "accel line admitted"
        );

        self.plan_block_list(index);
        self.position = target;
        self.pool.commit(BlockKind::AccelLine);
        self.stepper.request_exec();
        Ok(())
    }

    /// Queue a timed pause. The pulse generator times dwells on its own
    /// timer, so this is just an ordered marker with a duration.
    pub fn submit_dwell(&mut self, seconds: f64) -> Result<(), PlanError> {
        let index = self
            .pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;
        self.pool.block_mut(index).time = seconds;
        self.pool.commit(BlockKind::Dwell);
        self.stepper.request_exec();
        Ok(())
    }

    /// Queue an auxiliary machine command so it executes in stream order.
    pub fn submit_mcode(&mut self, code: MCode) -> Result<(), PlanError> {
        self.pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;
        self.pool.commit(BlockKind::MCode(code));
        self.stepper.request_exec();
        Ok(())
    }

    pub fn submit_tool(&mut self, tool: u8) -> Result<(), PlanError> {
        self.pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;
        self.pool.commit(BlockKind::Tool(tool));
        self.stepper.request_exec();
        Ok(())
    }

    pub fn submit_spindle_speed(&mut self, rpm: f64) -> Result<(), PlanError> {
        self.pool
            .try_acquire_write()
            .ok_or(PlanError::BufferFullFatal)?;
        self.pool.commit(BlockKind::SpindleSpeed(rpm));
        self.stepper.request_exec();
        Ok(())
    }

    /// Reset the planning position without moving (G92 support).
    pub fn set_plan_position(&mut self, position: [f64; AXES]) {
        self.position = position;
    }

    /// Reset both planning and runtime positions (arc helpers).
    pub fn set_axis_position(&mut self, position: [f64; AXES]) {
        self.position = position;
        self.runtime.position = position;
    }

    pub fn get_plan_position(&self) -> [f64; AXES] {
        self.position
    }

    pub fn get_runtime_position(&self, axis: usize) -> f64 {
        self.runtime.position[axis]
    }

    pub fn get_runtime_velocity(&self) -> f64 {
        self.runtime.segment_velocity
    }

    pub fn get_runtime_line_number(&self) -> u32 {
        self.runtime.line_number
    }

    /// Zero the reported segment velocity after a stop, so status queries
    /// don't show the last in-flight value.
    pub fn zero_segment_velocity(&mut self) {
        self.runtime.segment_velocity = 0.0;
    }

    /// Drop every queued move. The running block is left to finish; arc
    /// decomposition upstream is told to abort.
    pub fn flush(&mut self) {
        self.callbacks.abort_arc();
        self.pool.flush_queued();
        self.machine.motion = MotionState::Stop;
        tracing::info!("planner flushed");
    }

    /// Replan the chain of blocks ending at `tail` (the newest admission).
    ///
    /// Reverse pass: walk backwards while blocks are replannable, raising
    /// each block's braking velocity to the fastest entry from which it can
    /// still decelerate into its successor. The walk stops at the first
    /// non-replannable block, which anchors the plan.
    ///
    /// Forward pass: from the anchor forward, chain entry velocities off the
    /// previous exit and pick exits bounded by downstream braking capacity
    /// and by what the jerk ramp can reach, regenerating each trapezoid. A
    /// block whose exit comes out at its ceiling cannot be improved by any
    /// later admission and stops being replannable.
    ///
    /// The tail block itself always plans down to zero: nothing is queued
    /// behind it yet.
    pub(crate) fn plan_block_list(&mut self, tail: usize) {
        let tol = self.config.tolerances;

        let mut bp = tail;
        loop {
            bp = self.pool.prev(bp);
            if bp == tail || !self.pool.block(bp).replannable {
                break;
            }
            let nx = self.pool.next(bp);
            let (next_entry_vmax, next_braking) = {
                let next = self.pool.block(nx);
                (next.entry_vmax, next.braking_velocity)
            };
            let block = self.pool.block_mut(bp);
            block.braking_velocity = (next_entry_vmax.min(next_braking) + block.delta_vmax)
                .min(block.cruise_vmax);
        }

        loop {
            bp = self.pool.next(bp);
            if bp == tail {
                break;
            }
            let pv = self.pool.prev(bp);
            let entry_velocity = if pv == tail {
                self.pool.block(bp).entry_vmax
            } else {
                self.pool.block(pv).exit_velocity
            };
            let nx = self.pool.next(bp);
            let (next_braking, next_entry_vmax) = {
                let next = self.pool.block(nx);
                (next.braking_velocity, next.entry_vmax)
            };
            let block = self.pool.block_mut(bp);
            block.entry_velocity = entry_velocity;
            block.cruise_velocity = block.cruise_vmax;
            block.exit_velocity = block
                .exit_vmax
                .min(next_braking)
                .min(next_entry_vmax)
                .min(entry_velocity + block.delta_vmax);
            trapezoid::calculate(block, &tol);
            if block.exit_velocity == block.exit_vmax {
                block.replannable = false; // optimally planned
            }
        }

        let previous_exit = self.pool.block(self.pool.prev(tail)).exit_velocity;
        let block = self.pool.block_mut(tail);
        block.entry_velocity = previous_exit;
        block.cruise_velocity = block.cruise_vmax;
        block.exit_velocity = 0.0;
        trapezoid::calculate(block, &tol);
    }

    /// Make the whole active chain eligible for replanning again. Used by
    /// hold planning, which rewrites blocks regardless of earlier
    /// optimisation fences.
    pub(crate) fn reset_replannable(&mut self) {
        let Some(first) = self.pool.current_run() else {
            return;
        };
        let mut bp = first;
        loop {
            self.pool.block_mut(bp).replannable = true;
            bp = self.pool.next(bp);
            if bp == first || self.pool.block(bp).move_state == MoveState::Off {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn block(&self, index: usize) -> &super::pool::PlanningBlock {
        self.pool.block(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::executor::NullCallbacks;
    use crate::motion::stepper::SimStepper;
    use crate::motion::MOTORS;

    fn planner() -> MotionPlanner {
        planner_with_pool(PlannerConfig::default().pool_size)
    }

    fn planner_with_pool(pool_size: usize) -> MotionPlanner {
        let mut config = PlannerConfig::default();
        config.pool_size = pool_size;
        config.steps_per_mm = [1.0; MOTORS];
        MotionPlanner::new(
            config,
            Box::new(SimStepper::new()),
            Box::new(NullCallbacks),
        )
    }

    fn target(x: f64, y: f64) -> [f64; AXES] {
        let mut t = [0.0; AXES];
        t[0] = x;
        t[1] = y;
        t
    }

    #[test]
    fn rejects_zero_time_and_zero_length() {
        let mut planner = planner();
        assert_eq!(
            planner.submit_accel_line(target(10.0, 0.0), 0.0),
            Err(PlanError::ZeroLengthMove)
        );
        assert_eq!(
            planner.submit_accel_line(target(0.0, 0.0), 0.01),
            Err(PlanError::ZeroLengthMove)
        );
        assert_eq!(
            planner.submit_line(target(0.0, 0.0), 0.01),
            Err(PlanError::ZeroLengthMove)
        );
        // a refused submission must not leak its pool slot
        assert_eq!(planner.stats().length, 0);
        assert!(planner.queue_has_space());
    }

    #[test]
    fn planning_position_leads_execution() {
        let mut planner = planner();
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(10.0, 10.0), 0.01).unwrap();

        // queue-end position advanced immediately; the tool has not moved
        assert_eq!(planner.get_plan_position()[0], 10.0);
        assert_eq!(planner.get_plan_position()[1], 10.0);
        assert_eq!(planner.get_runtime_position(0), 0.0);
    }

    #[test]
    fn collinear_junction_carries_full_speed() {
        let mut planner = planner();
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(20.0, 0.0), 0.01).unwrap();

        let first = planner.block(0);
        let second = planner.block(1);
        assert!((first.exit_velocity - 1000.0).abs() < 1e-6);
        assert!(
            (first.exit_velocity - second.entry_velocity).abs()
                < planner.config.tolerances.velocity_tolerance
        );
        // optimally planned: no later admission can improve it
        assert!(!first.replannable);
    }

    #[test]
    fn right_angle_junction_limits_the_corner() {
        let mut planner = planner();
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(10.0, 10.0), 0.01).unwrap();

        let first = planner.block(0);
        let second = planner.block(1);
        assert!(first.exit_velocity < 1000.0);
        assert!(first.exit_velocity > 0.0);
        assert_eq!(first.exit_velocity, second.entry_velocity);
        assert_eq!(second.entry_vmax, first.exit_velocity);
    }

    #[test]
    fn planned_chain_respects_velocity_invariants() {
        let mut planner = planner();
        let path = [
            (10.0, 0.0, 0.01),
            (20.0, 0.0, 0.02),
            (20.0, 5.0, 0.005),
            (30.0, 5.0, 0.01),
            (30.0, 0.0, 0.004),
        ];
        for (x, y, minutes) in path {
            planner.submit_accel_line(target(x, y), minutes).unwrap();
        }

        let tol = planner.config.tolerances;
        for i in 0..path.len() {
            let block = planner.block(i);
            assert!(block.entry_velocity <= block.cruise_velocity + tol.velocity_tolerance);
            assert!(block.exit_velocity <= block.cruise_velocity + tol.velocity_tolerance);
            assert!(block.entry_velocity <= block.entry_vmax + tol.velocity_tolerance);
            assert!(block.exit_velocity <= block.exit_vmax + tol.velocity_tolerance);
            assert!(block.cruise_velocity <= block.cruise_vmax + tol.velocity_tolerance);
            assert!(
                (block.head_length + block.body_length + block.tail_length - block.length).abs()
                    < tol.length_tolerance.max(block.length * 0.01)
            );
            if i + 1 < path.len() {
                let next = planner.block(i + 1);
                assert!(
                    (block.exit_velocity - next.entry_velocity).abs() < tol.velocity_tolerance
                );
            }
        }
        // nothing queued behind the last block: it plans to a stop
        assert_eq!(planner.block(path.len() - 1).exit_velocity, 0.0);
    }

    #[test]
    fn braking_velocity_stays_inside_the_cruise_ceiling() {
        let mut planner = planner();
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(20.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(30.0, 0.0), 0.01).unwrap();

        for i in 0..2 {
            let block = planner.block(i);
            assert!(block.braking_velocity <= block.cruise_vmax);
        }
    }

    #[test]
    fn exact_stop_mode_pins_junctions_to_zero() {
        let mut planner = planner();
        planner.set_path_control(PathControl::ExactStop);
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(20.0, 0.0), 0.01).unwrap();

        let first = planner.block(0);
        assert_eq!(first.entry_vmax, 0.0);
        assert_eq!(first.exit_vmax, 0.0);
        assert_eq!(first.exit_velocity, 0.0);
        assert!(!first.replannable);
    }

    #[test]
    fn pool_exhaustion_is_fatal() {
        let mut planner = planner_with_pool(8);
        for i in 1..=8 {
            planner
                .submit_accel_line(target(i as f64 * 10.0, 0.0), 0.01)
                .unwrap();
        }
        assert!(!planner.queue_has_space());
        assert_eq!(
            planner.submit_accel_line(target(1000.0, 0.0), 0.01),
            Err(PlanError::BufferFullFatal)
        );
        assert_eq!(
            planner.submit_dwell(1.0),
            Err(PlanError::BufferFullFatal)
        );
    }

    #[test]
    fn flush_drops_the_queue_and_stops_motion() {
        let mut planner = planner();
        planner.submit_accel_line(target(10.0, 0.0), 0.01).unwrap();
        planner.submit_accel_line(target(20.0, 0.0), 0.01).unwrap();
        assert_eq!(planner.stats().length, 2);

        planner.flush();
        assert_eq!(planner.stats().length, 0);
        assert_eq!(planner.machine.motion, super::MotionState::Stop);
        // pool is usable again immediately
        planner.submit_accel_line(target(5.0, 0.0), 0.01).unwrap();
        assert_eq!(planner.stats().length, 1);
    }

    #[test]
    fn set_positions_update_the_right_frames() {
        let mut planner = planner();
        let p = target(42.0, 7.0);
        planner.set_plan_position(p);
        assert_eq!(planner.get_plan_position(), p);
        assert_eq!(planner.get_runtime_position(0), 0.0);

        planner.set_axis_position(p);
        assert_eq!(planner.get_runtime_position(0), 42.0);
        assert_eq!(planner.get_runtime_position(1), 7.0);
    }
}
