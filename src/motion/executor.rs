// src/motion/executor.rs - One-segment-per-tick runtime execution
//
// Everything here is driven from the pulse generator's exec tick and must
// stay non-blocking: each call prepares exactly one downstream item (line,
// dwell or null) and returns. If the segment is not the last one in the
// running block the call returns `Again`; the last segment returns `Done`;
// an idle queue returns `NoOp`. Breaking that contract desynchronises the
// stepper loader in ways that are very hard to debug.

use thiserror::Error;

use super::pool::{BlockKind, MCode, MoveState};
use super::state::{CycleState, HoldState, MotionState};
use super::{AXES, MICROSECONDS_PER_MINUTE};
use crate::motion::planner::MotionPlanner;

/// Non-error results of one exec tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The running block finished (and was released, unless a hold replan
    /// re-armed it).
    Done,
    /// More segments pending in the running block.
    Again,
    /// Nothing to do: queue empty, or the run block is parked at a hold
    /// point.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("executor reached an inconsistent state: {0}")]
    Internal(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpindleDirection {
    Cw,
    Ccw,
    Off,
}

/// Side effects of auxiliary commands, dispatched when their block reaches
/// the front of the queue so they stay synchronised with motion.
pub trait MachineCallbacks: Send + Sync {
    fn program_stop(&mut self) {}
    fn program_end(&mut self) {}
    fn spindle_control(&mut self, _direction: SpindleDirection) {}
    fn mist_coolant(&mut self, _on: bool) {}
    fn flood_coolant(&mut self, _on: bool) {}
    fn feed_override_enable(&mut self, _on: bool) {}
    /// A flush also aborts any arc being decomposed upstream.
    fn abort_arc(&mut self) {}
}

/// No-op callback sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbacks;

impl MachineCallbacks for NullCallbacks {}

/// Section of the velocity profile currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Off,
    Head,
    Body,
    Tail,
}

/// Progress within a section. Head and tail ramps run in two halves
/// (concave then convex); the body runs entirely in `Run1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    New,
    Run1,
    Run2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentOutcome {
    Complete,
    Incomplete,
}

/// Working state of the executor. Loaded from the running block on first
/// touch; from then on execution never reads the block again (hold planning
/// may be rewriting it concurrently with the tail of this move).
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    pub line_number: u32,
    pub section: Section,
    pub phase: Phase,

    /// Exact planned end position, used to snap the final segment over any
    /// accumulated rounding
    pub endpoint: [f64; AXES],
    pub position: [f64; AXES],
    pub target: [f64; AXES],
    pub unit: [f64; AXES],

    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub jerk: f64,
    pub jerk_div2: f64,

    /// Total time of the current section (minutes)
    pub move_time: f64,
    /// Pseudo-time spanning the whole ramp, used for the jerk curves
    pub accel_time: f64,
    pub elapsed_accel_time: f64,
    pub midpoint_velocity: f64,
    pub midpoint_acceleration: f64,

    pub segments: f64,
    pub segment_count: u32,
    pub segment_move_time: f64,
    pub segment_accel_time: f64,
    pub microseconds: f64,
    pub segment_velocity: f64,
}

impl Runtime {
    pub fn is_active(&self) -> bool {
        self.section != Section::Off
    }

    fn reset_section_state(&mut self) {
        self.section = Section::Off;
        self.phase = Phase::New;
    }
}

impl MotionPlanner {
    /// One exec tick: dequeue if necessary and prepare exactly one item for
    /// the pulse generator.
    pub fn exec(&mut self) -> Result<ExecOutcome, ExecError> {
        let Some(index) = self.pool.current_run() else {
            return Ok(ExecOutcome::NoOp);
        };
        if self.machine.cycle == CycleState::Off {
            self.machine.cycle_start();
        }
        let kind = self.pool.block(index).kind;
        if self.machine.motion == MotionState::Stop && kind == BlockKind::AccelLine {
            self.machine.motion = MotionState::Run;
        }
        match kind {
            BlockKind::Line => self.exec_line(index),
            BlockKind::AccelLine => self.exec_accel_line(index),
            BlockKind::Dwell => self.exec_dwell(index),
            BlockKind::MCode(code) => self.exec_mcode(code),
            BlockKind::Tool(tool) => self.exec_tool(tool),
            BlockKind::SpindleSpeed(rpm) => self.exec_spindle_speed(rpm),
            BlockKind::Null => Err(ExecError::Internal("cleared block reached the executor")),
        }
    }

    /// Release the run block, ending the cycle if the queue drained.
    fn finish_run_block(&mut self) {
        if self.pool.finalize_run() {
            self.machine.cycle_end();
        }
    }

    /// Straight line at a single rate: one prep covers the whole block.
    fn exec_line(&mut self, index: usize) -> Result<ExecOutcome, ExecError> {
        let block = *self.pool.block(index);
        let mut travel = [0.0; AXES];
        for i in 0..AXES {
            travel[i] = block.target[i] - self.runtime.position[i];
        }
        self.runtime.microseconds = block.time * MICROSECONDS_PER_MINUTE;
        let steps = self
            .kinematics
            .travel_to_steps(&travel, self.runtime.microseconds);
        if self
            .stepper
            .prep_line(&steps, self.runtime.microseconds)
            .is_ok()
        {
            self.runtime.position = block.target;
        }
        self.finish_run_block();
        Ok(ExecOutcome::Done)
    }

    fn exec_dwell(&mut self, index: usize) -> Result<ExecOutcome, ExecError> {
        let seconds = self.pool.block(index).time;
        self.stepper.prep_dwell(seconds * 1_000_000.0);
        self.finish_run_block();
        Ok(ExecOutcome::Done)
    }

    fn exec_mcode(&mut self, code: MCode) -> Result<ExecOutcome, ExecError> {
        match code {
            MCode::ProgramStop | MCode::OptionalStop => self.callbacks.program_stop(),
            MCode::ProgramEnd => self.callbacks.program_end(),
            MCode::SpindleCw => self.callbacks.spindle_control(SpindleDirection::Cw),
            MCode::SpindleCcw => self.callbacks.spindle_control(SpindleDirection::Ccw),
            MCode::SpindleOff => self.callbacks.spindle_control(SpindleDirection::Off),
            MCode::MistCoolantOn => self.callbacks.mist_coolant(true),
            MCode::FloodCoolantOn => self.callbacks.flood_coolant(true),
            MCode::FloodCoolantOff => self.callbacks.flood_coolant(false),
            MCode::FeedOverrideOn => self.callbacks.feed_override_enable(true),
            MCode::FeedOverrideOff => self.callbacks.feed_override_enable(false),
        }
        // keep the loader fed even though nothing moves
        self.stepper.prep_null();
        self.finish_run_block();
        Ok(ExecOutcome::Done)
    }

    // Tool changes and spindle speed are queued for ordering but have no
    // motion-side effect yet.
    fn exec_tool(&mut self, _tool: u8) -> Result<ExecOutcome, ExecError> {
        self.stepper.prep_null();
        self.finish_run_block();
        Ok(ExecOutcome::Done)
    }

    fn exec_spindle_speed(&mut self, _rpm: f64) -> Result<ExecOutcome, ExecError> {
        self.stepper.prep_null();
        self.finish_run_block();
        Ok(ExecOutcome::Done)
    }

    /// Jerk-limited line: emit the next segment of the head/body/tail
    /// profile, handling feedhold state transitions at segment boundaries.
    fn exec_accel_line(&mut self, index: usize) -> Result<ExecOutcome, ExecError> {
        if self.pool.block(index).move_state == MoveState::Off {
            return Ok(ExecOutcome::NoOp);
        }
        if self.runtime.section == Section::Off {
            // a block parked at the hold point waits for the release;
            // arriving here while still decelerating means the braking
            // chain just drained, so the hold is now in force
            if self.pool.block(index).hold_point {
                if self.machine.hold == HoldState::Decel {
                    self.machine.motion = MotionState::Hold;
                    self.machine.hold = HoldState::Hold;
                    self.zero_segment_velocity();
                    tracing::info!("feedhold reached zero velocity");
                }
                return Ok(ExecOutcome::NoOp);
            }

            let epsilon = self.config.tolerances.epsilon;
            let zero_length = {
                let block = self.pool.block_mut(index);
                // from here on the planner must leave this block alone
                block.replannable = false;
                block.length < epsilon
            };
            if zero_length {
                // hold replanning can leave a spent stub behind; release
                // it, keeping the loader ordering intact
                self.stepper.prep_null();
                self.finish_run_block();
                return Ok(ExecOutcome::Done);
            }
            self.pool.block_mut(index).move_state = MoveState::Run;

            let block = *self.pool.block(index);
            let runtime = &mut self.runtime;
            runtime.section = Section::Head;
            runtime.phase = Phase::New;
            runtime.line_number = block.line_number;
            runtime.jerk = block.jerk;
            runtime.jerk_div2 = block.jerk / 2.0;
            runtime.head_length = block.head_length;
            runtime.body_length = block.body_length;
            runtime.tail_length = block.tail_length;
            runtime.entry_velocity = block.entry_velocity;
            runtime.cruise_velocity = block.cruise_velocity;
            runtime.exit_velocity = block.exit_velocity;
            runtime.unit = block.unit;
            runtime.endpoint = block.target;
        }
        // from this point on the block contents no longer drive execution

        let status = match self.runtime.section {
            Section::Head => self.exec_head(),
            Section::Body => self.exec_body(),
            Section::Tail => self.exec_tail(),
            Section::Off => Err(ExecError::Internal("segment dispatch with no section")),
        };

        // feedhold bookkeeping happens at segment boundaries
        if self.machine.hold == HoldState::Sync {
            self.machine.hold = HoldState::Plan;
            tracing::debug!("feedhold synced; waiting for hold planning");
        }
        if self.machine.hold == HoldState::Decel
            && status == Ok(ExecOutcome::Done)
            && self.pool.block(index).hold_point
        {
            self.machine.motion = MotionState::Hold;
            self.machine.hold = HoldState::Hold;
            // reporting correction: status queries should read zero while
            // parked, not the last midpoint-sampled segment velocity
            self.zero_segment_velocity();
            tracing::info!("feedhold reached zero velocity");
        }

        if status == Ok(ExecOutcome::Again) {
            return status;
        }
        // the move is over: reset the runtime and fence the successor so a
        // planning pass cannot touch a block the loader may already hold
        self.runtime.reset_section_state();
        let nx = self.pool.next(index);
        self.pool.block_mut(nx).replannable = false;
        if self.pool.block(index).move_state == MoveState::Run {
            self.finish_run_block();
        }
        status
    }

    /// Acceleration ramp: concave half then convex half.
    fn exec_head(&mut self) -> Result<ExecOutcome, ExecError> {
        if self.runtime.phase == Phase::New {
            if self.runtime.head_length < self.config.tolerances.epsilon {
                self.runtime.section = Section::Body;
                return self.exec_body(); // skip ahead
            }
            let segment_target_us = self.config.segment_target_us;
            let runtime = &mut self.runtime;
            runtime.midpoint_velocity = (runtime.entry_velocity + runtime.cruise_velocity) / 2.0;
            runtime.move_time = runtime.head_length / runtime.midpoint_velocity;
            runtime.accel_time =
                2.0 * ((runtime.cruise_velocity - runtime.entry_velocity) / runtime.jerk).sqrt();
            runtime.midpoint_acceleration =
                2.0 * (runtime.cruise_velocity - runtime.entry_velocity) / runtime.accel_time;
            // segments in each half of the ramp
            runtime.segments = ((runtime.move_time * MICROSECONDS_PER_MINUTE)
                / (2.0 * segment_target_us))
                .ceil();
            runtime.segment_move_time = runtime.move_time / (2.0 * runtime.segments);
            runtime.segment_accel_time = runtime.accel_time / (2.0 * runtime.segments);
            // sample each segment at its time midpoint
            runtime.elapsed_accel_time = runtime.segment_accel_time / 2.0;
            runtime.segment_count = runtime.segments as u32;
            runtime.microseconds = runtime.segment_move_time * MICROSECONDS_PER_MINUTE;
            runtime.phase = Phase::Run1;
        }
        if self.runtime.phase == Phase::Run1 {
            self.runtime.segment_velocity = self.runtime.entry_velocity
                + self.runtime.elapsed_accel_time.powi(2) * self.runtime.jerk_div2;
            if self.exec_segment(false) == SegmentOutcome::Complete {
                // set up the convex half, restarting time from the midpoint
                let runtime = &mut self.runtime;
                runtime.elapsed_accel_time = runtime.segment_accel_time / 2.0;
                runtime.segment_count = runtime.segments as u32;
                runtime.phase = Phase::Run2;
            }
            return Ok(ExecOutcome::Again);
        }
        self.runtime.segment_velocity = self.runtime.midpoint_velocity
            + self.runtime.elapsed_accel_time * self.runtime.midpoint_acceleration
            - self.runtime.elapsed_accel_time.powi(2) * self.runtime.jerk_div2;
        if self.exec_segment(false) == SegmentOutcome::Complete {
            let min_section = self.config.tolerances.min_section_length;
            if self.runtime.body_length < min_section && self.runtime.tail_length < min_section {
                return Ok(ExecOutcome::Done);
            }
            self.runtime.section = Section::Body;
            self.runtime.phase = Phase::New;
        }
        Ok(ExecOutcome::Again)
    }

    /// Cruise plateau, chopped into constant-velocity segments.
    fn exec_body(&mut self) -> Result<ExecOutcome, ExecError> {
        if self.runtime.phase == Phase::New {
            if self.runtime.body_length < self.config.tolerances.epsilon {
                self.runtime.section = Section::Tail;
                return self.exec_tail(); // skip ahead
            }
            let segment_target_us = self.config.segment_target_us;
            let runtime = &mut self.runtime;
            runtime.move_time = runtime.body_length / runtime.cruise_velocity;
            runtime.segments =
                ((runtime.move_time * MICROSECONDS_PER_MINUTE) / segment_target_us).ceil();
            runtime.segment_move_time = runtime.move_time / runtime.segments;
            runtime.segment_velocity = runtime.cruise_velocity;
            runtime.segment_count = runtime.segments as u32;
            runtime.microseconds = runtime.segment_move_time * MICROSECONDS_PER_MINUTE;
            runtime.phase = Phase::Run1;
        }
        if self.exec_segment(false) == SegmentOutcome::Complete {
            if self.runtime.tail_length < self.config.tolerances.min_section_length {
                return Ok(ExecOutcome::Done);
            }
            self.runtime.section = Section::Tail;
            self.runtime.phase = Phase::New;
        }
        Ok(ExecOutcome::Again)
    }

    /// Deceleration ramp, mirroring the head.
    fn exec_tail(&mut self) -> Result<ExecOutcome, ExecError> {
        if self.runtime.phase == Phase::New {
            if self.runtime.tail_length < self.config.tolerances.epsilon {
                return Ok(ExecOutcome::Done);
            }
            let segment_target_us = self.config.segment_target_us;
            let runtime = &mut self.runtime;
            runtime.midpoint_velocity = (runtime.cruise_velocity + runtime.exit_velocity) / 2.0;
            runtime.move_time = runtime.tail_length / runtime.midpoint_velocity;
            runtime.accel_time =
                2.0 * ((runtime.cruise_velocity - runtime.exit_velocity) / runtime.jerk).sqrt();
            runtime.midpoint_acceleration =
                2.0 * (runtime.cruise_velocity - runtime.exit_velocity) / runtime.accel_time;
            runtime.segments = ((runtime.move_time * MICROSECONDS_PER_MINUTE)
                / (2.0 * segment_target_us))
                .ceil();
            runtime.segment_move_time = runtime.move_time / (2.0 * runtime.segments);
            runtime.segment_accel_time = runtime.accel_time / (2.0 * runtime.segments);
            runtime.elapsed_accel_time = runtime.segment_accel_time / 2.0;
            runtime.segment_count = runtime.segments as u32;
            runtime.microseconds = runtime.segment_move_time * MICROSECONDS_PER_MINUTE;
            runtime.phase = Phase::Run1;
        }
        if self.runtime.phase == Phase::Run1 {
            self.runtime.segment_velocity = self.runtime.cruise_velocity
                - self.runtime.elapsed_accel_time.powi(2) * self.runtime.jerk_div2;
            if self.exec_segment(false) == SegmentOutcome::Complete {
                let runtime = &mut self.runtime;
                runtime.elapsed_accel_time = runtime.segment_accel_time / 2.0;
                runtime.segment_count = runtime.segments as u32;
                runtime.phase = Phase::Run2;
            }
            return Ok(ExecOutcome::Again);
        }
        self.runtime.segment_velocity = self.runtime.midpoint_velocity
            - self.runtime.elapsed_accel_time * self.runtime.midpoint_acceleration
            + self.runtime.elapsed_accel_time.powi(2) * self.runtime.jerk_div2;
        if self.exec_segment(true) == SegmentOutcome::Complete {
            return Ok(ExecOutcome::Done);
        }
        Ok(ExecOutcome::Again)
    }

    /// Prepare one constant-velocity segment and advance the runtime.
    ///
    /// `snap_candidate` marks the last segment of the whole move: there the
    /// target is forced onto the planned endpoint to cancel accumulated
    /// rounding. Never snap while decelerating into a hold, since the move
    /// will stop short of its endpoint.
    fn exec_segment(&mut self, snap_candidate: bool) -> SegmentOutcome {
        let snap = snap_candidate
            && self.runtime.segment_count == 1
            && self.machine.motion == MotionState::Run
            && self.machine.cycle == CycleState::Started;

        let mut travel = [0.0; AXES];
        for i in 0..AXES {
            let target = if snap {
                self.runtime.endpoint[i]
            } else {
                self.runtime.position[i]
                    + self.runtime.unit[i]
                        * self.runtime.segment_velocity
                        * self.runtime.segment_move_time
            };
            self.runtime.target[i] = target;
            travel[i] = target - self.runtime.position[i];
        }

        let steps = self
            .kinematics
            .travel_to_steps(&travel, self.runtime.microseconds);
        tracing::trace!(
            velocity = self.runtime.segment_velocity,
            microseconds = self.runtime.microseconds,
            "segment prepared"
        );
        if self
            .stepper
            .prep_line(&steps, self.runtime.microseconds)
            .is_ok()
        {
            self.runtime.position = self.runtime.target;
        }

        self.runtime.elapsed_accel_time += self.runtime.segment_accel_time; // inert while cruising
        self.runtime.segment_count -= 1;
        if self.runtime.segment_count == 0 {
            SegmentOutcome::Complete
        } else {
            SegmentOutcome::Incomplete
        }
    }
}
