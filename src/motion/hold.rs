// src/motion/hold.rs - Feedhold planning and release
//
// A hold is a cooperation between contexts. The canonical machine asserts
// it; the executor notices at a segment boundary and yields (Sync -> Plan);
// the main loop replans the in-flight move plus enough of the queue to
// decelerate to zero (Plan -> Decel); the executor rides the new profile
// down and parks at the hold point (Decel -> Hold); cycle start releases it
// (Hold -> EndHold -> Off).

use super::executor::{ExecOutcome, Phase, Section};
use super::junction::vector_length;
use super::pool::MoveState;
use super::state::{HoldState, MotionState};
use super::trapezoid::{ramp_length, ramp_velocity};
use crate::motion::planner::MotionPlanner;

impl MotionPlanner {
    /// Ask the machine to decelerate to a controlled stop. The actual
    /// replanning happens in [`plan_hold_callback`] once the executor has
    /// yielded.
    ///
    /// [`plan_hold_callback`]: MotionPlanner::plan_hold_callback
    pub fn request_feedhold(&mut self) {
        if self.machine.request_feedhold() {
            tracing::info!("feedhold requested");
        }
    }

    /// Release a hold and restart motion.
    pub fn end_feedhold(&mut self) {
        self.machine.cycle_start();
        self.end_hold_callback();
    }

    /// Main-loop callback: replan the runtime and the queue so velocity
    /// reaches zero within the available braking distance.
    ///
    /// Case A: the braking distance fits inside what is left of the current
    /// block. The runtime becomes a pure deceleration tail and the current
    /// block is rewritten as the post-hold remainder, entered from zero.
    ///
    /// Case B: braking overruns the current block. The runtime decelerates
    /// to the best velocity the remaining distance allows, then queue
    /// entries are consumed (each copied into its predecessor's slot) until
    /// the accumulated length absorbs the rest of the braking. The block
    /// after the one that reaches zero becomes the release point.
    pub fn plan_hold_callback(&mut self) -> ExecOutcome {
        if self.machine.hold != HoldState::Plan {
            return ExecOutcome::NoOp;
        }
        let Some(bf) = self.pool.current_run() else {
            return ExecOutcome::NoOp;
        };
        let mut bp = bf;

        // velocity to shed and the room left to shed it in
        let braking_velocity = self.runtime.segment_velocity;
        let (recip_jerk, cubert_jerk) = {
            let block = self.pool.block(bp);
            (block.recip_jerk, block.cubert_jerk)
        };
        let mut braking_length = ramp_length(braking_velocity, 0.0, recip_jerk);
        let mut remaining_length =
            vector_length(&self.pool.block(bf).target, &self.runtime.position);

        if braking_length < remaining_length {
            // Case A: decelerate to zero inside the current block
            let runtime = &mut self.runtime;
            runtime.section = Section::Tail;
            runtime.phase = Phase::New;
            runtime.tail_length = braking_length;
            runtime.cruise_velocity = braking_velocity;
            runtime.exit_velocity = 0.0;

            let block = self.pool.block_mut(bp);
            block.length = remaining_length - braking_length;
            block.delta_vmax = ramp_velocity(0.0, block.length, block.cubert_jerk);
            block.entry_vmax = 0.0;
            block.move_state = MoveState::New;
            tracing::debug!(
                braking_length,
                remainder = block.length,
                "hold fits in the running block"
            );
        } else {
            // Case B: shed what the current block allows, then keep braking
            // across the queue
            let runtime = &mut self.runtime;
            runtime.section = Section::Tail;
            runtime.phase = Phase::New;
            runtime.tail_length = remaining_length;
            runtime.cruise_velocity = braking_velocity;
            runtime.exit_velocity =
                braking_velocity - ramp_velocity(0.0, remaining_length, cubert_jerk);

            let mut braking_velocity = self.runtime.exit_velocity;
            loop {
                self.pool.copy_from_next(bp);
                let (block_length, block_recip, block_cubert) = {
                    let block = self.pool.block(bp);
                    (block.length, block.recip_jerk, block.cubert_jerk)
                };
                braking_length = ramp_length(braking_velocity, 0.0, block_recip);
                remaining_length = block_length - braking_length;
                if braking_length > block_length {
                    // this block cannot absorb the rest of the braking
                    let exit_vmax =
                        braking_velocity - ramp_velocity(0.0, block_length, block_cubert);
                    let block = self.pool.block_mut(bp);
                    block.entry_vmax = braking_velocity;
                    block.exit_vmax = exit_vmax;
                    braking_velocity = exit_vmax;
                    bp = self.pool.next(bp);
                } else {
                    // deceleration completes inside this block
                    let block = self.pool.block_mut(bp);
                    block.entry_vmax = braking_velocity;
                    block.length = braking_length;
                    block.exit_vmax = 0.0;
                    bp = self.pool.next(bp);
                    break;
                }
                if bp == bf {
                    break; // wrapped the whole ring
                }
            }

            // the release point carries the leftover of the split block
            let block = self.pool.block_mut(bp);
            block.entry_vmax = 0.0;
            block.length = remaining_length;
            block.delta_vmax = ramp_velocity(0.0, remaining_length, block.cubert_jerk);
            tracing::debug!(remainder = remaining_length, "hold spans queued blocks");
        }

        self.pool.block_mut(bp).hold_point = true;
        self.reset_replannable();
        if let Some(last) = self.pool.last() {
            self.plan_block_list(last);
        }
        self.machine.hold = HoldState::Decel;
        ExecOutcome::Done
    }

    /// Main-loop callback completing a hold release scheduled by cycle
    /// start.
    pub fn end_hold_callback(&mut self) -> ExecOutcome {
        if self.machine.hold != HoldState::EndHold {
            return ExecOutcome::NoOp;
        }
        self.machine.hold = HoldState::Off;
        let Some(bf) = self.pool.current_run() else {
            self.machine.motion = MotionState::Stop;
            return ExecOutcome::NoOp;
        };
        self.machine.motion = MotionState::Run;
        self.pool.block_mut(bf).hold_point = false;
        self.stepper.request_exec();
        tracing::info!("feedhold released");
        ExecOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::motion::executor::NullCallbacks;
    use crate::motion::stepper::SimStepper;
    use crate::motion::{ExecOutcome, AXES};

    fn planner() -> (MotionPlanner, SimStepper) {
        let mut config = PlannerConfig::default();
        config.steps_per_mm = [1.0; crate::motion::MOTORS];
        let stepper = SimStepper::new();
        let planner = MotionPlanner::new(
            config,
            Box::new(stepper.clone()),
            Box::new(NullCallbacks),
        );
        (planner, stepper)
    }

    fn target(x: f64, y: f64) -> [f64; AXES] {
        let mut t = [0.0; AXES];
        t[0] = x;
        t[1] = y;
        t
    }

    /// Pump exec and the hold-planning callback the way the main loop does,
    /// until the executor goes idle.
    fn run_until_idle(planner: &mut MotionPlanner) {
        for _ in 0..100_000 {
            planner.plan_hold_callback();
            match planner.exec().unwrap() {
                ExecOutcome::NoOp => return,
                _ => {}
            }
        }
        panic!("executor never went idle");
    }

    #[test]
    fn hold_without_motion_is_ignored() {
        let (mut planner, _stepper) = planner();
        planner.request_feedhold();
        assert_eq!(planner.machine.hold, HoldState::Off);
    }

    #[test]
    fn hold_decelerates_parks_and_resumes_exactly() {
        let (mut planner, _stepper) = planner();
        planner.submit_accel_line(target(100.0, 0.0), 0.1).unwrap();

        // get a few segments into the move, then assert the hold
        for _ in 0..5 {
            planner.exec().unwrap();
        }
        planner.request_feedhold();
        assert_eq!(planner.machine.hold, HoldState::Sync);

        // the next segment boundary hands control to hold planning
        planner.exec().unwrap();
        assert_eq!(planner.machine.hold, HoldState::Plan);
        assert_eq!(planner.plan_hold_callback(), ExecOutcome::Done);
        assert_eq!(planner.machine.hold, HoldState::Decel);

        run_until_idle(&mut planner);
        assert_eq!(planner.machine.hold, HoldState::Hold);
        assert_eq!(planner.machine.motion, MotionState::Hold);
        // parked short of the endpoint
        assert!(planner.get_runtime_position(0) < 100.0);
        assert!(planner.get_runtime_position(0) > 0.0);

        planner.end_feedhold();
        assert_eq!(planner.machine.hold, HoldState::Off);
        assert_eq!(planner.machine.motion, MotionState::Run);

        run_until_idle(&mut planner);
        // remaining travel completes on the exact target
        assert_eq!(planner.get_runtime_position(0), 100.0);
        assert_eq!(planner.get_runtime_position(1), 0.0);
    }

    #[test]
    fn hold_spanning_multiple_short_blocks_reaches_zero() {
        let (mut planner, _stepper) = planner();
        // short fast blocks: braking from speed cannot fit in one of them
        for i in 1..=6 {
            planner
                .submit_accel_line(target(2.0 * i as f64, 0.0), 0.002)
                .unwrap();
        }

        // run until the machine is near full speed: braking from here needs
        // more distance than one 2mm block holds
        let mut at_speed = false;
        for _ in 0..100_000 {
            match planner.exec().unwrap() {
                ExecOutcome::NoOp => break,
                _ => {}
            }
            if planner.get_runtime_velocity() >= 900.0 {
                at_speed = true;
                break;
            }
        }
        assert!(at_speed, "chain never reached braking-test speed");
        planner.request_feedhold();
        planner.exec().unwrap(); // segment boundary: Sync -> Plan
        assert_eq!(planner.plan_hold_callback(), ExecOutcome::Done);

        run_until_idle(&mut planner);
        assert_eq!(planner.machine.hold, HoldState::Hold);
        let parked = planner.get_runtime_position(0);
        assert!(parked < 12.0);

        planner.end_feedhold();
        run_until_idle(&mut planner);
        // the full programme still lands on its final target
        assert_eq!(planner.get_runtime_position(0), 12.0);
    }

    #[test]
    fn end_feedhold_without_a_hold_is_harmless() {
        let (mut planner, _stepper) = planner();
        planner.end_feedhold();
        assert_eq!(planner.machine.hold, HoldState::Off);
        assert_eq!(planner.end_hold_callback(), ExecOutcome::NoOp);
    }
}
