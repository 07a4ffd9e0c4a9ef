// src/motion/state.rs - Machine-level motion, cycle and hold state
//
// The executor and the main-loop planner coordinate through these fields:
// the executor reads them at segment boundaries, the main loop writes them
// when asserting holds, flushing, or restarting a cycle.

/// Aggregate motion condition of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Stop,
    Run,
    Hold,
}

/// A cycle spans from the first executed block until the queue drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Off,
    Started,
}

/// Feedhold progression.
///
/// `Sync` asks the executor to finish its current segment, `Plan` hands the
/// queue to the main loop for deceleration replanning, `Decel` runs the
/// braking profile, `Hold` parks at zero velocity, and `EndHold` releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldState {
    #[default]
    Off,
    Sync,
    Plan,
    Decel,
    Hold,
    EndHold,
}

/// Path blending mode applied at block junctions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathControl {
    /// Corner velocity limited only by the junction deviation model
    #[default]
    Continuous,
    /// Every move enters and exits at zero velocity
    ExactStop,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MachineState {
    pub motion: MotionState,
    pub cycle: CycleState,
    pub hold: HoldState,
    pub path_control: PathControl,
}

impl MachineState {
    /// Assert a feedhold. Only meaningful while motion is running; returns
    /// whether the hold was actually started.
    pub fn request_feedhold(&mut self) -> bool {
        if self.hold == HoldState::Off && self.motion == MotionState::Run {
            self.hold = HoldState::Sync;
            self.motion = MotionState::Hold;
            return true;
        }
        false
    }

    /// Start (or restart) a cycle. Re-asserting during a hold schedules the
    /// hold release.
    pub fn cycle_start(&mut self) {
        self.cycle = CycleState::Started;
        if self.hold == HoldState::Hold {
            self.hold = HoldState::EndHold;
        }
    }

    /// End the cycle once the queue has drained.
    pub fn cycle_end(&mut self) {
        self.cycle = CycleState::Off;
        self.motion = MotionState::Stop;
    }
}
