// src/lib.rs - Cartesian trajectory planning library
//! Jerk-limited Cartesian trajectory planning for CNC motion control.
//!
//! Motion commands enter through [`MotionPlanner`] submissions, land in a
//! fixed ring of planning blocks, and are continuously re-optimised by a
//! two-pass look-ahead as new moves arrive. The runtime executor dequeues
//! one block at a time and emits short constant-velocity segments to a
//! [`StepperLink`], one segment per tick, so it can be pumped from a stepper
//! interrupt (or, host-side, from the [`MotionController`] tick loop).

pub mod config;
pub mod motion;

pub use config::{load_config, AxisConfig, ConfigError, PlannerConfig};
pub use motion::controller::MotionController;
pub use motion::executor::{ExecError, ExecOutcome, MachineCallbacks, NullCallbacks, SpindleDirection};
pub use motion::planner::{MotionPlanner, PlanError};
pub use motion::stepper::{PreparedSegment, SimStepper, StepperLink};
pub use motion::{QueueStats, AXES, MOTORS};
