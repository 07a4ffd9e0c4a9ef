// src/motion/stepper.rs - Downstream stepper interface
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::MOTORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StepperError {
    #[error("stepper prep buffer is busy")]
    PrepBusy,
}

/// The narrow interface the executor drives. One prepared item per exec
/// tick; `prep_null` keeps loader ordering intact for auxiliary commands
/// that move nothing.
pub trait StepperLink: Send + Sync {
    fn prep_line(&mut self, steps: &[f64; MOTORS], microseconds: f64) -> Result<(), StepperError>;
    fn prep_dwell(&mut self, microseconds: f64);
    fn prep_null(&mut self);
    /// Ask the pulse generator to schedule another exec tick.
    fn request_exec(&mut self);
    fn is_busy(&self) -> bool;
}

/// One item handed to the pulse generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreparedSegment {
    Line {
        steps: [f64; MOTORS],
        microseconds: f64,
    },
    Dwell {
        microseconds: f64,
    },
    Null,
}

#[derive(Debug, Default)]
pub struct SegmentTrace {
    pub prepared: Vec<PreparedSegment>,
    pub exec_requests: u32,
}

impl SegmentTrace {
    pub fn lines(&self) -> impl Iterator<Item = (&[f64; MOTORS], f64)> {
        self.prepared.iter().filter_map(|segment| match segment {
            PreparedSegment::Line {
                steps,
                microseconds,
            } => Some((steps, *microseconds)),
            _ => None,
        })
    }

    /// Net step count accumulated on one motor across all prepared lines.
    pub fn total_steps(&self, motor: usize) -> f64 {
        self.lines().map(|(steps, _)| steps[motor]).sum()
    }
}

/// Recording stepper used by the simulator and the test suite. Never busy,
/// never rejects a prep; everything it is handed lands in the shared trace.
#[derive(Debug, Clone, Default)]
pub struct SimStepper {
    trace: Arc<Mutex<SegmentTrace>>,
}

impl SimStepper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the recorded trace; clone the stepper before moving it
    /// into a planner and keep this side to inspect what was prepared.
    pub fn trace(&self) -> Arc<Mutex<SegmentTrace>> {
        self.trace.clone()
    }

    pub fn line_count(&self) -> usize {
        self.trace.lock().unwrap().lines().count()
    }

    pub fn total_steps(&self, motor: usize) -> f64 {
        self.trace.lock().unwrap().total_steps(motor)
    }

    pub fn exec_requests(&self) -> u32 {
        self.trace.lock().unwrap().exec_requests
    }
}

impl StepperLink for SimStepper {
    fn prep_line(&mut self, steps: &[f64; MOTORS], microseconds: f64) -> Result<(), StepperError> {
        self.trace
            .lock()
            .unwrap()
            .prepared
            .push(PreparedSegment::Line {
                steps: *steps,
                microseconds,
            });
        Ok(())
    }

    fn prep_dwell(&mut self, microseconds: f64) {
        self.trace
            .lock()
            .unwrap()
            .prepared
            .push(PreparedSegment::Dwell { microseconds });
    }

    fn prep_null(&mut self) {
        self.trace.lock().unwrap().prepared.push(PreparedSegment::Null);
    }

    fn request_exec(&mut self) {
        self.trace.lock().unwrap().exec_requests += 1;
    }

    fn is_busy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_stepper_records_in_order() {
        let stepper = SimStepper::new();
        let mut link = stepper.clone();

        link.prep_line(&[1.0, 2.0, 0.0, 0.0], 5_000.0).unwrap();
        link.prep_null();
        link.prep_dwell(250_000.0);
        link.request_exec();

        let trace = stepper.trace();
        let trace = trace.lock().unwrap();
        assert_eq!(trace.prepared.len(), 3);
        assert!(matches!(trace.prepared[1], PreparedSegment::Null));
        assert!(matches!(
            trace.prepared[2],
            PreparedSegment::Dwell { microseconds } if microseconds == 250_000.0
        ));
        assert_eq!(trace.exec_requests, 1);
        assert_eq!(trace.total_steps(0), 1.0);
    }
}
