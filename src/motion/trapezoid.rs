// src/motion/trapezoid.rs - Jerk ramp relations and head/body/tail computation

use super::pool::PlanningBlock;
use crate::config::Tolerances;

/// Iteration cap for the two-ramp cruise search; past this the symmetric
/// solution is used so execution timing stays bounded.
const MAX_CRUISE_ITERATIONS: usize = 20;

/// Distance needed by a constant-jerk ramp to change speed between `vi` and
/// `vt`:  L = |Vt-Vi| · sqrt(|Vt-Vi| / Jm). Valid for either direction.
pub fn ramp_length(vi: f64, vt: f64, recip_jerk: f64) -> f64 {
    let dv = (vi - vt).abs();
    dv * (dv * recip_jerk).sqrt()
}

/// Speed reachable after travelling `length` from `vi` under a constant-jerk
/// ramp:  Vt = L^(2/3) · Jm^(1/3) + Vi. Inverse of [`ramp_length`].
pub fn ramp_velocity(vi: f64, length: f64, cubert_jerk: f64) -> f64 {
    length.powf(2.0 / 3.0) * cubert_jerk + vi
}

/// Split a block's length into head (acceleration), body (cruise) and tail
/// (deceleration) sections for the requested entry/cruise/exit velocities.
///
/// Requires `entry_velocity <= cruise_velocity >= exit_velocity` on entry.
/// Lengths come out accurate; velocities may be degraded when the line is
/// too short to honour them, erring on the slow side. Velocities are kept
/// meaningful even for zero-length sections so neighbouring blocks can chain
/// their entries and exits.
pub fn calculate(block: &mut PlanningBlock, tol: &Tolerances) {
    block.head_length = 0.0;
    block.body_length = 0.0;
    block.tail_length = 0.0;

    // too short to plan at all
    if block.length < tol.epsilon {
        block.length = 0.0;
        return;
    }

    // body only - all three velocities are effectively equal
    if ((block.cruise_velocity - block.entry_velocity) < tol.velocity_tolerance)
        && ((block.cruise_velocity - block.exit_velocity) < tol.velocity_tolerance)
    {
        block.body_length = block.length;
        return;
    }

    // full trapezoid with a cruise plateau
    block.head_length = ramp_length(block.entry_velocity, block.cruise_velocity, block.recip_jerk);
    if block.head_length < block.length {
        block.tail_length =
            ramp_length(block.exit_velocity, block.cruise_velocity, block.recip_jerk);
        block.body_length = block.length - block.head_length - block.tail_length;
        if block.body_length > tol.epsilon {
            finalize(block, tol);
            return;
        }
    }

    // symmetric two-ramp case - entry and exit match, cruise is whatever
    // half the line can reach. The tolerance absorbs FP rounding.
    if (block.entry_velocity - block.exit_velocity).abs() < tol.velocity_tolerance {
        block.body_length = 0.0;
        block.head_length = block.length / 2.0;
        block.tail_length = block.head_length;
        block.cruise_velocity =
            ramp_velocity(block.entry_velocity, block.head_length, block.cubert_jerk);
        return;
    }

    // line too short to bridge entry and exit at all: collapse to a single
    // ramp and degrade whichever endpoint cannot be met
    let minimum_length = ramp_length(block.entry_velocity, block.exit_velocity, block.recip_jerk);
    if block.length < (minimum_length - tol.length_tolerance) {
        if block.entry_velocity < block.exit_velocity {
            block.head_length = block.length;
            block.tail_length = 0.0;
            block.exit_velocity =
                ramp_velocity(block.entry_velocity, block.length, block.cubert_jerk);
        } else {
            block.head_length = 0.0;
            block.tail_length = block.length;
            block.entry_velocity =
                ramp_velocity(block.exit_velocity, block.length, block.cubert_jerk);
        }
        block.body_length = 0.0;
        return;
    }

    // single ramp plus body - cruise is pinned to the faster endpoint
    if block.length < (minimum_length * tol.length_factor) {
        if block.entry_velocity < block.exit_velocity {
            block.cruise_velocity = block.exit_velocity;
            block.head_length =
                ramp_length(block.entry_velocity, block.exit_velocity, block.recip_jerk);
            block.body_length = block.length - block.head_length;
            block.tail_length = 0.0;
        } else {
            block.cruise_velocity = block.entry_velocity;
            block.tail_length =
                ramp_length(block.entry_velocity, block.exit_velocity, block.recip_jerk);
            block.body_length = block.length - block.tail_length;
            block.head_length = 0.0;
        }
        finalize(block, tol);
        return;
    }

    // asymmetric two-ramp case: walk the cruise velocity down from the
    // ceiling, each step re-fitting the longer ramp to the line
    let mut computed_velocity = block.cruise_vmax;
    let mut converged = false;
    for _ in 0..MAX_CRUISE_ITERATIONS {
        block.cruise_velocity = computed_velocity;
        block.head_length =
            ramp_length(block.entry_velocity, block.cruise_velocity, block.recip_jerk);
        block.tail_length =
            ramp_length(block.exit_velocity, block.cruise_velocity, block.recip_jerk);
        if block.head_length > block.tail_length {
            block.head_length = (block.head_length
                / (block.head_length + block.tail_length))
                * block.length;
            computed_velocity =
                ramp_velocity(block.entry_velocity, block.head_length, block.cubert_jerk);
        } else {
            block.tail_length = (block.tail_length
                / (block.head_length + block.tail_length))
                * block.length;
            computed_velocity =
                ramp_velocity(block.exit_velocity, block.tail_length, block.cubert_jerk);
        }
        if ((block.cruise_velocity - computed_velocity).abs() / computed_velocity)
            <= tol.iteration_error_pct
        {
            converged = true;
            break;
        }
    }
    if !converged {
        // fall back to an even split so lengths stay exact
        computed_velocity = ramp_velocity(
            block.entry_velocity.max(block.exit_velocity),
            block.length / 2.0,
            block.cubert_jerk,
        );
        block.cruise_velocity = computed_velocity;
        block.head_length = block.length / 2.0;
        block.tail_length = block.head_length;
        block.body_length = 0.0;
        finalize(block, tol);
        return;
    }
    block.cruise_velocity = computed_velocity;
    block.head_length = ramp_length(block.entry_velocity, block.cruise_velocity, block.recip_jerk);
    block.tail_length = ramp_length(block.exit_velocity, block.cruise_velocity, block.recip_jerk);
    block.body_length = 0.0;
    finalize(block, tol);
}

/// Zero out any section shorter than the minimum and hand its length to a
/// neighbour, keeping the total exact.
fn finalize(block: &mut PlanningBlock, tol: &Tolerances) {
    if block.head_length < tol.min_section_length {
        block.head_length = 0.0;
        block.body_length = block.length - block.tail_length;
    }
    if block.body_length < tol.min_section_length {
        block.body_length = 0.0;
        block.tail_length = block.length - block.head_length;
    }
    if block.tail_length < tol.min_section_length {
        block.tail_length = 0.0;
        if block.head_length > block.body_length {
            block.head_length = block.length - block.body_length;
        } else {
            block.body_length = block.length - block.head_length;
        }
    }
}
