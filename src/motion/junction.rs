// src/motion/junction.rs - Corner velocity limits and vector helpers

use super::AXES;
use crate::config::PlannerConfig;

/// Returned for effectively collinear junctions: no cornering limit.
pub const STRAIGHT_JUNCTION_VMAX: f64 = 10_000_000.0;

pub fn vector_length(a: &[f64; AXES], b: &[f64; AXES]) -> f64 {
    let mut sum = 0.0;
    for i in 0..AXES {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum.sqrt()
}

/// Unit vector from `from` to `to`. `length` must be the distance between
/// the two points and must be non-zero.
pub fn unit_vector(from: &[f64; AXES], to: &[f64; AXES], length: f64) -> [f64; AXES] {
    let mut unit = [0.0; AXES];
    for i in 0..AXES {
        unit[i] = (to[i] - from[i]) / length;
    }
    unit
}

/// Cornering velocity model: a circular arc is fitted tangent to both moves
/// and the entry speed is limited so centripetal acceleration on that arc
/// stays within the configured budget. The deviation (distance from the
/// corner point to the arc) sets the effective radius.
#[derive(Debug, Clone)]
pub struct JunctionDeviation {
    deviations: [f64; AXES],
    corner_acceleration: f64,
}

impl JunctionDeviation {
    pub fn new(deviations: [f64; AXES], corner_acceleration: f64) -> Self {
        Self {
            deviations,
            corner_acceleration,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        let mut deviations = [0.0; AXES];
        for i in 0..AXES {
            deviations[i] = config.axes[i].junction_deviation;
        }
        Self::new(deviations, config.junction_acceleration)
    }

    /// Maximum speed through the corner between two moves, both unit
    /// vectors taken as outgoing from the corner (hence the negated dot
    /// product).
    pub fn junction_vmax(&self, a_unit: &[f64; AXES], b_unit: &[f64; AXES]) -> f64 {
        let mut costheta = 0.0;
        for i in 0..AXES {
            costheta -= a_unit[i] * b_unit[i];
        }

        if costheta < -0.99 {
            return STRAIGHT_JUNCTION_VMAX; // straight line cases
        }
        if costheta > 0.99 {
            return 0.0; // reversal cases
        }
        let delta = self.composite_deviation(a_unit, b_unit);
        let sintheta_over2 = ((1.0 - costheta) / 2.0).sqrt();
        let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);
        (radius * self.corner_acceleration).sqrt()
    }

    /// Blend the per-axis deviation budgets by each axis' contribution to
    /// the two moves, so axes with different dynamics (a slow screw-driven Z
    /// against a belted XY, rotaries against linears) shape the corner
    /// radius accordingly.
    fn composite_deviation(&self, a_unit: &[f64; AXES], b_unit: &[f64; AXES]) -> f64 {
        let mut a_delta = 0.0;
        let mut b_delta = 0.0;
        for i in 0..AXES {
            a_delta += (a_unit[i] * self.deviations[i]).powi(2);
            b_delta += (b_unit[i] * self.deviations[i]).powi(2);
        }
        (a_delta.sqrt() + b_delta.sqrt()) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(deviation: f64) -> JunctionDeviation {
        JunctionDeviation::new([deviation; AXES], 200_000.0)
    }

    fn unit(x: f64, y: f64) -> [f64; AXES] {
        let length = (x * x + y * y).sqrt();
        let mut u = [0.0; AXES];
        u[0] = x / length;
        u[1] = y / length;
        u
    }

    #[test]
    fn vector_length_is_euclidean_over_all_axes() {
        let a = [3.0, 4.0, 0.0, 0.0, 0.0, 0.0];
        let b = [0.0; AXES];
        assert!((vector_length(&a, &b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn unit_vector_normalises() {
        let from = [0.0; AXES];
        let to = [10.0, 10.0, 0.0, 0.0, 0.0, 0.0];
        let length = vector_length(&to, &from);
        let u = unit_vector(&from, &to, length);
        let norm: f64 = u.iter().map(|c| c * c).sum();
        assert!((norm - 1.0).abs() < 1e-12);
        assert!((u[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn collinear_moves_pass_straight_through() {
        let model = uniform(0.05);
        let u = unit(1.0, 0.0);
        assert!(model.junction_vmax(&u, &u) >= 1_000_000.0);
    }

    #[test]
    fn reversal_forces_a_full_stop() {
        let model = uniform(0.05);
        let a = unit(1.0, 0.0);
        let b = unit(-1.0, 0.0);
        assert_eq!(model.junction_vmax(&a, &b), 0.0);
    }

    #[test]
    fn right_angle_matches_closed_form() {
        let model = uniform(0.05);
        let a = unit(1.0, 0.0);
        let b = unit(0.0, 1.0);

        // cos(theta) = 0, sin(theta/2) = sqrt(1/2)
        let sin_half = (0.5f64).sqrt();
        let radius = 0.05 * sin_half / (1.0 - sin_half);
        let expected = (radius * 200_000.0).sqrt();

        let vmax = model.junction_vmax(&a, &b);
        assert!((vmax - expected).abs() < 1e-9);
        assert!(vmax < STRAIGHT_JUNCTION_VMAX);
    }

    #[test]
    fn shallower_corners_allow_more_speed() {
        let model = uniform(0.05);
        let a = unit(1.0, 0.0);
        let bend_30 = model.junction_vmax(&a, &unit(0.866, 0.5));
        let bend_90 = model.junction_vmax(&a, &unit(0.0, 1.0));
        let bend_120 = model.junction_vmax(&a, &unit(-0.5, 0.866));
        assert!(bend_30 > bend_90);
        assert!(bend_90 > bend_120);
    }

    #[test]
    fn z_only_deviation_shrinks_xy_corners() {
        // XY corner on a machine whose Z axis carries the only generous
        // deviation budget: the composite deviation ignores Z.
        let mut deviations = [0.01; AXES];
        deviations[2] = 1.0;
        let model = JunctionDeviation::new(deviations, 200_000.0);
        let tight = model.junction_vmax(&unit(1.0, 0.0), &unit(0.0, 1.0));

        let loose = uniform(1.0).junction_vmax(&unit(1.0, 0.0), &unit(0.0, 1.0));
        assert!(tight < loose);
    }
}
