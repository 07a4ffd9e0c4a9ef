// src/config.rs - Planner configuration with TOML support
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::motion::{AXES, MOTORS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-axis planning limits.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AxisConfig {
    /// Maximum jerk for this axis (mm/min³)
    #[serde(default = "default_jerk_max")]
    pub jerk_max: f64,

    /// Cornering deviation budget for this axis (mm)
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            jerk_max: default_jerk_max(),
            junction_deviation: default_junction_deviation(),
        }
    }
}

/// Numeric guard bands used throughout planning and execution.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Tolerances {
    /// Threshold below which lengths and times are treated as zero
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Velocities closer than this are considered equal (mm/min)
    #[serde(default = "default_velocity_tolerance")]
    pub velocity_tolerance: f64,

    /// Allowed error when comparing section lengths (mm)
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: f64,

    /// Sections shorter than this are zeroed and redistributed (mm)
    #[serde(default = "default_min_section_length")]
    pub min_section_length: f64,

    /// Lines shorter than minimum × this factor skip the cruise plateau
    #[serde(default = "default_length_factor")]
    pub length_factor: f64,

    /// Relative convergence bound for the two-ramp cruise iteration
    #[serde(default = "default_iteration_error_pct")]
    pub iteration_error_pct: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            velocity_tolerance: default_velocity_tolerance(),
            length_tolerance: default_length_tolerance(),
            min_section_length: default_min_section_length(),
            length_factor: default_length_factor(),
            iteration_error_pct: default_iteration_error_pct(),
        }
    }
}

/// Main planner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub axes: [AxisConfig; AXES],

    /// Centripetal acceleration budget at corners (mm/min²)
    #[serde(default = "default_junction_acceleration")]
    pub junction_acceleration: f64,

    /// Target duration of one executor segment (µs)
    #[serde(default = "default_segment_target_us")]
    pub segment_target_us: f64,

    /// Number of planning blocks in the ring
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Step scaling per motor (steps/mm)
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: [f64; MOTORS],

    #[serde(default)]
    pub tolerances: Tolerances,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            axes: [AxisConfig::default(); AXES],
            junction_acceleration: default_junction_acceleration(),
            segment_target_us: default_segment_target_us(),
            pool_size: default_pool_size(),
            steps_per_mm: default_steps_per_mm(),
            tolerances: Tolerances::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PlannerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size < 4 {
            return Err(ConfigError::Invalid(format!(
                "pool_size must be at least 4, got {}",
                self.pool_size
            )));
        }
        if self.junction_acceleration <= 0.0 {
            return Err(ConfigError::Invalid(
                "junction_acceleration must be positive".to_string(),
            ));
        }
        if self.segment_target_us <= 0.0 {
            return Err(ConfigError::Invalid(
                "segment_target_us must be positive".to_string(),
            ));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            if axis.jerk_max <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "axis {} jerk_max must be positive",
                    i
                )));
            }
            if axis.junction_deviation < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "axis {} junction_deviation must not be negative",
                    i
                )));
            }
        }
        let t = &self.tolerances;
        if t.epsilon <= 0.0 || t.min_section_length <= 0.0 {
            return Err(ConfigError::Invalid(
                "tolerances must be positive".to_string(),
            ));
        }
        if t.length_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "length_factor must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a planner configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PlannerConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    PlannerConfig::from_toml_str(&raw)
}

fn default_jerk_max() -> f64 {
    50_000_000.0
}

fn default_junction_deviation() -> f64 {
    0.05
}

fn default_junction_acceleration() -> f64 {
    200_000.0
}

fn default_segment_target_us() -> f64 {
    5_000.0
}

fn default_pool_size() -> usize {
    48
}

fn default_steps_per_mm() -> [f64; MOTORS] {
    [80.0; MOTORS]
}

fn default_epsilon() -> f64 {
    1e-8
}

fn default_velocity_tolerance() -> f64 {
    10.0
}

fn default_length_tolerance() -> f64 {
    0.002
}

fn default_min_section_length() -> f64 {
    0.001
}

fn default_length_factor() -> f64 {
    1.25
}

fn default_iteration_error_pct() -> f64 {
    0.001
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PlannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 48);
        assert_eq!(config.axes[0].jerk_max, 50_000_000.0);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = PlannerConfig::from_toml_str(
            r#"
            pool_size = 16
            junction_acceleration = 100000.0

            [tolerances]
            min_section_length = 0.002
            "#,
        )
        .unwrap();

        assert_eq!(config.pool_size, 16);
        assert_eq!(config.junction_acceleration, 100_000.0);
        assert_eq!(config.tolerances.min_section_length, 0.002);
        // untouched fields keep their defaults
        assert_eq!(config.segment_target_us, 5_000.0);
        assert_eq!(config.axes[2].junction_deviation, 0.05);
    }

    #[test]
    fn rejects_undersized_pool() {
        let result = PlannerConfig::from_toml_str("pool_size = 2");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_negative_jerk() {
        let mut config = PlannerConfig::default();
        config.axes[1].jerk_max = -1.0;
        assert!(config.validate().is_err());
    }
}
