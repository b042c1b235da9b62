// Operator response curves
// Maps a raw axis value (-1.0..=1.0) to a raw-power motor command.

use serde::{Deserialize, Serialize};

use crate::error::{DrivetrainError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCurve {
    Linear,
    /// Sign-preserving square: fine control near centre, full power at the stops
    #[default]
    Quad,
    Cubic,
}

/// Stateless axis-to-command mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveProfile {
    pub curve: ProfileCurve,
    /// Inputs with magnitude at or below this read as zero
    pub deadband: f64,
}

impl DriveProfile {
    pub fn new(curve: ProfileCurve) -> Self {
        Self {
            curve,
            deadband: 0.0,
        }
    }

    pub fn with_deadband(mut self, deadband: f64) -> Self {
        self.deadband = if deadband.is_nan() {
            0.0
        } else {
            deadband.clamp(0.0, 0.99)
        };
        self
    }

    /// Deadband must lie in 0.0..1.0; anything else shapes rest into motion
    pub fn validate(&self) -> Result<()> {
        if self.deadband.is_finite() && (0.0..1.0).contains(&self.deadband) {
            Ok(())
        } else {
            Err(DrivetrainError::Configuration(format!(
                "deadband must be in [0, 1), got {}",
                self.deadband
            )))
        }
    }

    /// Map an axis reading to a command in -1.0..=1.0
    pub fn apply(&self, axis: f64) -> f64 {
        if !axis.is_finite() {
            return 0.0;
        }
        let axis = axis.clamp(-1.0, 1.0);
        let magnitude = axis.abs();
        if magnitude <= self.deadband {
            return 0.0;
        }

        // Rescale so output starts from zero at the deadband edge
        let scaled = (magnitude - self.deadband) / (1.0 - self.deadband);
        let shaped = match self.curve {
            ProfileCurve::Linear => scaled,
            ProfileCurve::Quad => scaled * scaled,
            ProfileCurve::Cubic => scaled * scaled * scaled,
        };
        shaped.copysign(axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_preserves_sign() {
        let profile = DriveProfile::new(ProfileCurve::Quad);
        assert_eq!(profile.apply(0.5), 0.25);
        assert_eq!(profile.apply(-0.5), -0.25);
        assert_eq!(profile.apply(1.0), 1.0);
        assert_eq!(profile.apply(0.0), 0.0);
    }

    #[test]
    fn test_cubic_and_linear() {
        assert_eq!(DriveProfile::new(ProfileCurve::Cubic).apply(-0.5), -0.125);
        assert_eq!(DriveProfile::new(ProfileCurve::Linear).apply(0.3), 0.3);
    }

    #[test]
    fn test_out_of_range_input_is_clamped() {
        let profile = DriveProfile::new(ProfileCurve::Linear);
        assert_eq!(profile.apply(3.0), 1.0);
        assert_eq!(profile.apply(-7.5), -1.0);
        assert_eq!(profile.apply(f64::NAN), 0.0);
    }

    #[test]
    fn test_deadband() {
        let profile = DriveProfile::new(ProfileCurve::Linear).with_deadband(0.1);
        assert_eq!(profile.apply(0.05), 0.0);
        assert_eq!(profile.apply(-0.1), 0.0);
        assert!((profile.apply(0.55) - 0.5).abs() < 1e-9);
        assert_eq!(profile.apply(1.0), 1.0);
    }

    #[test]
    fn test_deadband_outside_unit_range_rejected() {
        for deadband in [-0.5, 1.0, 3.0, f64::NAN, f64::INFINITY] {
            let profile = DriveProfile {
                curve: ProfileCurve::Linear,
                deadband,
            };
            assert!(profile.validate().is_err(), "deadband {}", deadband);
        }
        assert!(DriveProfile::default().validate().is_ok());
        assert!(DriveProfile::new(ProfileCurve::Linear)
            .with_deadband(0.2)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_with_deadband_sanitises() {
        let profile = DriveProfile::new(ProfileCurve::Linear);
        assert_eq!(profile.with_deadband(-0.5).deadband, 0.0);
        assert_eq!(profile.with_deadband(f64::NAN).deadband, 0.0);
        assert_eq!(profile.with_deadband(5.0).deadband, 0.99);
        assert_eq!(profile.with_deadband(-0.5).apply(0.0), 0.0);
    }

    #[test]
    fn test_default_is_quad() {
        assert_eq!(DriveProfile::default().curve, ProfileCurve::Quad);
    }
}
