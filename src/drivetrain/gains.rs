// Closed-loop tuning applied to each leader

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::actuator::{Actuator, Role};
use crate::bus::{fits_register, Register, SharedBus};
use crate::error::{DrivetrainError, Result};

/// Gain slot the drivetrain tunes and selects
pub const PROFILE_SLOT: u8 = 0;

/// Feedback device code for a relative quadrature/magnetic encoder
pub const FEEDBACK_RELATIVE_ENCODER: u8 = 1;

/// Tuning and output bounds for one leader's closed-loop firmware
///
/// Ships untuned (all gains zero); override through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainProfile {
    #[serde(rename = "kF")]
    pub kf: f64,
    #[serde(rename = "kP")]
    pub kp: f64,
    #[serde(rename = "kI")]
    pub ki: f64,
    #[serde(rename = "kD")]
    pub kd: f64,
    pub nominal_forward_volts: f64,
    pub nominal_reverse_volts: f64,
    pub peak_forward_volts: f64,
    pub peak_reverse_volts: f64,
    pub sensor_reversed: bool,
}

impl Default for GainProfile {
    fn default() -> Self {
        Self {
            kf: 0.0,
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            nominal_forward_volts: 0.0,
            nominal_reverse_volts: 0.0,
            peak_forward_volts: 12.0,
            peak_reverse_volts: -12.0,
            sensor_reversed: false,
        }
    }
}

impl GainProfile {
    /// Reject values the firmware would accept but misbehave on
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("kF", self.kf),
            ("kP", self.kp),
            ("kI", self.ki),
            ("kD", self.kd),
            ("nominal_forward_volts", self.nominal_forward_volts),
            ("nominal_reverse_volts", self.nominal_reverse_volts),
            ("peak_forward_volts", self.peak_forward_volts),
            ("peak_reverse_volts", self.peak_reverse_volts),
        ];
        if let Some((name, value)) = values.iter().find(|(_, v)| !fits_register(*v)) {
            return Err(DrivetrainError::Configuration(format!(
                "{} must be a finite f32, got {}",
                name, value
            )));
        }

        if !(0.0 <= self.nominal_forward_volts && self.nominal_forward_volts <= self.peak_forward_volts)
        {
            return Err(DrivetrainError::Configuration(format!(
                "forward output bounds must satisfy 0 <= nominal ({}) <= peak ({})",
                self.nominal_forward_volts, self.peak_forward_volts
            )));
        }
        if !(self.peak_reverse_volts <= self.nominal_reverse_volts && self.nominal_reverse_volts <= 0.0)
        {
            return Err(DrivetrainError::Configuration(format!(
                "reverse output bounds must satisfy peak ({}) <= nominal ({}) <= 0",
                self.peak_reverse_volts, self.nominal_reverse_volts
            )));
        }
        Ok(())
    }

    /// Write the profile into `actuator`'s closed-loop firmware state
    pub fn apply(&self, bus: &SharedBus, actuator: &Actuator) -> Result<()> {
        let id = actuator.id();
        if let Role::Follower { leader } = actuator.role() {
            return Err(DrivetrainError::Configuration(format!(
                "actuator {} follows {} and has no closed loop of its own",
                id, leader
            )));
        }
        if bus.read_u8(id, Register::SensorPresent)? == 0 {
            return Err(DrivetrainError::Configuration(format!(
                "actuator {} has no feedback sensor, closed-loop unsupported",
                id
            )));
        }
        self.validate()?;

        bus.write_u8(id, Register::FeedbackDevice, FEEDBACK_RELATIVE_ENCODER)?;
        bus.write_u8(id, Register::SensorReversed, self.sensor_reversed as u8)?;
        bus.write_f32(id, Register::NominalOutputForward, self.nominal_forward_volts as f32)?;
        bus.write_f32(id, Register::NominalOutputReverse, self.nominal_reverse_volts as f32)?;
        bus.write_f32(id, Register::PeakOutputForward, self.peak_forward_volts as f32)?;
        bus.write_f32(id, Register::PeakOutputReverse, self.peak_reverse_volts as f32)?;

        bus.write_u8(id, Register::ProfileSlot, PROFILE_SLOT)?;
        bus.write_f32(id, Register::GainF, self.kf as f32)?;
        bus.write_f32(id, Register::GainP, self.kp as f32)?;
        bus.write_f32(id, Register::GainI, self.ki as f32)?;
        bus.write_f32(id, Register::GainD, self.kd as f32)?;

        debug!(
            "Gains applied to {}: F={} P={} I={} D={}",
            id, self.kf, self.kp, self.ki, self.kd
        );
        Ok(())
    }

    /// Overlay one `key = value` entry; returns false for unknown keys
    fn set(&mut self, key: &str, value: f64) -> bool {
        match key {
            "kF" => self.kf = value,
            "kP" => self.kp = value,
            "kI" => self.ki = value,
            "kD" => self.kd = value,
            "nominal_forward_volts" => self.nominal_forward_volts = value,
            "nominal_reverse_volts" => self.nominal_reverse_volts = value,
            "peak_forward_volts" => self.peak_forward_volts = value,
            "peak_reverse_volts" => self.peak_reverse_volts = value,
            "sensor_reversed" => self.sensor_reversed = value != 0.0,
            _ => return false,
        }
        true
    }
}

/// One profile per leader
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainProfiles {
    pub left: GainProfile,
    pub right: GainProfile,
}

impl GainProfiles {
    pub fn validate(&self) -> Result<()> {
        self.left.validate()?;
        self.right.validate()
    }

    /// Overlay flat `key -> number` entries
    ///
    /// `left.kP` / `right.kP` target one side, a bare `kP` sets both.
    pub fn overlay(&mut self, entries: &BTreeMap<String, f64>) -> Result<()> {
        let mut next = *self;
        for (key, &value) in entries {
            let known = match key.split_once('.') {
                Some(("left", field)) => next.left.set(field, value),
                Some(("right", field)) => next.right.set(field, value),
                Some(_) => false,
                None => next.left.set(key, value) & next.right.set(key, value),
            };
            if !known {
                return Err(DrivetrainError::Configuration(format!(
                    "unknown gain key '{}'",
                    key
                )));
            }
        }
        next.validate()?;
        *self = next;
        info!("Gain overrides loaded ({} entries)", entries.len());
        Ok(())
    }
}
