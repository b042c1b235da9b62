// Drivetrain composition root
//
// Owns both motor banks, the control-mode state machine, the gain profiles
// and the shift gate, and exposes the operations external sequencers call.

use std::collections::HashSet;

use tracing::{info, warn};

use super::actuator::{ControlMode, Side};
use super::control_mode::ControlModeManager;
use super::gains::GainProfiles;
use super::motor_bank::MotorBank;
use super::profile::DriveProfile;
use super::shift_gate::{ShiftGate, ShiftOutcome, ShiftPolicy, ShiftState, SideVelocities};
use crate::bus::{fits_register, MotorBus, Register, SharedBus};
use crate::config::DrivetrainConfig;
use crate::error::{DrivetrainError, Result};
use crate::messages::{DriveCommand, DrivetrainStatus};

pub struct DrivetrainController {
    left: MotorBank,
    right: MotorBank,
    modes: ControlModeManager,
    gains: GainProfiles,
    shifter: ShiftGate,
    profile: DriveProfile,
}

impl DrivetrainController {
    /// Bring up the drivetrain on `bus` using the configured shift policy
    pub fn new(config: &DrivetrainConfig, bus: Box<dyn MotorBus>) -> Result<Self> {
        Self::with_shift_policy(config, bus, Box::new(config.shift_policy))
    }

    /// Bring up the drivetrain with a caller-supplied shift policy
    ///
    /// Order: banks, followers, gains, mode sync, gear query, then a
    /// zero raw-power command so the leaders start in a known mode.
    pub fn with_shift_policy(
        config: &DrivetrainConfig,
        bus: Box<dyn MotorBus>,
        policy: Box<dyn ShiftPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        check_unique_ids(config)?;

        let bus = SharedBus::new(bus, config.bus.retry);
        let mut left = MotorBank::new(Side::Left, &config.left_ids, bus.clone())?;
        let mut right = MotorBank::new(Side::Right, &config.right_ids, bus.clone())?;

        left.configure_followers()?;
        right.configure_followers()?;

        config.gains.left.apply(&bus, left.leader())?;
        config.gains.right.apply(&bus, right.leader())?;

        let mut modes = ControlModeManager::new();
        modes.sync(&mut left, &mut right)?;

        let (left_leader, right_leader) = (left.leader().id(), right.leader().id());
        let feedback_bus = bus.clone();
        let feedback = move || -> Result<SideVelocities> {
            Ok(SideVelocities {
                left: feedback_bus.read_f32(left_leader, Register::Velocity)? as f64,
                right: feedback_bus.read_f32(right_leader, Register::Velocity)? as f64,
            })
        };
        let shifter = ShiftGate::new(config.shifter_id, bus, Box::new(feedback), policy)?;

        // Zero raw power before Self exists: a failed start skips Drop's disable
        modes.ensure_mode(ControlMode::RawPower, &mut left, &mut right, &config.gains)?;
        left.set_leader_output(0.0)?;
        right.set_leader_output(0.0)?;

        info!("Drivetrain ready");
        Ok(Self {
            left,
            right,
            modes,
            gains: config.gains,
            shifter,
            profile: config.drive_profile,
        })
    }

    /// Put both leaders in `mode`, then command them
    pub fn drive(&mut self, left: f64, right: f64, mode: ControlMode) -> Result<()> {
        check_finite(left, right)?;
        self.modes
            .ensure_mode(mode, &mut self.left, &mut self.right, &self.gains)?;
        self.set(left, right)
    }

    pub fn drive_command(&mut self, cmd: &DriveCommand) -> Result<()> {
        self.drive(cmd.left, cmd.right, cmd.mode)
    }

    /// Write values to both leaders without checking the mode
    ///
    /// Only for callers that already know the leaders are in the mode the
    /// values are meant for; otherwise the firmware reinterprets them.
    pub fn set(&mut self, left: f64, right: f64) -> Result<()> {
        check_finite(left, right)?;
        self.left.set_leader_output(left)?;
        self.right.set_leader_output(right)
    }

    pub fn disable(&mut self) -> Result<()> {
        self.modes
            .ensure_mode(ControlMode::Disabled, &mut self.left, &mut self.right, &self.gains)?;
        Ok(())
    }

    /// Raw operator axes through the drive profile, driven as raw power
    pub fn tank_drive(&mut self, left_axis: f64, right_axis: f64) -> Result<()> {
        let left = self.profile.apply(left_axis);
        let right = self.profile.apply(right_axis);
        self.drive(left, right, ControlMode::RawPower)
    }

    /// Zero the position reference on both leaders
    pub fn reset_position(&mut self) -> Result<()> {
        self.left.reset_position()?;
        self.right.reset_position()?;
        info!("Drive positions reset");
        Ok(())
    }

    pub fn shift_up(&mut self) -> Result<ShiftOutcome> {
        self.shifter.shift_up()
    }

    pub fn shift_down(&mut self) -> Result<ShiftOutcome> {
        self.shifter.shift_down()
    }

    pub fn safe_to_shift(&self) -> Result<bool> {
        self.shifter.safe_to_shift()
    }

    pub fn set_shift_policy(&mut self, policy: Box<dyn ShiftPolicy>) {
        self.shifter.set_policy(policy);
    }

    pub fn current_mode(&self) -> Option<ControlMode> {
        self.modes.current_mode()
    }

    pub fn shift_state(&self) -> Option<ShiftState> {
        self.shifter.state()
    }

    pub fn gains(&self) -> &GainProfiles {
        &self.gains
    }

    /// Replace the gain profiles and write them to both leaders now
    pub fn reconfigure_gains(&mut self, gains: GainProfiles) -> Result<()> {
        gains.validate()?;
        let applied = gains
            .left
            .apply(self.left.bus(), self.left.leader())
            .and_then(|()| gains.right.apply(self.right.bus(), self.right.leader()));

        if let Err(e) = applied {
            warn!("Gain reconfiguration failed, restoring previous gains: {}", e);
            let restored = self
                .gains
                .left
                .apply(self.left.bus(), self.left.leader())
                .and_then(|()| self.gains.right.apply(self.right.bus(), self.right.leader()));
            if restored.is_err() && self.modes.current_mode().is_some_and(ControlMode::is_closed_loop) {
                // Leaders may be running mismatched gains; force a full re-entry
                self.modes.invalidate();
            }
            return Err(e);
        }

        self.gains = gains;
        info!("Gains reconfigured");
        Ok(())
    }

    pub fn drive_profile(&self) -> DriveProfile {
        self.profile
    }

    pub fn set_drive_profile(&mut self, profile: DriveProfile) -> Result<()> {
        profile.validate()?;
        self.profile = profile;
        Ok(())
    }

    /// Re-read mode and gear from the hardware
    pub fn resync(&mut self) -> Result<()> {
        let mode = self.modes.sync(&mut self.left, &mut self.right)?;
        let gear = self.shifter.query()?;
        info!("Resynced: mode {:?}, gear {:?}", mode, gear);
        Ok(())
    }

    pub fn status(&self) -> Result<DrivetrainStatus> {
        Ok(DrivetrainStatus {
            mode: self.current_mode(),
            gear: self.shift_state(),
            left: self.left.leader_feedback()?,
            right: self.right.leader_feedback()?,
        })
    }

    pub fn bank(&self, side: Side) -> &MotorBank {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

impl Drop for DrivetrainController {
    fn drop(&mut self) {
        // Leave the motors unpowered when the controller goes away
        if let Err(e) = self.disable() {
            warn!("Failed to disable drivetrain on drop: {}", e);
        }
    }
}

fn check_unique_ids(config: &DrivetrainConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for id in config.all_ids() {
        if !seen.insert(id) {
            return Err(DrivetrainError::HardwareInit(format!(
                "device id {} assigned more than once",
                id
            )));
        }
    }
    Ok(())
}

/// Setpoints travel as f32; anything that overflows it is as bad as NaN
fn check_finite(left: f64, right: f64) -> Result<()> {
    if fits_register(left) && fits_register(right) {
        Ok(())
    } else {
        Err(DrivetrainError::InvalidCommand(format!(
            "drive values must be finite f32 (left {}, right {})",
            left, right
        )))
    }
}
