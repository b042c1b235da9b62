// Drivetrain control core
//
// Provides:
// - Leader/follower motor banks per side
// - Control-mode switching with gain re-application for closed loops
// - Safety-gated two-speed gear shifting
// - The controller that composes them

mod actuator;
mod control_mode;
mod controller;
mod gains;
mod motor_bank;
mod profile;
mod shift_gate;

pub use actuator::{Actuator, ControlMode, Feedback, FirmwareMode, Role, Side};
pub use control_mode::{ControlModeManager, ModeChange};
pub use controller::DrivetrainController;
pub use gains::{GainProfile, GainProfiles};
pub use motor_bank::MotorBank;
pub use profile::{DriveProfile, ProfileCurve};
pub use shift_gate::{
    ShiftGate, ShiftOutcome, ShiftPolicy, ShiftState, SideVelocities, VelocityPolicy,
    VelocitySource,
};
