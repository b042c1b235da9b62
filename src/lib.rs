// Drivetrain actuation core: leader/follower motor banks, control-mode
// switching, closed-loop gain profiles and safety-gated gear shifting over a
// shared motor-controller bus.

pub mod bus;
pub mod config;
pub mod drivetrain;
pub mod error;
pub mod messages;
pub mod runtime;

pub use drivetrain::DrivetrainController;
pub use error::{DrivetrainError, Result};
