// Command and status types exchanged with callers of the drivetrain

use serde::{Deserialize, Serialize};

use crate::drivetrain::{ControlMode, Feedback, ShiftState};

// Drive request from a sequencer, operator binding or the CLI
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
    pub mode: ControlMode,
}

impl DriveCommand {
    pub fn new(left: f64, right: f64, mode: ControlMode) -> Self {
        Self { left, right, mode }
    }

    /// Zero output in raw-power mode
    pub fn stop() -> Self {
        Self::new(0.0, 0.0, ControlMode::RawPower)
    }
}

/// Point-in-time view of the drivetrain
///
/// `mode` and `gear` are `None` when unknown and awaiting a re-sync.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrivetrainStatus {
    pub mode: Option<ControlMode>,
    pub gear: Option<ShiftState>,
    pub left: Feedback,
    pub right: Feedback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd: DriveCommand =
            serde_json::from_str(r#"{"left": 0.5, "right": -0.5, "mode": "closed_loop_velocity"}"#)
                .unwrap();
        assert_eq!(
            cmd,
            DriveCommand::new(0.5, -0.5, ControlMode::ClosedLoopVelocity)
        );
    }

    #[test]
    fn test_status_unknown_fields_serialize_as_null() {
        let status = DrivetrainStatus {
            mode: None,
            gear: Some(ShiftState::High),
            left: Feedback::default(),
            right: Feedback::default(),
        };
        let json = serde_json::to_value(status).unwrap();
        assert!(json["mode"].is_null());
        assert_eq!(json["gear"], "high");
    }
}
