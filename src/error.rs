// Error taxonomy for the drivetrain core
//
// Bus-level failures live in `bus::BusError`; everything a caller of the
// drivetrain sees is a `DrivetrainError`.

use std::path::PathBuf;

use crate::bus::{BusError, DeviceId};

#[derive(Debug, thiserror::Error)]
pub enum DrivetrainError {
    /// An actuator is unreachable or the id layout is unusable. Fatal at construction.
    #[error("Hardware init failed: {0}")]
    HardwareInit(String),

    /// Gains or config values rejected, or applied to an actuator that can't run closed-loop.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Bus timeout talking to device {id} after {attempts} attempts")]
    BusTimeout { id: DeviceId, attempts: u32 },

    #[error("Shift to low gear refused (left velocity {left}, right velocity {right})")]
    UnsafeShiftRequested { left: f64, right: f64 },

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DrivetrainError>;
