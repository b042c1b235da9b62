// Bus layout, tuning and policy configuration
//
// Every field has a default, so a config file only needs the values that
// differ from the reference deployment.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::{DeviceId, RetryPolicy, DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_MS};
use crate::drivetrain::{DriveProfile, GainProfiles, VelocityPolicy};
use crate::error::{DrivetrainError, Result};

// Rate at which the binary re-issues held commands
pub const LOOP_HZ: u64 = 50;

// Serial bridge to the motor-controller bus
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";

// Reference deployment: three motors per side, leader first
pub const LEFT_DRIVE_IDS: [DeviceId; 3] = [1, 2, 3];
pub const RIGHT_DRIVE_IDS: [DeviceId; 3] = [4, 5, 6];
pub const SHIFTER_ID: DeviceId = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub port: String,
    pub baudrate: u32,
    /// Per-transaction response window
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivetrainConfig {
    pub bus: BusConfig,
    pub left_ids: Vec<DeviceId>,
    pub right_ids: Vec<DeviceId>,
    pub shifter_id: DeviceId,
    pub gains: GainProfiles,
    pub shift_policy: VelocityPolicy,
    pub drive_profile: DriveProfile,
    pub loop_hz: u64,
}

impl Default for DrivetrainConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            left_ids: LEFT_DRIVE_IDS.to_vec(),
            right_ids: RIGHT_DRIVE_IDS.to_vec(),
            shifter_id: SHIFTER_ID,
            gains: GainProfiles::default(),
            shift_policy: VelocityPolicy::default(),
            drive_profile: DriveProfile::default(),
            loop_hz: LOOP_HZ,
        }
    }
}

impl DrivetrainConfig {
    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = read(path)?;
        let config: DrivetrainConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay gains from a flat JSON object of `key -> number`
    pub fn load_gain_overrides<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let contents = read(path.as_ref())?;
        let entries: BTreeMap<String, f64> = serde_json::from_str(&contents)?;
        self.gains.overlay(&entries)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_hz == 0 {
            return Err(DrivetrainError::Configuration(
                "loop_hz must be positive".to_string(),
            ));
        }
        self.gains.validate()?;
        self.drive_profile.validate()?;
        self.shift_policy.validate()
    }

    /// Every device address on the bus, in construction order
    pub fn all_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.left_ids
            .iter()
            .chain(&self.right_ids)
            .copied()
            .chain(std::iter::once(self.shifter_id))
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz.max(1))
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| DrivetrainError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })
}
