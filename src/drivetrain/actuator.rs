// One physical motor controller and the mode vocabulary it speaks

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{DeviceId, Register, SharedBus};
use crate::error::Result;

/// Mode codes understood by the motor-controller firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    RawPower = 0,
    ClosedLoopPosition = 1,
    ClosedLoopVelocity = 2,
    Follower = 5,
    Disabled = 15,
}

impl TryFrom<u8> for FirmwareMode {
    type Error = u8;

    fn try_from(raw: u8) -> std::result::Result<Self, u8> {
        match raw {
            0 => Ok(FirmwareMode::RawPower),
            1 => Ok(FirmwareMode::ClosedLoopPosition),
            2 => Ok(FirmwareMode::ClosedLoopVelocity),
            5 => Ok(FirmwareMode::Follower),
            15 => Ok(FirmwareMode::Disabled),
            other => Err(other),
        }
    }
}

/// Mode of the leader pair; decides how a commanded value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Disabled,
    /// Fraction of supply voltage, -1.0..=1.0
    RawPower,
    /// Encoder velocity
    ClosedLoopVelocity,
    /// Encoder position
    ClosedLoopPosition,
}

impl ControlMode {
    pub fn is_closed_loop(self) -> bool {
        matches!(
            self,
            ControlMode::ClosedLoopVelocity | ControlMode::ClosedLoopPosition
        )
    }

    pub fn firmware(self) -> FirmwareMode {
        match self {
            ControlMode::Disabled => FirmwareMode::Disabled,
            ControlMode::RawPower => FirmwareMode::RawPower,
            ControlMode::ClosedLoopVelocity => FirmwareMode::ClosedLoopVelocity,
            ControlMode::ClosedLoopPosition => FirmwareMode::ClosedLoopPosition,
        }
    }

    /// Leader mode for a firmware code; `None` for follower or unknown codes
    pub fn from_firmware(mode: FirmwareMode) -> Option<Self> {
        match mode {
            FirmwareMode::Disabled => Some(ControlMode::Disabled),
            FirmwareMode::RawPower => Some(ControlMode::RawPower),
            FirmwareMode::ClosedLoopVelocity => Some(ControlMode::ClosedLoopVelocity),
            FirmwareMode::ClosedLoopPosition => Some(ControlMode::ClosedLoopPosition),
            FirmwareMode::Follower => None,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlMode::Disabled => "disabled",
            ControlMode::RawPower => "raw-power",
            ControlMode::ClosedLoopVelocity => "closed-loop-velocity",
            ControlMode::ClosedLoopPosition => "closed-loop-position",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// Position of an actuator within its bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    /// Mirrors the leader at `leader` (non-owning, by id)
    Follower { leader: DeviceId },
}

/// Snapshot of an actuator's sensor state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub velocity: f64,
    pub position: f64,
}

/// One motor controller on the bus
#[derive(Debug)]
pub struct Actuator {
    id: DeviceId,
    role: Role,
    mode: Option<FirmwareMode>,
    commanded: f64,
}

impl Actuator {
    pub(crate) fn new(id: DeviceId, role: Role) -> Self {
        Self {
            id,
            role,
            mode: None,
            commanded: 0.0,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Last mode written to (or read from) the firmware; `None` until known
    pub fn mode(&self) -> Option<FirmwareMode> {
        self.mode
    }

    /// Last value written to the setpoint register
    pub fn commanded(&self) -> f64 {
        self.commanded
    }

    pub(crate) fn write_mode(&mut self, bus: &SharedBus, mode: FirmwareMode) -> Result<()> {
        debug!("Actuator {} -> {:?}", self.id, mode);
        bus.write_u8(self.id, Register::ControlMode, mode as u8)?;
        self.mode = Some(mode);
        Ok(())
    }

    /// Read the firmware's current mode; unrecognised codes read as unknown
    pub(crate) fn read_mode(&mut self, bus: &SharedBus) -> Result<Option<FirmwareMode>> {
        let raw = bus.read_u8(self.id, Register::ControlMode)?;
        self.mode = FirmwareMode::try_from(raw).ok();
        Ok(self.mode)
    }

    pub(crate) fn write_setpoint(&mut self, bus: &SharedBus, value: f64) -> Result<()> {
        bus.write_f32(self.id, Register::Setpoint, value as f32)?;
        self.commanded = value;
        Ok(())
    }

    pub(crate) fn follow(&mut self, bus: &SharedBus, leader: DeviceId) -> Result<()> {
        self.write_mode(bus, FirmwareMode::Follower)?;
        bus.write_u8(self.id, Register::FollowTarget, leader)?;
        self.role = Role::Follower { leader };
        Ok(())
    }

    pub(crate) fn feedback(&self, bus: &SharedBus) -> Result<Feedback> {
        let velocity = bus.read_f32(self.id, Register::Velocity)?;
        let position = bus.read_f32(self.id, Register::Position)?;
        Ok(Feedback {
            velocity: velocity as f64,
            position: position as f64,
        })
    }

    pub(crate) fn zero_position(&self, bus: &SharedBus) -> Result<()> {
        bus.write_f32(self.id, Register::Position, 0.0)
    }
}
