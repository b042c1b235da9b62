// One side of the drivetrain: a leader and the followers that mirror it

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::actuator::{Actuator, ControlMode, Feedback, FirmwareMode, Role, Side};
use crate::bus::{DeviceId, SharedBus};
use crate::error::{DrivetrainError, Result};

/// Fixed group of actuators for one side; element 0 leads
pub struct MotorBank {
    side: Side,
    actuators: Vec<Actuator>,
    bus: SharedBus,
}

impl MotorBank {
    /// Create one actuator per id, checking every address answers
    pub fn new(side: Side, ids: &[DeviceId], bus: SharedBus) -> Result<Self> {
        if ids.is_empty() {
            return Err(DrivetrainError::HardwareInit(format!(
                "{} bank has no actuators",
                side
            )));
        }

        let mut seen = HashSet::new();
        for &id in ids {
            if !seen.insert(id) {
                return Err(DrivetrainError::HardwareInit(format!(
                    "{} bank lists device {} twice",
                    side, id
                )));
            }
        }

        for &id in ids {
            match bus.ping(id)? {
                true => debug!("{} actuator {} responding", side, id),
                false => {
                    warn!("{} actuator {} not responding to ping", side, id);
                    return Err(DrivetrainError::HardwareInit(format!(
                        "{} actuator {} unreachable",
                        side, id
                    )));
                }
            }
        }

        let leader = ids[0];
        let actuators = ids
            .iter()
            .map(|&id| {
                let role = if id == leader {
                    Role::Leader
                } else {
                    Role::Follower { leader }
                };
                Actuator::new(id, role)
            })
            .collect();

        info!("{} bank ready: leader {}, actuators {:?}", side, leader, ids);
        Ok(Self {
            side,
            actuators,
            bus,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn leader(&self) -> &Actuator {
        &self.actuators[0]
    }

    pub fn followers(&self) -> &[Actuator] {
        &self.actuators[1..]
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    /// Bind every non-leader to mirror the leader one-to-one
    pub fn configure_followers(&mut self) -> Result<()> {
        let (leader, followers) = self.actuators.split_at_mut(1);
        let leader_id = leader[0].id();
        for follower in followers {
            follower.follow(&self.bus, leader_id)?;
        }
        debug!(
            "{} followers {:?} bound to {}",
            self.side,
            self.followers().iter().map(Actuator::id).collect::<Vec<_>>(),
            leader_id
        );
        Ok(())
    }

    /// Write `value` to the leader without checking its mode
    pub fn set_leader_output(&mut self, value: f64) -> Result<()> {
        let bus = &self.bus;
        self.actuators[0].write_setpoint(bus, value)
    }

    pub(crate) fn set_leader_mode(&mut self, mode: ControlMode) -> Result<()> {
        let bus = &self.bus;
        self.actuators[0].write_mode(bus, mode.firmware())
    }

    /// Read the leader's firmware mode; `None` if it isn't a leader mode
    pub(crate) fn read_leader_mode(&mut self) -> Result<Option<ControlMode>> {
        let bus = &self.bus;
        Ok(self.actuators[0]
            .read_mode(bus)?
            .and_then(ControlMode::from_firmware))
    }

    /// Last mode written to the leader, if known
    pub fn leader_mode(&self) -> Option<ControlMode> {
        self.leader()
            .mode()
            .and_then(ControlMode::from_firmware)
    }

    pub fn leader_feedback(&self) -> Result<Feedback> {
        self.leader().feedback(&self.bus)
    }

    pub fn reset_position(&self) -> Result<()> {
        self.leader().zero_position(&self.bus)
    }

    pub(crate) fn bus(&self) -> &SharedBus {
        &self.bus
    }

    /// True when every follower is bound to this bank's leader
    pub fn followers_bound(&self) -> bool {
        let leader = self.leader().id();
        self.followers().iter().all(|a| {
            a.role() == Role::Follower { leader } && a.mode() == Some(FirmwareMode::Follower)
        })
    }
}
