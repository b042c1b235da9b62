// Control-mode state machine for the leader pair
//
// Any mode may follow any other. Every transition rewrites the mode on both
// leaders and, when entering a closed loop, re-applies their gain profiles.
// The two leaders are never left in different modes: a failed transition is
// rolled back, and if the rollback fails too the mode becomes unknown.

use tracing::{info, warn};

use super::actuator::ControlMode;
use super::gains::GainProfiles;
use super::motor_bank::MotorBank;
use crate::error::Result;

/// Outcome of `ensure_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Unchanged,
    Switched {
        from: Option<ControlMode>,
        to: ControlMode,
    },
}

#[derive(Debug, Default)]
pub struct ControlModeManager {
    /// `None` when the firmware state is unknown and needs a re-sync
    current: Option<ControlMode>,
}

impl ControlModeManager {
    /// Start with the mode unknown; the first `ensure_mode` always writes
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_mode(&self) -> Option<ControlMode> {
        self.current
    }

    /// Adopt the leaders' live mode, or unknown if they disagree
    pub fn sync(&mut self, left: &mut MotorBank, right: &mut MotorBank) -> Result<Option<ControlMode>> {
        let l = left.read_leader_mode()?;
        let r = right.read_leader_mode()?;
        self.current = match (l, r) {
            (Some(l), Some(r)) if l == r => Some(l),
            _ => {
                warn!("Leader modes disagree or unrecognised (left {:?}, right {:?})", l, r);
                None
            }
        };
        Ok(self.current)
    }

    /// Put both leaders in `target`, doing nothing if already there
    pub fn ensure_mode(
        &mut self,
        target: ControlMode,
        left: &mut MotorBank,
        right: &mut MotorBank,
        gains: &GainProfiles,
    ) -> Result<ModeChange> {
        if self.current == Some(target) {
            return Ok(ModeChange::Unchanged);
        }

        let from = self.current;
        match Self::reconfigure(target, left, right, gains) {
            Ok(()) => {
                self.current = Some(target);
                info!("Control mode {} -> {}", DisplayMode(from), target);
                Ok(ModeChange::Switched { from, to: target })
            }
            Err(e) => {
                warn!("Transition to {} failed: {}", target, e);
                self.current = Self::roll_back(from, left, right, gains);
                Err(e)
            }
        }
    }

    /// Force the mode unknown so the next `ensure_mode` rewrites it
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    fn reconfigure(
        target: ControlMode,
        left: &mut MotorBank,
        right: &mut MotorBank,
        gains: &GainProfiles,
    ) -> Result<()> {
        left.set_leader_mode(target)?;
        right.set_leader_mode(target)?;
        if target.is_closed_loop() {
            gains.left.apply(left.bus(), left.leader())?;
            gains.right.apply(right.bus(), right.leader())?;
        }
        Ok(())
    }

    fn roll_back(
        previous: Option<ControlMode>,
        left: &mut MotorBank,
        right: &mut MotorBank,
        gains: &GainProfiles,
    ) -> Option<ControlMode> {
        let previous = previous?;
        match Self::reconfigure(previous, left, right, gains) {
            Ok(()) => {
                info!("Rolled back to {}", previous);
                Some(previous)
            }
            Err(e) => {
                warn!("Rollback to {} failed, mode unknown until re-sync: {}", previous, e);
                None
            }
        }
    }
}

struct DisplayMode(Option<ControlMode>);

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(mode) => write!(f, "{}", mode),
            None => f.write_str("unknown"),
        }
    }
}
