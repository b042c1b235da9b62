// Two-position gear valve with a safety-gated downshift
//
// The valve module reports Off until first driven after power-on, so the
// gear starts unknown rather than assumed. Requests for the gear already
// engaged never touch the bus.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{DeviceId, Register, SharedBus};
use crate::error::{DrivetrainError, Result};

/// Valve module output codes
const VALVE_OFF: u8 = 0;
const VALVE_FORWARD: u8 = 1;
const VALVE_REVERSE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftState {
    Low,
    High,
}

impl ShiftState {
    fn valve_code(self) -> u8 {
        match self {
            ShiftState::High => VALVE_FORWARD,
            ShiftState::Low => VALVE_REVERSE,
        }
    }

    fn from_valve_code(code: u8) -> Option<Self> {
        match code {
            VALVE_FORWARD => Some(ShiftState::High),
            VALVE_REVERSE => Some(ShiftState::Low),
            VALVE_OFF => None,
            other => {
                warn!("Valve reported unknown output code {}", other);
                None
            }
        }
    }
}

/// Leader velocities, as seen by the shift policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideVelocities {
    pub left: f64,
    pub right: f64,
}

/// Live velocity feedback handed to the gate at construction
pub trait VelocitySource: Send {
    fn velocities(&self) -> Result<SideVelocities>;
}

impl<F> VelocitySource for F
where
    F: Fn() -> Result<SideVelocities> + Send,
{
    fn velocities(&self) -> Result<SideVelocities> {
        self()
    }
}

/// Decides whether a downshift may proceed at the given speeds
pub trait ShiftPolicy: Send {
    fn safe_to_shift(&self, velocities: SideVelocities) -> bool;
}

/// Built-in, configurable shift policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VelocityPolicy {
    /// Safe while either side reports positive velocity
    // TODO: replace with a measured speed threshold once the gearbox limits are characterised
    #[default]
    ForwardMotion,
    /// Safe while both sides are at or below `max_abs_velocity` in magnitude
    BelowSpeed { max_abs_velocity: f64 },
}

impl VelocityPolicy {
    /// A negative or NaN limit would refuse every downshift
    pub fn validate(&self) -> Result<()> {
        match *self {
            VelocityPolicy::ForwardMotion => Ok(()),
            VelocityPolicy::BelowSpeed { max_abs_velocity }
                if max_abs_velocity.is_finite() && max_abs_velocity >= 0.0 =>
            {
                Ok(())
            }
            VelocityPolicy::BelowSpeed { max_abs_velocity } => {
                Err(DrivetrainError::Configuration(format!(
                    "max_abs_velocity must be finite and non-negative, got {}",
                    max_abs_velocity
                )))
            }
        }
    }
}

impl ShiftPolicy for VelocityPolicy {
    fn safe_to_shift(&self, v: SideVelocities) -> bool {
        match *self {
            VelocityPolicy::ForwardMotion => v.left.max(v.right) > 0.0,
            VelocityPolicy::BelowSpeed { max_abs_velocity } => {
                v.left.abs().max(v.right.abs()) <= max_abs_velocity
            }
        }
    }
}

/// Result of a shift request that was not refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOutcome {
    Shifted,
    AlreadyEngaged,
}

pub struct ShiftGate {
    valve: DeviceId,
    bus: SharedBus,
    state: Option<ShiftState>,
    feedback: Box<dyn VelocitySource>,
    policy: Box<dyn ShiftPolicy>,
}

impl ShiftGate {
    /// Attach to the valve at `valve` and read its current output
    pub fn new(
        valve: DeviceId,
        bus: SharedBus,
        feedback: Box<dyn VelocitySource>,
        policy: Box<dyn ShiftPolicy>,
    ) -> Result<Self> {
        if !bus.ping(valve)? {
            return Err(DrivetrainError::HardwareInit(format!(
                "shifter valve {} unreachable",
                valve
            )));
        }

        let mut gate = Self {
            valve,
            bus,
            state: None,
            feedback,
            policy,
        };
        let state = gate.query()?;
        info!("Shifter valve {} ready, gear {:?}", valve, state);
        Ok(gate)
    }

    /// Last known gear; `None` until the valve has been driven or read back
    pub fn state(&self) -> Option<ShiftState> {
        self.state
    }

    /// Re-read the valve output
    pub fn query(&mut self) -> Result<Option<ShiftState>> {
        let code = self.bus.read_u8(self.valve, Register::ValveState)?;
        self.state = ShiftState::from_valve_code(code);
        Ok(self.state)
    }

    pub fn set_policy(&mut self, policy: Box<dyn ShiftPolicy>) {
        self.policy = policy;
    }

    pub fn safe_to_shift(&self) -> Result<bool> {
        let velocities = self.feedback.velocities()?;
        Ok(self.policy.safe_to_shift(velocities))
    }

    pub fn shift_up(&mut self) -> Result<ShiftOutcome> {
        self.engage(ShiftState::High)
    }

    /// Engage low gear if the policy allows it at the current speed
    pub fn shift_down(&mut self) -> Result<ShiftOutcome> {
        if self.state == Some(ShiftState::Low) {
            return Ok(ShiftOutcome::AlreadyEngaged);
        }

        let velocities = self.feedback.velocities()?;
        if !self.policy.safe_to_shift(velocities) {
            warn!(
                "Downshift refused at left={} right={}",
                velocities.left, velocities.right
            );
            return Err(DrivetrainError::UnsafeShiftRequested {
                left: velocities.left,
                right: velocities.right,
            });
        }

        self.engage(ShiftState::Low)
    }

    fn engage(&mut self, target: ShiftState) -> Result<ShiftOutcome> {
        if self.state == Some(target) {
            debug!("Gear already {:?}", target);
            return Ok(ShiftOutcome::AlreadyEngaged);
        }

        match self
            .bus
            .write_u8(self.valve, Register::ValveState, target.valve_code())
        {
            Ok(()) => {
                info!("Gear {:?} -> {:?}", self.state, target);
                self.state = Some(target);
                Ok(ShiftOutcome::Shifted)
            }
            Err(e) => {
                // The valve may or may not have moved
                self.state = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::SimBus;
    use crate::bus::RetryPolicy;
    use std::sync::{Arc, Mutex};

    const VALVE: DeviceId = 10;

    fn gate_with(velocities: Arc<Mutex<SideVelocities>>, policy: VelocityPolicy) -> (SimBus, ShiftGate) {
        let sim = SimBus::for_drivetrain(&[], &[], VALVE);
        let bus = SharedBus::new(Box::new(sim.clone()), RetryPolicy::default());
        let feedback = move || -> Result<SideVelocities> { Ok(*velocities.lock().unwrap()) };
        let gate = ShiftGate::new(VALVE, bus, Box::new(feedback), Box::new(policy)).unwrap();
        (sim, gate)
    }

    fn standing() -> Box<dyn VelocitySource> {
        Box::new(|| -> Result<SideVelocities> { Ok(SideVelocities::default()) })
    }

    fn moving(left: f64, right: f64) -> Arc<Mutex<SideVelocities>> {
        Arc::new(Mutex::new(SideVelocities { left, right }))
    }

    #[test]
    fn test_initial_state_is_queried() {
        let (_sim, gate) = gate_with(moving(0.0, 0.0), VelocityPolicy::ForwardMotion);
        assert_eq!(gate.state(), None);

        let sim = SimBus::for_drivetrain(&[], &[], VALVE);
        sim.set_register(VALVE, Register::ValveState, VALVE_REVERSE as f32);
        let bus = SharedBus::new(Box::new(sim.clone()), RetryPolicy::default());
        let gate = ShiftGate::new(
            VALVE,
            bus,
            standing(),
            Box::new(VelocityPolicy::ForwardMotion),
        )
        .unwrap();
        assert_eq!(gate.state(), Some(ShiftState::Low));
    }

    #[test]
    fn test_shift_up_twice_writes_once() {
        let (sim, mut gate) = gate_with(moving(0.0, 0.0), VelocityPolicy::ForwardMotion);

        assert_eq!(gate.shift_up().unwrap(), ShiftOutcome::Shifted);
        assert_eq!(gate.shift_up().unwrap(), ShiftOutcome::AlreadyEngaged);

        assert_eq!(gate.state(), Some(ShiftState::High));
        assert_eq!(sim.writes_to(VALVE).len(), 1);
    }

    #[test]
    fn test_shift_down_refused_when_not_moving_forward() {
        for (left, right) in [(0.0, 0.0), (-5.0, 0.0), (-1.0, -300.0)] {
            let (sim, mut gate) = gate_with(moving(left, right), VelocityPolicy::ForwardMotion);
            gate.shift_up().unwrap();

            let err = gate.shift_down().unwrap_err();
            assert!(matches!(err, DrivetrainError::UnsafeShiftRequested { .. }));
            assert_eq!(gate.state(), Some(ShiftState::High));
            assert_eq!(sim.writes_to(VALVE).len(), 1);
        }
    }

    #[test]
    fn test_shift_down_when_safe() {
        let (sim, mut gate) = gate_with(moving(-2.0, 40.0), VelocityPolicy::ForwardMotion);
        gate.shift_up().unwrap();

        assert_eq!(gate.shift_down().unwrap(), ShiftOutcome::Shifted);
        assert_eq!(gate.state(), Some(ShiftState::Low));
        assert_eq!(
            sim.register(VALVE, Register::ValveState),
            Some(VALVE_REVERSE as f32)
        );
    }

    #[test]
    fn test_shift_down_in_low_skips_policy() {
        let velocities = moving(10.0, 10.0);
        let (sim, mut gate) = gate_with(velocities.clone(), VelocityPolicy::ForwardMotion);
        gate.shift_down().unwrap();

        *velocities.lock().unwrap() = SideVelocities::default();
        assert_eq!(gate.shift_down().unwrap(), ShiftOutcome::AlreadyEngaged);
        assert_eq!(sim.writes_to(VALVE).len(), 1);
    }

    #[test]
    fn test_policy_can_be_replaced() {
        let (_sim, mut gate) = gate_with(moving(500.0, 480.0), VelocityPolicy::ForwardMotion);
        assert!(gate.safe_to_shift().unwrap());

        gate.set_policy(Box::new(VelocityPolicy::BelowSpeed {
            max_abs_velocity: 100.0,
        }));
        assert!(!gate.safe_to_shift().unwrap());
        assert!(gate.shift_down().is_err());
    }

    #[test]
    fn test_failed_write_marks_gear_unknown() {
        let (sim, mut gate) = gate_with(moving(0.0, 0.0), VelocityPolicy::ForwardMotion);
        gate.shift_up().unwrap();

        sim.inject_timeouts(VALVE, RetryPolicy::default().max_attempts);
        gate.state = Some(ShiftState::Low);
        assert!(gate.shift_up().is_err());
        assert_eq!(gate.state(), None);

        // Unknown gear always writes on the next request
        assert_eq!(gate.shift_up().unwrap(), ShiftOutcome::Shifted);
        assert_eq!(sim.writes_to(VALVE).len(), 2);
    }

    #[test]
    fn test_missing_valve_fails_init() {
        let sim = SimBus::new();
        let bus = SharedBus::new(Box::new(sim), RetryPolicy::default());
        let result = ShiftGate::new(
            VALVE,
            bus,
            standing(),
            Box::new(VelocityPolicy::default()),
        );
        assert!(matches!(result, Err(DrivetrainError::HardwareInit(_))));
    }

    #[test]
    fn test_policy_config_from_json() {
        let policy: VelocityPolicy =
            serde_json::from_str(r#"{"kind": "below_speed", "max_abs_velocity": 50.0}"#).unwrap();
        assert_eq!(
            policy,
            VelocityPolicy::BelowSpeed {
                max_abs_velocity: 50.0
            }
        );
    }
}
