// Simulated motor bus
//
// Stands in for the serial bridge when no hardware is attached (`--sim`)
// and in tests. Models just enough firmware behaviour to exercise the
// drivetrain: register storage, follower mirroring, read-only registers,
// missing devices and injected timeouts. Every accepted write is logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BusError, DeviceId, MotorBus, Register};
use crate::drivetrain::FirmwareMode;

/// Status byte returned for writes to read-only or foreign registers
const STATUS_ACCESS: u8 = 0x08;

/// Follower chains longer than this read as zero output
const MAX_FOLLOW_DEPTH: usize = 4;

/// What sits at a simulated bus address
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimDeviceKind {
    Motor { has_sensor: bool },
    Valve,
}

impl SimDeviceKind {
    /// Motor controller with an attached encoder
    pub fn motor() -> Self {
        SimDeviceKind::Motor { has_sensor: true }
    }

    /// Motor controller with nothing on its feedback port
    pub fn sensorless_motor() -> Self {
        SimDeviceKind::Motor { has_sensor: false }
    }

    pub fn valve() -> Self {
        SimDeviceKind::Valve
    }
}

/// A write the simulated firmware accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimWrite {
    pub id: DeviceId,
    pub register: Register,
    pub value: f32,
}

#[derive(Debug)]
struct SimDevice {
    kind: SimDeviceKind,
    registers: HashMap<Register, f32>,
    pending_timeouts: u32,
}

impl SimDevice {
    fn new(kind: SimDeviceKind) -> Self {
        let mut registers = HashMap::new();
        match kind {
            SimDeviceKind::Motor { has_sensor } => {
                registers.insert(Register::ControlMode, FirmwareMode::Disabled as u8 as f32);
                registers.insert(Register::SensorPresent, if has_sensor { 1.0 } else { 0.0 });
                registers.insert(Register::Setpoint, 0.0);
                registers.insert(Register::Position, 0.0);
                registers.insert(Register::Velocity, 0.0);
            }
            SimDeviceKind::Valve => {
                registers.insert(Register::ValveState, 0.0);
            }
        }
        Self {
            kind,
            registers,
            pending_timeouts: 0,
        }
    }

    fn accepts(&self, register: Register) -> bool {
        match self.kind {
            SimDeviceKind::Valve => register == Register::ValveState,
            SimDeviceKind::Motor { .. } => register != Register::ValveState,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    devices: BTreeMap<DeviceId, SimDevice>,
    writes: Vec<SimWrite>,
}

impl SimState {
    /// Start a transaction: missing devices and injected faults time out
    fn device(&mut self, id: DeviceId) -> Result<&mut SimDevice, BusError> {
        let device = self.devices.get_mut(&id).ok_or(BusError::Timeout { id })?;
        if device.pending_timeouts > 0 {
            device.pending_timeouts -= 1;
            return Err(BusError::Timeout { id });
        }
        Ok(device)
    }

    fn read(&mut self, id: DeviceId, register: Register) -> Result<f32, BusError> {
        let device = self.device(id)?;
        if !device.accepts(register) {
            return Err(BusError::DeviceFault {
                id,
                status: STATUS_ACCESS,
            });
        }
        if register == Register::AppliedOutput {
            return Ok(self.applied_output(id, 0));
        }
        Ok(device.registers.get(&register).copied().unwrap_or(0.0))
    }

    fn write(&mut self, id: DeviceId, register: Register, value: f32) -> Result<(), BusError> {
        let device = self.device(id)?;
        if register.is_read_only() || !device.accepts(register) {
            return Err(BusError::DeviceFault {
                id,
                status: STATUS_ACCESS,
            });
        }
        device.registers.insert(register, value);
        self.writes.push(SimWrite {
            id,
            register,
            value,
        });
        Ok(())
    }

    fn applied_output(&self, id: DeviceId, depth: usize) -> f32 {
        let Some(device) = self.devices.get(&id) else {
            return 0.0;
        };
        let reg = |r: Register| device.registers.get(&r).copied().unwrap_or(0.0);

        match FirmwareMode::try_from(reg(Register::ControlMode) as u8) {
            Ok(FirmwareMode::Disabled) | Err(_) => 0.0,
            Ok(FirmwareMode::Follower) if depth < MAX_FOLLOW_DEPTH => {
                self.applied_output(reg(Register::FollowTarget) as u8, depth + 1)
            }
            Ok(FirmwareMode::Follower) => 0.0,
            Ok(_) => reg(Register::Setpoint),
        }
    }
}

/// Cloneable handle to a simulated bus; clones share the same devices
#[derive(Clone, Default)]
pub struct SimBus {
    inner: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a bus with motors on both sides and a shifter valve
    pub fn for_drivetrain(left: &[DeviceId], right: &[DeviceId], shifter: DeviceId) -> Self {
        let sim = Self::new();
        for &id in left.iter().chain(right) {
            sim.add_device(id, SimDeviceKind::motor());
        }
        sim.add_device(shifter, SimDeviceKind::valve());
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_device(&self, id: DeviceId, kind: SimDeviceKind) {
        self.state().devices.insert(id, SimDevice::new(kind));
    }

    /// Make the next `count` transactions addressed to `id` time out
    pub fn inject_timeouts(&self, id: DeviceId, count: u32) {
        if let Some(device) = self.state().devices.get_mut(&id) {
            device.pending_timeouts += count;
        }
    }

    pub fn pending_timeouts(&self, id: DeviceId) -> u32 {
        self.state()
            .devices
            .get(&id)
            .map_or(0, |d| d.pending_timeouts)
    }

    /// Set a register directly, bypassing the write log and access checks
    pub fn set_register(&self, id: DeviceId, register: Register, value: f32) {
        if let Some(device) = self.state().devices.get_mut(&id) {
            device.registers.insert(register, value);
        }
    }

    pub fn set_velocity(&self, id: DeviceId, velocity: f32) {
        self.set_register(id, Register::Velocity, velocity);
    }

    pub fn set_position(&self, id: DeviceId, position: f32) {
        self.set_register(id, Register::Position, position);
    }

    /// Current register contents, without counting as a bus transaction
    pub fn register(&self, id: DeviceId, register: Register) -> Option<f32> {
        self.state()
            .devices
            .get(&id)
            .and_then(|d| d.registers.get(&register).copied())
    }

    /// Output the firmware is actually driving, following leader links
    pub fn applied_output(&self, id: DeviceId) -> f32 {
        self.state().applied_output(id, 0)
    }

    pub fn writes(&self) -> Vec<SimWrite> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, id: DeviceId) -> Vec<SimWrite> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.id == id)
            .copied()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

impl MotorBus for SimBus {
    fn ping(&mut self, id: DeviceId) -> Result<bool, BusError> {
        Ok(self.state().devices.contains_key(&id))
    }

    fn read_u8(&mut self, id: DeviceId, register: Register) -> Result<u8, BusError> {
        Ok(self.state().read(id, register)? as u8)
    }

    fn write_u8(&mut self, id: DeviceId, register: Register, value: u8) -> Result<(), BusError> {
        self.state().write(id, register, value as f32)
    }

    fn read_f32(&mut self, id: DeviceId, register: Register) -> Result<f32, BusError> {
        self.state().read(id, register)
    }

    fn write_f32(&mut self, id: DeviceId, register: Register, value: f32) -> Result<(), BusError> {
        self.state().write(id, register, value)
    }
}
