// Shared hardware bus for the drivetrain
//
// Provides:
// - The register map spoken by the motor controllers and the shifter valve
// - `MotorBus`, the transport seam (serial hardware or simulation)
// - `SharedBus`, the single serialization point with bounded timeout retry

mod serial;
pub mod sim;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DrivetrainError, Result};

pub use serial::{SerialBus, DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_MS};
pub use sim::SimBus;

/// Bus address of a motor controller or valve module
pub type DeviceId = u8;

/// True when `value` survives narrowing to an f32 register as a finite number
pub fn fits_register(value: f64) -> bool {
    value.is_finite() && (value as f32).is_finite()
}

/// Register addresses shared by the motor controllers and the valve module
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    // Mode and command (1 byte unless noted)
    ControlMode = 0x20,
    Setpoint = 0x21, // f32, interpreted per control mode
    FollowTarget = 0x22,

    // Closed-loop configuration
    ProfileSlot = 0x23,
    FeedbackDevice = 0x24,
    SensorReversed = 0x25,
    SensorPresent = 0x26, // read-only
    GainF = 0x30,         // f32
    GainP = 0x34,         // f32
    GainI = 0x38,         // f32
    GainD = 0x3C,         // f32
    NominalOutputForward = 0x40, // f32 volts
    NominalOutputReverse = 0x44, // f32 volts
    PeakOutputForward = 0x48,    // f32 volts
    PeakOutputReverse = 0x4C,    // f32 volts

    // Feedback (f32)
    Position = 0x50, // writable: sets the position reference
    Velocity = 0x54, // read-only
    AppliedOutput = 0x58, // read-only

    // Valve module
    ValveState = 0x60,
}

impl Register {
    /// Registers the firmware refuses to write
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Register::SensorPresent | Register::Velocity | Register::AppliedOutput
        )
    }
}

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from device {id}: {reason}")]
    InvalidResponse { id: DeviceId, reason: String },

    #[error("Checksum mismatch for device {id}")]
    ChecksumMismatch { id: DeviceId },

    #[error("Device {id} returned error status: 0x{status:02X}")]
    DeviceFault { id: DeviceId, status: u8 },

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: DeviceId },
}

/// One register-level transport to the motor controllers
///
/// Every call is a complete, blocking bus transaction.
pub trait MotorBus: Send {
    /// Check whether a device answers at `id`
    fn ping(&mut self, id: DeviceId) -> std::result::Result<bool, BusError>;

    fn read_u8(&mut self, id: DeviceId, register: Register) -> std::result::Result<u8, BusError>;

    fn write_u8(
        &mut self,
        id: DeviceId,
        register: Register,
        value: u8,
    ) -> std::result::Result<(), BusError>;

    fn read_f32(&mut self, id: DeviceId, register: Register) -> std::result::Result<f32, BusError>;

    fn write_f32(
        &mut self,
        id: DeviceId,
        register: Register,
        value: f32,
    ) -> std::result::Result<(), BusError>;
}

/// Bounded retry applied to bus timeouts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per transaction, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

/// Cloneable handle to the one physical bus
///
/// Each transaction holds the bus lock for its whole retry window, so two
/// actuators' writes never interleave and a second caller blocks until the
/// first transaction completes or times out.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn MotorBus>>>,
    retry: RetryPolicy,
}

impl SharedBus {
    pub fn new(bus: Box<dyn MotorBus>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn MotorBus>> {
        // A panic mid-transaction leaves no in-process state to repair; the
        // next transaction re-addresses the device from scratch.
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Bus lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run one transaction against device `id`, retrying timeouts
    pub fn transact<T, F>(&self, id: DeviceId, mut op: F) -> Result<T>
    where
        F: FnMut(&mut dyn MotorBus) -> std::result::Result<T, BusError>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut bus = self.lock();

        for attempt in 1..=attempts {
            match op(&mut **bus) {
                Ok(value) => return Ok(value),
                Err(BusError::Timeout { .. }) if attempt < attempts => {
                    warn!(
                        "Bus timeout on device {} (attempt {}/{}), retrying",
                        id, attempt, attempts
                    );
                    if self.retry.backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.retry.backoff_ms));
                    }
                }
                Err(BusError::Timeout { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(DrivetrainError::BusTimeout { id, attempts })
    }

    pub fn ping(&self, id: DeviceId) -> Result<bool> {
        // Not retried: a silent device is an answer, not a fault
        let mut bus = self.lock();
        Ok(bus.ping(id)?)
    }

    pub fn read_u8(&self, id: DeviceId, register: Register) -> Result<u8> {
        self.transact(id, |bus| bus.read_u8(id, register))
    }

    pub fn write_u8(&self, id: DeviceId, register: Register, value: u8) -> Result<()> {
        self.transact(id, |bus| bus.write_u8(id, register, value))
    }

    pub fn read_f32(&self, id: DeviceId, register: Register) -> Result<f32> {
        self.transact(id, |bus| bus.read_f32(id, register))
    }

    pub fn write_f32(&self, id: DeviceId, register: Register, value: f32) -> Result<()> {
        self.transact(id, |bus| bus.write_f32(id, register, value))
    }
}
