// Serial motor-controller bus
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Replies carry [0xFF, 0xFF, ID, Length, Status, Params..., Checksum].
// Scalar registers are 1 byte, real-valued registers are f32 little-endian.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::{BusError, DeviceId, MotorBus, Register};

/// Default serial configuration for the motor-controller bridge
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

type Result<T> = std::result::Result<T, BusError>;

/// Motor bus over a serial bridge
pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    /// Open with the default baudrate and per-transaction timeout
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with(port_name, DEFAULT_BAUDRATE, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    /// Open with custom baudrate and timeout
    pub fn open_with(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
        Ok(Self { port })
    }

    /// Checksum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(id: DeviceId, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum = Self::checksum(&packet[2..]);
        packet.push(checksum);

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact_or_timeout(&mut self, id: DeviceId, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout { id }
            } else {
                BusError::Io(e)
            }
        })
    }

    /// Read a reply and return its parameters
    fn read_response(&mut self, expected_id: DeviceId) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.read_exact_or_timeout(expected_id, &mut header)?;

        if header != HEADER {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.read_exact_or_timeout(expected_id, &mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status + params + checksum
        let mut remaining = vec![0u8; length];
        self.read_exact_or_timeout(id, &mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..length - 1]);
        if Self::checksum(&checksum_data) != remaining[length - 1] {
            return Err(BusError::ChecksumMismatch { id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(BusError::DeviceFault { id, status });
        }

        Ok(remaining[1..length - 1].to_vec())
    }

    fn write_register(&mut self, id: DeviceId, register: Register, bytes: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(1 + bytes.len());
        params.push(register as u8);
        params.extend_from_slice(bytes);

        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("Write to device {}: reg={:?}, bytes={:02X?}", id, register, bytes);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    fn read_register(&mut self, id: DeviceId, register: Register, len: u8) -> Result<Vec<u8>> {
        let packet = Self::build_packet(id, Instruction::Read, &[register as u8, len]);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < len as usize {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(response)
    }
}

impl MotorBus for SerialBus {
    fn ping(&mut self, id: DeviceId) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_u8(&mut self, id: DeviceId, register: Register) -> Result<u8> {
        let response = self.read_register(id, register, 1)?;
        Ok(response[0])
    }

    fn write_u8(&mut self, id: DeviceId, register: Register, value: u8) -> Result<()> {
        self.write_register(id, register, &[value])
    }

    fn read_f32(&mut self, id: DeviceId, register: Register) -> Result<f32> {
        let response = self.read_register(id, register, 4)?;
        Ok(decode_f32(&response))
    }

    fn write_f32(&mut self, id: DeviceId, register: Register, value: f32) -> Result<()> {
        self.write_register(id, register, &value.to_le_bytes())
    }
}

/// Decode the first four bytes of a reply as a little-endian f32
fn decode_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
