//! BLE command opcodes for Vson devices.
//!
//! Every command is a single byte written to the command characteristic
//! ([`vson_types::uuids::COMMAND`]). The device answers with one frame on the
//! notification characteristic.

use core::fmt;

/// Read current measurement command.
/// Format: `[READ_MEASUREMENT]`
/// Response: one 18-byte frame, see [`vson_types::frame`].
pub const READ_MEASUREMENT: u8 = 0xAB;

/// Formaldehyde sensor calibration command.
/// Format: `[CALIBRATE]`
/// Never sent by the default read flow.
pub const CALIBRATE: u8 = 0xAD;

/// A command understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Request the current measurement frame.
    ReadMeasurement = READ_MEASUREMENT,
    /// Start a calibration cycle.
    Calibrate = CALIBRATE,
}

impl Command {
    /// Opcode byte.
    #[must_use]
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Wire encoding of the command.
    #[must_use]
    pub fn as_bytes(self) -> Vec<u8> {
        vec![self.opcode()]
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            READ_MEASUREMENT => Ok(Command::ReadMeasurement),
            CALIBRATE => Ok(Command::Calibrate),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ReadMeasurement => write!(f, "read_measurement (0x{:02X})", self.opcode()),
            Command::Calibrate => write!(f, "calibrate (0x{:02X})", self.opcode()),
        }
    }
}
