use crate::error::{GoError, Result};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Command identifiers understood by Skip-family firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SkipCommand {
    GetStatus = 0x10,
    WriteLocalNvMem1Byte = 0x11,
    WriteLocalNvMem2Bytes = 0x12,
    WriteLocalNvMem3Bytes = 0x13,
    WriteLocalNvMem4Bytes = 0x14,
    WriteLocalNvMem5Bytes = 0x15,
    WriteLocalNvMem6Bytes = 0x16,
    ReadLocalNvMem = 0x17,
    StartMeasurements = 0x18,
    StopMeasurements = 0x19,
    Init = 0x1A,
    SetMeasurementPeriod = 0x1B,
    GetMeasurementPeriod = 0x1C,
    SetLedState = 0x1D,
    GetLedState = 0x1E,
    GetSerialNumber = 0x20,
    WriteRemoteNvMem1Byte = 0x22,
    WriteRemoteNvMem2Bytes = 0x23,
    WriteRemoteNvMem3Bytes = 0x24,
    WriteRemoteNvMem4Bytes = 0x25,
    WriteRemoteNvMem5Bytes = 0x26,
    ReadRemoteNvMem = 0x27,
    GetSensorId = 0x28,
    SetAnalogInputChannel = 0x29,
    GetAnalogInputChannel = 0x2A,
}

impl SkipCommand {
    /// Write command for a local NVM chunk of `len` bytes (1..=6).
    pub fn write_local_nv_mem(len: usize) -> Result<Self> {
        match len {
            1 => Ok(Self::WriteLocalNvMem1Byte),
            2 => Ok(Self::WriteLocalNvMem2Bytes),
            3 => Ok(Self::WriteLocalNvMem3Bytes),
            4 => Ok(Self::WriteLocalNvMem4Bytes),
            5 => Ok(Self::WriteLocalNvMem5Bytes),
            6 => Ok(Self::WriteLocalNvMem6Bytes),
            _ => Err(GoError::Precondition(format!("no local NVM write command for {} bytes", len))),
        }
    }

    /// Write command for a remote NVM chunk of `len` bytes (1..=5).
    pub fn write_remote_nv_mem(len: usize) -> Result<Self> {
        match len {
            1 => Ok(Self::WriteRemoteNvMem1Byte),
            2 => Ok(Self::WriteRemoteNvMem2Bytes),
            3 => Ok(Self::WriteRemoteNvMem3Bytes),
            4 => Ok(Self::WriteRemoteNvMem4Bytes),
            5 => Ok(Self::WriteRemoteNvMem5Bytes),
            _ => Err(GoError::Precondition(format!("no remote NVM write command for {} bytes", len))),
        }
    }

    pub fn read_nv_mem(local: bool) -> Self {
        if local { Self::ReadLocalNvMem } else { Self::ReadRemoteNvMem }
    }

    /// Number of bytes written by an NVM write command, if it is one.
    pub fn nv_write_len(&self) -> Option<(bool, usize)> {
        let id: u8 = (*self).into();
        match id {
            0x11..=0x16 => Some((true, (id - 0x10) as usize)),
            0x22..=0x26 => Some((false, (id - 0x21) as usize)),
            _ => None,
        }
    }
}

/// Status codes reported by the device (first payload byte of an error response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CmdStatus {
    Success = 0x00,
    NotReady = 0x30,
    CmdNotSupported = 0x31,
    InternalError1 = 0x32,
    InternalError2 = 0x33,
    CannotChangePeriodWhileCollecting = 0x34,
    CannotReadNvMemBlkWhileCollectingFast = 0x35,
    InvalidParameter = 0x36,
    CannotWriteFlashWhileCollecting = 0x37,
    CannotWriteFlashWhileHostFifoBusy = 0x38,
    OpBlockedWhileCollecting = 0x39,
    /// Host side: no response arrived
    ErrorCommunication = 0xF0,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Snapshot of the diagnostic status fields kept by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CmdResponseStatus {
    pub last_cmd: u8,
    pub last_cmd_status: u8,
    pub last_cmd_with_error_response_sent_over_the_wire: u8,
    pub last_error_sent_over_the_wire: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MeasurementPeriodParams {
    /// Period in device ticks
    pub ticks: U32,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct NvReadParams {
    pub addr: u8,
    pub count: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LedStateParams {
    pub color: u8,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GetStatusPayload {
    pub status: u8,
    pub master_major: u8,
    pub master_minor: u8,
    pub slave_major: u8,
    pub slave_minor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: u8,
    pub master_version: (u8, u8),
    pub slave_version: (u8, u8),
}

impl From<GetStatusPayload> for DeviceStatus {
    fn from(raw: GetStatusPayload) -> Self {
        Self {
            status: raw.status,
            master_version: (raw.master_major, raw.master_minor),
            slave_version: (raw.slave_major, raw.slave_minor),
        }
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SerialNumberPayload {
    pub week: u8,
    pub year: u8,
    /// 24-bit little-endian production counter
    pub counter: [u8; 3],
}

/// Manufacturing serial number: week, two-digit year and a running counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumber {
    pub week: u8,
    pub year: u8,
    pub counter: u32,
}

impl From<SerialNumberPayload> for SerialNumber {
    fn from(raw: SerialNumberPayload) -> Self {
        let [lo, mid, hi] = raw.counter;
        Self {
            week: raw.week,
            year: raw.year,
            counter: u32::from_le_bytes([lo, mid, hi, 0]),
        }
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}{:02}{:08}", self.year, self.week, self.counter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum LedColor {
    Black = 0xC0,
    Red = 0x40,
    Green = 0x80,
    Orange = 0x00,
}

/// Highest LED brightness accepted by the firmware
pub const MAX_LED_BRIGHTNESS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum AnalogInputChannel {
    #[strum(to_string = "offset")]
    Offset = 0,
    #[strum(to_string = "0-5 V")]
    Vin = 1,
    #[strum(to_string = "-10 to +10 V")]
    Vin10 = 2,
    #[strum(to_string = "sensor id")]
    Id = 3,
}

// A derived Default would make num_enum map unknown codes onto it
impl Default for AnalogInputChannel {
    fn default() -> Self {
        AnalogInputChannel::Vin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv_write_command_lengths() {
        assert_eq!(SkipCommand::write_local_nv_mem(6).unwrap(), SkipCommand::WriteLocalNvMem6Bytes);
        assert_eq!(SkipCommand::write_remote_nv_mem(1).unwrap(), SkipCommand::WriteRemoteNvMem1Byte);
        assert!(SkipCommand::write_local_nv_mem(7).is_err());
        assert!(SkipCommand::write_remote_nv_mem(6).is_err());

        assert_eq!(SkipCommand::WriteLocalNvMem4Bytes.nv_write_len(), Some((true, 4)));
        assert_eq!(SkipCommand::WriteRemoteNvMem5Bytes.nv_write_len(), Some((false, 5)));
        assert_eq!(SkipCommand::GetStatus.nv_write_len(), None);
    }

    #[test]
    fn test_status_catch_all() {
        assert_eq!(CmdStatus::from_primitive(0x36), CmdStatus::InvalidParameter);
        assert_eq!(CmdStatus::from_primitive(0x77), CmdStatus::Unknown(0x77));
        let raw: u8 = CmdStatus::ErrorCommunication.into();
        assert_eq!(raw, 0xF0);
    }

    #[test]
    fn test_serial_number_decoding() {
        let raw = SerialNumberPayload::read_from_bytes(&[12, 9, 0x39, 0x30, 0x00]).unwrap();
        let serial = SerialNumber::from(raw);
        assert_eq!(serial.counter, 12345);
        assert_eq!(serial.to_string(), "091200012345");
    }

    #[test]
    fn test_analog_channel_codes() {
        assert_eq!(AnalogInputChannel::try_from(2).unwrap(), AnalogInputChannel::Vin10);
        assert!(AnalogInputChannel::try_from(9).is_err());
        assert_eq!(AnalogInputChannel::default(), AnalogInputChannel::Vin);
    }

    #[test]
    fn test_period_params_layout() {
        let params = MeasurementPeriodParams { ticks: U32::new(0x0001_86A0) };
        assert_eq!(params.as_bytes(), &[0xA0, 0x86, 0x01, 0x00]);
    }
}
