//! Go! Link calibration record stored at the start of local NVM.

use crate::error::{GoError, Result};
use crate::variant::ProbeType;
use serde::{Deserialize, Serialize};
use zerocopy::byteorder::little_endian::{F32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Local NVM address of the record
pub const FLASH_RECORD_ADDR: u32 = 0;

pub const FLASH_RECORD_SIGNATURE: u32 = 0x5049_4B53; // "SKIP"
pub const FLASH_RECORD_VERSION: u8 = 1;

/// On-device layout, 28 bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SkipFlashRecordRaw {
    pub signature: U32,
    pub version: u8,
    pub reserved: [u8; 2],
    pub slope_5v: F32,
    pub intercept_5v: F32,
    pub slope_10v: F32,
    pub intercept_10v: F32,
    pub serial_number: U32,
    /// XOR of every preceding byte
    pub checksum: u8,
}

pub const FLASH_RECORD_SIZE: usize = size_of::<SkipFlashRecordRaw>();

/// Per-probe linear calibration applied on top of the nominal ADC scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub slope: f32,
    pub intercept: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self { slope: 1.0, intercept: 0.0 }
    }
}

impl Calibration {
    pub fn apply(&self, volts: f64) -> f64 {
        volts * self.slope as f64 + self.intercept as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkipFlashRecord {
    pub version: u8,
    pub calibration_5v: Calibration,
    pub calibration_10v: Calibration,
    pub serial_number: u32,
}

impl SkipFlashRecord {
    pub fn calibration(&self, probe: ProbeType) -> Calibration {
        match probe {
            ProbeType::Analog10V => self.calibration_10v,
            _ => self.calibration_5v,
        }
    }

    /// Encode with signature and a fresh checksum.
    pub fn to_bytes(&self) -> [u8; FLASH_RECORD_SIZE] {
        let mut raw = SkipFlashRecordRaw {
            signature: U32::new(FLASH_RECORD_SIGNATURE),
            version: self.version,
            reserved: [0; 2],
            slope_5v: F32::new(self.calibration_5v.slope),
            intercept_5v: F32::new(self.calibration_5v.intercept),
            slope_10v: F32::new(self.calibration_10v.slope),
            intercept_10v: F32::new(self.calibration_10v.intercept),
            serial_number: U32::new(self.serial_number),
            checksum: 0,
        };
        raw.checksum = checksum(&raw.as_bytes()[..FLASH_RECORD_SIZE - 1]);

        let mut out = [0u8; FLASH_RECORD_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode and validate signature and checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = SkipFlashRecordRaw::ref_from_bytes(bytes).map_err(|_| {
            GoError::InvalidRecord(format!(
                "flash record is {} bytes, expected {}",
                bytes.len(),
                FLASH_RECORD_SIZE
            ))
        })?;

        if raw.signature.get() != FLASH_RECORD_SIGNATURE {
            return Err(GoError::InvalidRecord(format!(
                "bad flash record signature {:#010x}",
                raw.signature.get()
            )));
        }
        let expected = checksum(&bytes[..FLASH_RECORD_SIZE - 1]);
        if raw.checksum != expected {
            return Err(GoError::InvalidRecord(format!(
                "flash record checksum {:#04x}, computed {:#04x}",
                raw.checksum, expected
            )));
        }

        Ok(Self {
            version: raw.version,
            calibration_5v: Calibration {
                slope: raw.slope_5v.get(),
                intercept: raw.intercept_5v.get(),
            },
            calibration_10v: Calibration {
                slope: raw.slope_10v.get(),
                intercept: raw.intercept_10v.get(),
            },
            serial_number: raw.serial_number.get(),
        })
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SkipFlashRecord {
        SkipFlashRecord {
            version: FLASH_RECORD_VERSION,
            calibration_5v: Calibration { slope: 1.01, intercept: -0.02 },
            calibration_10v: Calibration { slope: 0.99, intercept: 0.05 },
            serial_number: 0x0012_3456,
        }
    }

    #[test]
    fn test_record_size() {
        assert_eq!(FLASH_RECORD_SIZE, 28);
    }

    #[test]
    fn test_encode_decode() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..4], b"SKIP");
        assert_eq!(SkipFlashRecord::from_bytes(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_corrupt_byte_fails_checksum() {
        let mut bytes = sample().to_bytes();
        bytes[10] ^= 0x01;
        let err = SkipFlashRecord::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, GoError::InvalidRecord(msg) if msg.contains("checksum")));
    }

    #[test]
    fn test_blank_memory_rejected() {
        let err = SkipFlashRecord::from_bytes(&[0xFF; FLASH_RECORD_SIZE]).unwrap_err();
        assert!(matches!(err, GoError::InvalidRecord(msg) if msg.contains("signature")));
    }

    #[test]
    fn test_calibration_by_range() {
        let record = sample();
        assert_eq!(record.calibration(ProbeType::Analog10V).slope, 0.99);
        assert!((record.calibration(ProbeType::Analog5V).apply(1.0) - 0.99).abs() < 1e-6);
    }
}
