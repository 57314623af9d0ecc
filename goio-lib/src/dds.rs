//! Sensor DDS (data description) record: the 128-byte identity and
//! calibration block a smart sensor carries in its own memory.

use crate::error::{GoError, Result};
use crate::variant::ProbeType;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zerocopy::byteorder::little_endian::{F32, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Sensor ids below this come from an id resistor and have no DDS memory.
pub const FIRST_SMART_SENSOR_ID: u32 = 20;

/// DDS memory address of the record
pub const DDS_RECORD_ADDR: u32 = 0;

pub const DDS_CAL_PAGES: usize = 3;

pub const LONG_NAME_LEN: usize = 20;
pub const SHORT_NAME_LEN: usize = 12;
pub const UNITS_LEN: usize = 7;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CalPageRaw {
    pub coefficient_a: F32,
    pub coefficient_b: F32,
    pub coefficient_c: F32,
    pub units: [u8; UNITS_LEN],
}

/// On-sensor layout, 128 bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SensorDdsRecordRaw {
    pub mem_map_version: u8,
    pub sensor_number: u8,
    pub serial_number: [u8; 3],
    pub lot_code_yy: u8,
    pub lot_code_ww: u8,
    pub manufacturer_id: u8,
    pub long_name: [u8; LONG_NAME_LEN],
    pub short_name: [u8; SHORT_NAME_LEN],
    pub uncertainty: u8,
    pub significant_figures: u8,
    pub current_requirement: u8,
    pub averaging: u8,
    pub min_sample_period: F32,
    pub typ_sample_period: F32,
    pub typ_number_of_samples: U16,
    pub warm_up_time: U16,
    pub experiment_type: u8,
    pub operation_type: u8,
    pub calibration_equation: i8,
    pub y_min_value: F32,
    pub y_max_value: F32,
    pub y_scale: u8,
    pub highest_valid_cal_page_index: u8,
    pub active_cal_page: u8,
    pub cal_pages: [CalPageRaw; DDS_CAL_PAGES],
    /// XOR of every preceding byte
    pub checksum: u8,
}

pub const DDS_RECORD_SIZE: usize = size_of::<SensorDdsRecordRaw>();

/// Equation applied by the active calibration page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationEquation {
    /// Volts pass through unchanged
    None,
    /// a + b*v
    Linear,
    /// a + b*v + c*v^2
    Quadratic,
    Other(i8),
}

impl From<i8> for CalibrationEquation {
    fn from(code: i8) -> Self {
        match code {
            0 => CalibrationEquation::None,
            1 => CalibrationEquation::Linear,
            2 => CalibrationEquation::Quadratic,
            other => CalibrationEquation::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalPage {
    pub coefficient_a: f32,
    pub coefficient_b: f32,
    pub coefficient_c: f32,
    pub units: String,
}

impl CalPage {
    /// Volts in, volts out.
    pub fn identity() -> Self {
        Self {
            coefficient_a: 0.0,
            coefficient_b: 1.0,
            coefficient_c: 0.0,
            units: "V".to_string(),
        }
    }
}

/// Decoded DDS record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDdsRecord {
    pub mem_map_version: u8,
    /// 0 means no sensor is attached
    pub sensor_number: u8,
    pub serial_number: u32,
    /// Lot code as BCD year and week
    pub lot_code: (u8, u8),
    pub manufacturer_id: u8,
    pub long_name: String,
    pub short_name: String,
    pub uncertainty: u8,
    pub significant_figures: u8,
    pub current_requirement: u8,
    pub averaging: u8,
    pub min_sample_period: f32,
    pub typ_sample_period: f32,
    pub typ_number_of_samples: u16,
    pub warm_up_time: u16,
    pub experiment_type: u8,
    /// Selects the probe type, and with it the input range
    pub operation_type: u8,
    pub calibration_equation: i8,
    pub y_min_value: f32,
    pub y_max_value: f32,
    pub y_scale: u8,
    pub highest_valid_cal_page_index: u8,
    pub active_cal_page: u8,
    pub cal_pages: [CalPage; DDS_CAL_PAGES],
}

impl Default for SensorDdsRecord {
    fn default() -> Self {
        Self::default_for_sensor(0)
    }
}

impl SensorDdsRecord {
    /// Record used for sensors without DDS memory: a plain 0-5 V input
    /// reported in volts.
    pub fn default_for_sensor(sensor_number: u8) -> Self {
        Self {
            mem_map_version: 0,
            sensor_number,
            serial_number: 0,
            lot_code: (0, 0),
            manufacturer_id: 0,
            long_name: String::new(),
            short_name: String::new(),
            uncertainty: 0,
            significant_figures: 3,
            current_requirement: 0,
            averaging: 0,
            min_sample_period: 0.001,
            typ_sample_period: 1.0,
            typ_number_of_samples: 100,
            warm_up_time: 0,
            experiment_type: 0,
            operation_type: ProbeType::Analog5V.into(),
            calibration_equation: 1,
            y_min_value: 0.0,
            y_max_value: 5.0,
            y_scale: 0,
            highest_valid_cal_page_index: 0,
            active_cal_page: 0,
            cal_pages: [CalPage::identity(), CalPage::default(), CalPage::default()],
        }
    }

    /// Analog range implied by the operation type. Anything other than the
    /// +/-10 V code reads as a 0-5 V probe.
    pub fn probe_type(&self) -> ProbeType {
        match ProbeType::from(self.operation_type) {
            ProbeType::Analog10V => ProbeType::Analog10V,
            _ => ProbeType::Analog5V,
        }
    }

    pub fn equation(&self) -> CalibrationEquation {
        CalibrationEquation::from(self.calibration_equation)
    }

    pub fn active_page(&self) -> &CalPage {
        let index = (self.active_cal_page as usize).min(DDS_CAL_PAGES - 1);
        &self.cal_pages[index]
    }

    /// Apply the active calibration page to a voltage.
    pub fn calibrate(&self, volts: f64) -> f64 {
        let page = self.active_page();
        let (a, b, c) = (
            page.coefficient_a as f64,
            page.coefficient_b as f64,
            page.coefficient_c as f64,
        );
        match self.equation() {
            CalibrationEquation::Linear => a + b * volts,
            CalibrationEquation::Quadratic => a + b * volts + c * volts * volts,
            CalibrationEquation::None | CalibrationEquation::Other(_) => volts,
        }
    }

    pub fn units(&self) -> &str {
        &self.active_page().units
    }

    pub fn calculate_checksum(&self) -> u8 {
        self.to_bytes()[DDS_RECORD_SIZE - 1]
    }

    /// Encode with a fresh checksum.
    pub fn to_bytes(&self) -> [u8; DDS_RECORD_SIZE] {
        let serial = self.serial_number.to_le_bytes();
        let mut raw = SensorDdsRecordRaw {
            mem_map_version: self.mem_map_version,
            sensor_number: self.sensor_number,
            serial_number: [serial[0], serial[1], serial[2]],
            lot_code_yy: self.lot_code.0,
            lot_code_ww: self.lot_code.1,
            manufacturer_id: self.manufacturer_id,
            long_name: pack_text(&self.long_name),
            short_name: pack_text(&self.short_name),
            uncertainty: self.uncertainty,
            significant_figures: self.significant_figures,
            current_requirement: self.current_requirement,
            averaging: self.averaging,
            min_sample_period: F32::new(self.min_sample_period),
            typ_sample_period: F32::new(self.typ_sample_period),
            typ_number_of_samples: U16::new(self.typ_number_of_samples),
            warm_up_time: U16::new(self.warm_up_time),
            experiment_type: self.experiment_type,
            operation_type: self.operation_type,
            calibration_equation: self.calibration_equation,
            y_min_value: F32::new(self.y_min_value),
            y_max_value: F32::new(self.y_max_value),
            y_scale: self.y_scale,
            highest_valid_cal_page_index: self.highest_valid_cal_page_index,
            active_cal_page: self.active_cal_page,
            cal_pages: self.cal_pages.each_ref().map(|page| CalPageRaw {
                coefficient_a: F32::new(page.coefficient_a),
                coefficient_b: F32::new(page.coefficient_b),
                coefficient_c: F32::new(page.coefficient_c),
                units: pack_text(&page.units),
            }),
            checksum: 0,
        };
        raw.checksum = checksum(&raw.as_bytes()[..DDS_RECORD_SIZE - 1]);

        let mut out = [0u8; DDS_RECORD_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode a record read from sensor memory.
    ///
    /// Blank memory is always rejected. A checksum mismatch is an error
    /// when `strict`, otherwise it is logged and the record kept.
    pub fn from_bytes(bytes: &[u8], strict: bool) -> Result<Self> {
        let raw = SensorDdsRecordRaw::ref_from_bytes(bytes).map_err(|_| {
            GoError::InvalidRecord(format!(
                "DDS record is {} bytes, expected {}",
                bytes.len(),
                DDS_RECORD_SIZE
            ))
        })?;

        if bytes.iter().all(|&b| b == 0xFF) || bytes.iter().all(|&b| b == 0) {
            return Err(GoError::InvalidRecord("DDS memory is blank".to_string()));
        }
        let expected = checksum(&bytes[..DDS_RECORD_SIZE - 1]);
        if raw.checksum != expected {
            if strict {
                return Err(GoError::InvalidRecord(format!(
                    "DDS record checksum {:#04x}, computed {:#04x}",
                    raw.checksum, expected
                )));
            }
            warn!(
                stored = format_args!("{:#04x}", raw.checksum),
                computed = format_args!("{:#04x}", expected),
                "Accepting DDS record with bad checksum"
            );
        }

        let serial = raw.serial_number;
        Ok(Self {
            mem_map_version: raw.mem_map_version,
            sensor_number: raw.sensor_number,
            serial_number: u32::from_le_bytes([serial[0], serial[1], serial[2], 0]),
            lot_code: (raw.lot_code_yy, raw.lot_code_ww),
            manufacturer_id: raw.manufacturer_id,
            long_name: unpack_text(&raw.long_name),
            short_name: unpack_text(&raw.short_name),
            uncertainty: raw.uncertainty,
            significant_figures: raw.significant_figures,
            current_requirement: raw.current_requirement,
            averaging: raw.averaging,
            min_sample_period: raw.min_sample_period.get(),
            typ_sample_period: raw.typ_sample_period.get(),
            typ_number_of_samples: raw.typ_number_of_samples.get(),
            warm_up_time: raw.warm_up_time.get(),
            experiment_type: raw.experiment_type,
            operation_type: raw.operation_type,
            calibration_equation: raw.calibration_equation,
            y_min_value: raw.y_min_value.get(),
            y_max_value: raw.y_max_value.get(),
            y_scale: raw.y_scale,
            highest_valid_cal_page_index: raw.highest_valid_cal_page_index,
            active_cal_page: raw.active_cal_page,
            cal_pages: raw.cal_pages.each_ref().map(|page| CalPage {
                coefficient_a: page.coefficient_a.get(),
                coefficient_b: page.coefficient_b.get(),
                coefficient_c: page.coefficient_c.get(),
                units: unpack_text(&page.units),
            }),
        })
    }
}

// Text fields are NUL padded; longer strings are cut at the field width.
fn pack_text<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = text.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn unpack_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0 || b == 0xFF).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thermometer() -> SensorDdsRecord {
        let mut record = SensorDdsRecord::default_for_sensor(60);
        record.long_name = "Stainless Temperature".to_string();
        record.short_name = "Temp".to_string();
        record.serial_number = 0x0A_1234;
        record.lot_code = (0x24, 0x31);
        record.cal_pages[0] = CalPage {
            coefficient_a: -20.0,
            coefficient_b: 25.0,
            coefficient_c: 0.0,
            units: "(C)".to_string(),
        };
        record
    }

    #[test]
    fn test_record_size() {
        assert_eq!(DDS_RECORD_SIZE, 128);
        assert_eq!(size_of::<CalPageRaw>(), 19);
    }

    #[test]
    fn test_encode_decode() {
        let record = thermometer();
        let bytes = record.to_bytes();
        assert_eq!(bytes[1], 60);

        let decoded = SensorDdsRecord::from_bytes(&bytes, true).unwrap();
        // long name is cut to its field width
        assert_eq!(decoded.long_name, "Stainless Temperatur");
        assert_eq!(decoded.short_name, "Temp");
        assert_eq!(decoded.serial_number, 0x0A_1234);
        assert_eq!(decoded.cal_pages, record.cal_pages);
        assert_eq!(decoded.calculate_checksum(), bytes[DDS_RECORD_SIZE - 1]);
    }

    #[test]
    fn test_bad_checksum_strict_and_lax() {
        let mut bytes = thermometer().to_bytes();
        bytes[DDS_RECORD_SIZE - 1] ^= 0x5A;

        let err = SensorDdsRecord::from_bytes(&bytes, true).unwrap_err();
        assert!(matches!(err, GoError::InvalidRecord(msg) if msg.contains("checksum")));

        let lax = SensorDdsRecord::from_bytes(&bytes, false).unwrap();
        assert_eq!(lax.short_name, "Temp");
    }

    #[test]
    fn test_blank_memory_rejected() {
        for fill in [0x00, 0xFF] {
            let err = SensorDdsRecord::from_bytes(&[fill; DDS_RECORD_SIZE], false).unwrap_err();
            assert!(matches!(err, GoError::InvalidRecord(msg) if msg.contains("blank")));
        }
        assert!(SensorDdsRecord::from_bytes(&[0x01; 12], false).is_err());
    }

    #[test]
    fn test_input_range_from_operation_type() {
        let mut record = SensorDdsRecord::default();
        assert_eq!(record.probe_type(), ProbeType::Analog5V);
        record.operation_type = ProbeType::Analog10V.into();
        assert_eq!(record.probe_type(), ProbeType::Analog10V);
        record.operation_type = 99;
        assert_eq!(record.probe_type(), ProbeType::Analog5V);
    }

    #[test]
    fn test_calibration_equations() {
        let mut record = thermometer();
        assert!((record.calibrate(1.0) - 5.0).abs() < 1e-9);
        assert_eq!(record.units(), "(C)");

        record.calibration_equation = 2;
        record.cal_pages[0].coefficient_c = 2.0;
        assert!((record.calibrate(2.0) - 38.0).abs() < 1e-9);

        record.calibration_equation = 0;
        assert_eq!(record.calibrate(2.0), 2.0);

        // out of range page index falls back to the last page
        record.active_cal_page = 9;
        assert_eq!(record.active_page(), &record.cal_pages[DDS_CAL_PAGES - 1]);
    }
}
