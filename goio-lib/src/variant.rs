use crate::command::AnalogInputChannel;
use crate::constants::{GO_LINK_PRODUCT_ID, GO_TEMP_PRODUCT_ID, VERNIER_VENDOR_ID};
use crate::packet::WireFormat;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Probe type codes as stored in sensor DDS memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProbeType {
    #[strum(to_string = "no probe")]
    NoProbe = 0,
    #[strum(to_string = "time")]
    Time = 1,
    #[strum(to_string = "analog 0-5 V")]
    Analog5V = 14,
    #[strum(to_string = "analog +/-10 V")]
    Analog10V = 15,

    #[num_enum(catch_all)]
    Unknown(u8),
}

// num_enum's catch_all rules out deriving Default alongside it
impl Default for ProbeType {
    fn default() -> Self {
        ProbeType::NoProbe
    }
}

impl ProbeType {
    /// Input channel the interface must select to read this probe.
    pub fn input_channel(&self) -> AnalogInputChannel {
        match self {
            ProbeType::Analog10V => AnalogInputChannel::Vin10,
            _ => AnalogInputChannel::Vin,
        }
    }
}

/// Everything that differs between members of the device family.
///
/// The protocol engine is generic over this; implementations are data
/// plus pure conversion functions.
pub trait DeviceVariant: Send + Sync + 'static {
    const NAME: &'static str;
    const VENDOR_ID: u16;
    const PRODUCT_ID: u16;
    const TICK_SECONDS: f64;
    const MIN_PERIOD_SECONDS: f64;
    const MAX_PERIOD_SECONDS: f64;
    const MAX_LOCAL_NV_ADDR: u32;
    /// `None` when the device has no remote (sensor) memory
    const MAX_REMOTE_NV_ADDR: Option<u32>;
    const WIRE_FORMAT: WireFormat = WireFormat::SKIP;
    const SUPPORTS_FLASH_RECORD: bool = false;

    /// Uncalibrated conversion of a raw ADC reading.
    fn raw_to_voltage(raw: i32, probe: ProbeType) -> f64;

    fn voltage_to_raw(volts: f64, probe: ProbeType) -> i32;
}

/// Go! Link (Skip): a single-channel analog sensor interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoLink;

impl GoLink {
    pub const VOLTS_PER_BIT_5V: f64 = 5.0 / 4096.0;
    pub const VOLTS_OFFSET_5V: f64 = 0.0;
    pub const VOLTS_PER_BIT_10V: f64 = 20.0 / 4096.0;
    pub const VOLTS_OFFSET_10V: f64 = 0.0;

    fn scale(probe: ProbeType) -> (f64, f64) {
        match probe {
            ProbeType::Analog10V => (Self::VOLTS_PER_BIT_10V, Self::VOLTS_OFFSET_10V),
            _ => (Self::VOLTS_PER_BIT_5V, Self::VOLTS_OFFSET_5V),
        }
    }
}

impl DeviceVariant for GoLink {
    const NAME: &'static str = "Go! Link";
    const VENDOR_ID: u16 = VERNIER_VENDOR_ID;
    const PRODUCT_ID: u16 = GO_LINK_PRODUCT_ID;
    const TICK_SECONDS: f64 = 0.001;
    const MIN_PERIOD_SECONDS: f64 = 0.004;
    const MAX_PERIOD_SECONDS: f64 = 60.0;
    const MAX_LOCAL_NV_ADDR: u32 = 0x3F;
    const MAX_REMOTE_NV_ADDR: Option<u32> = Some(0x7F);
    const SUPPORTS_FLASH_RECORD: bool = true;

    fn raw_to_voltage(raw: i32, probe: ProbeType) -> f64 {
        let (per_bit, offset) = Self::scale(probe);
        raw as f64 * per_bit + offset
    }

    fn voltage_to_raw(volts: f64, probe: ProbeType) -> i32 {
        let (per_bit, offset) = Self::scale(probe);
        ((volts - offset) / per_bit).round() as i32
    }
}

/// Go! Temp: a USB temperature probe. Readings are 1/128 °C per bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoTemp;

impl GoTemp {
    pub const DEGREES_PER_BIT: f64 = 1.0 / 128.0;
}

impl DeviceVariant for GoTemp {
    const NAME: &'static str = "Go! Temp";
    const VENDOR_ID: u16 = VERNIER_VENDOR_ID;
    const PRODUCT_ID: u16 = GO_TEMP_PRODUCT_ID;
    const TICK_SECONDS: f64 = 0.001;
    const MIN_PERIOD_SECONDS: f64 = 0.01;
    const MAX_PERIOD_SECONDS: f64 = 60.0;
    const MAX_LOCAL_NV_ADDR: u32 = 0x7F;
    const MAX_REMOTE_NV_ADDR: Option<u32> = None;

    fn raw_to_voltage(raw: i32, _probe: ProbeType) -> f64 {
        raw as f64 * Self::DEGREES_PER_BIT
    }

    fn voltage_to_raw(volts: f64, _probe: ProbeType) -> i32 {
        (volts / Self::DEGREES_PER_BIT).round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_link_scaling() {
        assert_eq!(GoLink::raw_to_voltage(0, ProbeType::Analog5V), 0.0);
        assert!((GoLink::raw_to_voltage(2048, ProbeType::Analog5V) - 2.5).abs() < 1e-9);
        assert!((GoLink::raw_to_voltage(-2048, ProbeType::Analog10V) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_voltage_to_raw_inverts() {
        for raw in [-2048, -1, 0, 1, 1234, 2047] {
            for probe in [ProbeType::Analog5V, ProbeType::Analog10V] {
                let volts = GoLink::raw_to_voltage(raw, probe);
                assert_eq!(GoLink::voltage_to_raw(volts, probe), raw);
            }
        }
    }

    #[test]
    fn test_go_temp_degrees() {
        assert_eq!(GoTemp::raw_to_voltage(128 * 25, ProbeType::NoProbe), 25.0);
        assert_eq!(GoTemp::voltage_to_raw(-0.5, ProbeType::NoProbe), -64);
    }

    #[test]
    fn test_input_type_codes() {
        assert_eq!(ProbeType::from_primitive(14), ProbeType::Analog5V);
        assert_eq!(ProbeType::from_primitive(99), ProbeType::Unknown(99));
        assert_eq!(ProbeType::Analog10V.input_channel(), AnalogInputChannel::Vin10);
        assert_eq!(ProbeType::default(), ProbeType::NoProbe);
        assert_eq!(u8::from(ProbeType::Unknown(42)), 42);
    }
}
