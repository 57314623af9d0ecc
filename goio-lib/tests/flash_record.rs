//! Tests for the Go! Link flash record

mod common;

use common::*;
use goio_lib::flash::{Calibration, FLASH_RECORD_SIZE, FLASH_RECORD_VERSION, SkipFlashRecord};

fn record() -> SkipFlashRecord {
    SkipFlashRecord {
        version: FLASH_RECORD_VERSION,
        calibration_5v: Calibration {
            slope: 1.002,
            intercept: -0.004,
        },
        calibration_10v: Calibration {
            slope: 0.998,
            intercept: 0.011,
        },
        serial_number: 901_234,
    }
}

#[test]
fn test_write_then_read_record() {
    let (sim, mut device) = open_go_link();

    device.write_flash_record(&record(), TEST_TIMEOUT).unwrap();
    assert_eq!(&sim.local_memory()[..FLASH_RECORD_SIZE], &record().to_bytes()[..]);

    device.close().unwrap();

    // a fresh handle has no cached record until it reads one
    let mut device = GoDevice::<GoLink>::with_transport(sim.transport().unwrap(), DeviceConfig::default()).unwrap();
    assert!(device.flash_record().is_none());
    let read = device.read_flash_record(TEST_TIMEOUT).unwrap();
    assert_eq!(read, record());
    assert_eq!(device.flash_record(), Some(&record()));
}

#[test]
fn test_blank_memory_is_invalid_record() {
    let (_sim, mut device) = open_go_link();

    let err = device.read_flash_record(TEST_TIMEOUT).unwrap_err();
    assert!(matches!(err, GoError::InvalidRecord(_)));
    assert!(err.is_protocol_error());
    assert!(device.flash_record().is_none());
}

#[test]
fn test_corrupted_record_rejected() {
    let (sim, mut device) = open_go_link();
    let mut bytes = record().to_bytes();
    bytes[20] ^= 0x80;
    sim.write_local_memory(0, &bytes);

    let err = device.read_flash_record(TEST_TIMEOUT).unwrap_err();
    match err {
        GoError::InvalidRecord(msg) => assert!(msg.contains("checksum"), "got: {}", msg),
        other => panic!("Expected InvalidRecord, got: {:?}", other),
    }
}

#[test]
fn test_go_temp_has_no_flash_record() {
    init_tracing();
    let sim = SimulatedGoLink::for_variant::<GoTemp>();
    let mut device = GoDevice::<GoTemp>::with_transport(sim.transport().unwrap(), DeviceConfig::default()).unwrap();

    assert!(matches!(
        device.read_flash_record(TEST_TIMEOUT),
        Err(GoError::Precondition(_))
    ));
    assert!(sim.written_packets().is_empty());
}
