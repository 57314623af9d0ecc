//! Tests for measurement period quantization and negotiation

mod common;

use common::*;
use goio_lib::DeviceVariant;
use goio_lib::device::{nearest_legal_period, period_to_ticks};

#[test]
fn test_set_then_get_returns_quantized_period() {
    let (sim, mut device) = open_go_link();

    for requested in [0.004, 0.0107, 0.02, 0.1234, 0.5, 1.0, 2.71828, 60.0] {
        let expected = device.calculate_nearest_legal_measurement_period(requested);
        device.set_measurement_period(requested, TEST_TIMEOUT).unwrap();
        let actual = device.get_measurement_period(TEST_TIMEOUT).unwrap();
        assert_eq!(actual, expected, "requested {}", requested);
        assert_eq!(sim.measurement_period_ticks(), period_to_ticks::<GoLink>(requested));
    }
}

#[test]
fn test_set_sends_ticks_not_raw_request() {
    let (sim, mut device) = open_go_link();
    device.set_measurement_period(0.0256, TEST_TIMEOUT).unwrap();

    let sent = sim.written_packets();
    assert_eq!(sent[0].as_bytes(), &[0x1B, 26, 0, 0, 0, 0, 0, 0]);
    assert_eq!(sim.measurement_period_ticks(), 26);
}

#[test]
fn test_out_of_range_requests_clamp() {
    let (_sim, mut device) = open_go_link();

    device.set_measurement_period(0.0005, TEST_TIMEOUT).unwrap();
    let low = device.get_measurement_period(TEST_TIMEOUT).unwrap();
    assert!((low - GoLink::MIN_PERIOD_SECONDS).abs() < 1e-12);

    device.set_measurement_period(3600.0, TEST_TIMEOUT).unwrap();
    let high = device.get_measurement_period(TEST_TIMEOUT).unwrap();
    assert!((high - GoLink::MAX_PERIOD_SECONDS).abs() < 1e-12);
}

#[test]
fn test_quantization_is_a_fixed_point() {
    for i in 0..2000 {
        let requested = 0.0005 + i as f64 * 0.0317;
        let once = nearest_legal_period::<GoLink>(requested);
        let twice = nearest_legal_period::<GoLink>(once);
        assert_eq!(once, twice, "not a fixed point for {}", requested);
        assert!(once >= GoLink::MIN_PERIOD_SECONDS - 1e-12);
        assert!(once <= GoLink::MAX_PERIOD_SECONDS + 1e-12);

        let temp = nearest_legal_period::<GoTemp>(requested);
        assert_eq!(nearest_legal_period::<GoTemp>(temp), temp);
    }
}

#[test]
fn test_period_change_refused_while_collecting() {
    let (_sim, mut device) = open_go_link();
    device.start_measurements().unwrap();

    let err = device.set_measurement_period(0.05, TEST_TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        GoError::ErrorResponse { cmd: 0x1B, status } if status == u8::from(CmdStatus::CannotChangePeriodWhileCollecting)
    ));

    device.stop_measurements().unwrap();
    device.set_measurement_period(0.05, TEST_TIMEOUT).unwrap();
}
