//! Tests for raw measurement retrieval

mod common;

use common::*;
use goio_lib::ProbeType;

#[test]
fn test_read_all_in_order() {
    let (sim, mut device) = open_go_link();
    sim.push_measurements(&[10, 20, 30, 40, 50, 60, 70]);
    assert!(wait_until(Duration::from_secs(1), || device.session().measurement_packets_available().0 == 3));

    assert_eq!(device.read_raw_measurements(None).unwrap(), vec![10, 20, 30, 40, 50, 60, 70]);
    assert!(device.read_raw_measurements(None).unwrap().is_empty());
}

#[test]
fn test_partial_packet_carried_over() {
    let (sim, mut device) = open_go_link();
    sim.push_measurements(&[1, 2, 3, 4, 5, 6]);
    assert!(wait_until(Duration::from_secs(1), || device.measurements_available() == 6));

    assert_eq!(device.read_raw_measurements(Some(4)).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(device.measurements_available(), 2);
    assert_eq!(device.read_raw_measurements(Some(10)).unwrap(), vec![5, 6]);
    assert_eq!(device.measurements_available(), 0);
}

#[test]
fn test_latest_measurement() {
    let (sim, mut device) = open_go_link();
    assert_eq!(device.get_latest_raw_measurement().unwrap(), 0);

    sim.push_measurements(&[-5, -6, -7, 1234]);
    assert!(wait_until(Duration::from_secs(1), || device.session().measurement_packets_available().0 == 2));

    assert_eq!(device.get_latest_raw_measurement().unwrap(), 1234);
    assert_eq!(device.measurements_available(), 0);
    // no new data: keep reporting the last value seen
    assert_eq!(device.get_latest_raw_measurement().unwrap(), 1234);
}

#[test]
fn test_streaming_consumer_sees_every_sample() {
    let (sim, mut device) = open_go_link();
    device.start_measurements().unwrap();

    let producer = sim.clone();
    let handle = std::thread::spawn(move || {
        for chunk in (0..900i16).collect::<Vec<_>>().chunks(30) {
            producer.push_measurements(chunk);
            std::thread::sleep(Duration::from_millis(1));
        }
    });

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 900 && Instant::now() < deadline {
        seen.extend(device.read_raw_measurements(Some(17)).unwrap());
    }
    handle.join().unwrap();

    assert_eq!(seen, (0..900).collect::<Vec<i32>>());
    device.stop_measurements().unwrap();
}

#[test]
fn test_voltage_conversion_with_calibration() {
    let (_sim, mut device) = open_go_link();

    let nominal = device.convert_to_voltage(2048, ProbeType::Analog5V, true);
    assert!((nominal - 2.5).abs() < 1e-9);
    assert_eq!(device.convert_voltage_to_raw(2.5, ProbeType::Analog5V), 2048);

    let mut record = goio_lib::flash::SkipFlashRecord::default();
    record.calibration_5v.slope = 2.0;
    record.calibration_5v.intercept = 0.5;
    device.set_flash_record(record);

    let calibrated = device.convert_to_voltage(2048, ProbeType::Analog5V, true);
    assert!((calibrated - 5.5).abs() < 1e-6);
    let raw = device.convert_to_voltage(2048, ProbeType::Analog5V, false);
    assert!((raw - 2.5).abs() < 1e-9);
}
