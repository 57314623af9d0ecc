//! Tests for the session manager and receiver loop

mod common;

use common::*;
use goio_lib::lifecycle::{DeviceLifecycle, LocalLifecycle};
use std::sync::atomic::{AtomicBool, Ordering};

#[test]
fn test_open_claims_device_and_close_releases() {
    let (sim, mut session) = open_session(SessionConfig::default());
    assert!(session.is_open());
    assert!(session.receiver_running());

    match sim.transport() {
        Err(GoError::DeviceBusy(loc)) => assert!(loc.starts_with("sim:")),
        Err(other) => panic!("Expected DeviceBusy, got: {:?}", other),
        Ok(_) => panic!("Expected DeviceBusy, got a second transport"),
    }

    session.close().unwrap();
    assert!(!session.is_open());
    assert!(!sim.is_claimed());
    assert!(sim.transport().is_ok());
}

#[test]
fn test_close_is_idempotent() {
    let (_sim, mut session) = open_session(SessionConfig::default());
    session.close().unwrap();
    session.close().unwrap();
    assert!(!session.receiver_running());
}

#[test]
fn test_closed_session_refuses_io() {
    let (_sim, mut session) = open_session(SessionConfig::default());
    session.close().unwrap();

    let packet = WireFormat::SKIP.encode_command(0x10, &[]).unwrap();
    assert!(matches!(session.write_cmd_packet(&packet), Err(GoError::DeviceUnavailable(_))));
    assert!(matches!(session.read_measurement_packets(1), Err(GoError::DeviceUnavailable(_))));
}

#[test]
fn test_retired_lifecycle_blocks_open() {
    let sim = SimulatedGoLink::new();
    let lifecycle = Arc::new(LocalLifecycle::new());
    lifecycle.retire();
    assert!(!lifecycle.is_ok_to_use());

    let result = Session::open_with_lifecycle(sim.transport().unwrap(), lifecycle, SessionConfig::default());
    assert!(matches!(result, Err(GoError::DeviceUnavailable(_))));
}

#[test]
fn test_open_with_lifecycle_keeps_it_usable() {
    init_tracing();
    let sim = SimulatedGoLink::new();
    let lifecycle = Arc::new(LocalLifecycle::new());
    let shared: Arc<dyn DeviceLifecycle> = lifecycle.clone();

    let session = Session::open_with_lifecycle(sim.transport().unwrap(), shared, SessionConfig::default()).unwrap();
    assert!(session.lifecycle().is_ok_to_use());
    // the open-time guard is gone: another thread can take the lock
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                lifecycle.lock_device(Duration::ZERO).unwrap();
                lifecycle.unlock_device();
            })
            .join()
            .unwrap();
    });
    assert_eq!(Arc::strong_count(&lifecycle), 2);

    lifecycle.retire();
    let packet = WireFormat::SKIP.encode_command(0x10, &[]).unwrap();
    assert!(matches!(session.write_cmd_packet(&packet), Err(GoError::DeviceUnavailable(_))));
}

#[test]
fn test_open_rejects_layout_outside_packet() {
    init_tracing();
    let sim = SimulatedGoLink::new();
    let wire = WireFormat {
        rolling_counter_offset: PACKET_SIZE,
        ..WireFormat::SKIP
    };

    let result = Session::open(sim.transport().unwrap(), SessionConfig::default().with_wire_format(wire));
    assert!(matches!(result, Err(GoError::Precondition(_))));
    assert!(!sim.is_claimed());
}

#[test]
fn test_stats_survive_close() {
    let (sim, mut session) = open_session(SessionConfig::default());
    sim.push_measurements(&[1, 2, 3, 4]);
    sim.push_packet(WireFormat::SKIP.encode_response(0x10, false, &[]).unwrap());
    assert!(wait_until(Duration::from_secs(1), || session.stats().response_packets == 1));
    assert!(wait_until(Duration::from_secs(1), || session.stats().measurement_packets == 2));

    session.close().unwrap();
    let stats = session.stats();
    assert_eq!(stats.measurement_packets, 2);
    assert_eq!(stats.response_packets, 1);
}

#[test]
fn test_packets_routed_by_type() {
    let (sim, session) = open_session(SessionConfig::default());

    sim.push_measurements(&[1, 2, 3, 4]);
    sim.push_packet(WireFormat::SKIP.encode_response(0x10, false, &[0, 1, 2]).unwrap());

    assert!(wait_until(Duration::from_secs(1), || {
        session.measurement_packets_available().0 == 2 && session.cmd_response_packets_available() == 1
    }));
    // the newest packet carried a single sample
    assert_eq!(session.measurement_packets_available(), (2, 1));

    let responses = session.read_cmd_response_packets(10).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].as_bytes()[1], 0x10);

    let measurements = session.read_measurement_packets(10).unwrap();
    assert_eq!(measurements.len(), 2);
    assert_eq!(WireFormat::SKIP.sample_count(&measurements[0]), 3);
    assert!(session.read_measurement_packets(10).unwrap().is_empty());
}

#[test]
fn test_short_reads_do_not_stop_receiver() {
    let (sim, session) = open_session(SessionConfig::default());

    for _ in 0..10 {
        sim.push_raw(&[0x01, 0x02, 0x03]);
    }
    sim.push_measurements(&[42]);

    assert!(wait_until(Duration::from_secs(1), || session.measurement_packets_available().0 == 1));
    assert!(session.receiver_running());
    let stats = session.stats();
    assert_eq!(stats.short_reads, 10);
    assert_eq!(stats.measurement_packets, 1);
}

#[test]
fn test_malformed_and_gap_counters() {
    let (sim, session) = open_session(SessionConfig::default());

    sim.push_measurements(&[1, 2, 3, 4, 5, 6]);
    sim.push_packet(WireFormat::SKIP.encode_measurement(9, &[7]).unwrap());
    sim.push_raw(&[0x07, 0, 0, 0, 0, 0, 0, 0]);

    assert!(wait_until(Duration::from_secs(1), || session.stats().malformed_packets == 1));
    let stats = session.stats();
    assert_eq!(stats.measurement_packets, 3);
    assert_eq!(stats.counter_gaps, 1);
    assert_eq!(session.measurement_packets_available().0, 3);

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"counter_gaps\":1"));
}

#[test]
fn test_stale_input_flushed_on_open() {
    init_tracing();
    let sim = SimulatedGoLink::new();
    sim.push_measurements(&[1, 2, 3]);
    sim.push_packet(WireFormat::SKIP.encode_response(0x18, false, &[]).unwrap());

    let session = Session::open(sim.transport().unwrap(), SessionConfig::default()).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(sim.inbox_len(), 0);
    assert_eq!(session.measurement_packets_available().0, 0);
    assert_eq!(session.cmd_response_packets_available(), 0);
}

#[test]
fn test_clear_operations() {
    let (sim, session) = open_session(SessionConfig::default());
    sim.push_measurements(&[1, 2, 3, 4, 5, 6]);
    sim.push_packet(WireFormat::SKIP.encode_response(0x10, false, &[]).unwrap());
    assert!(wait_until(Duration::from_secs(1), || {
        session.measurement_packets_available().0 == 2 && session.cmd_response_packets_available() == 1
    }));

    session.clear_measurement_queue();
    assert_eq!(session.measurement_packets_available(), (0, 0));
    assert_eq!(session.cmd_response_packets_available(), 1);

    session.clear_cmd_response_queue();
    assert_eq!(session.cmd_response_packets_available(), 0);

    sim.push_measurements(&[1]);
    assert!(wait_until(Duration::from_secs(1), || session.measurement_packets_available().0 == 1));
    session.clear_all();
    assert_eq!(session.measurement_packets_available(), (0, 0));
}

#[test]
fn test_concurrent_producer_consumer() {
    const PACKETS: usize = 2000;
    const CAPACITY: usize = 64;

    let config = SessionConfig::default().with_ring_capacity(CAPACITY);
    let (sim, session) = open_session(config);
    let producer_done = AtomicBool::new(false);
    let wire = WireFormat::SKIP;

    let mut received = 0usize;
    let mut last_first_sample: Option<i16> = None;

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..PACKETS {
                let base = (i * 3) as i16;
                sim.push_measurements(&[base, base + 1, base + 2]);
            }
            producer_done.store(true, Ordering::Release);
        });

        loop {
            let (available, _) = session.measurement_packets_available();
            assert!(available < CAPACITY);

            let batch = session.read_measurement_packets(16).unwrap();
            for packet in &batch {
                let frame = wire.decode_measurement(packet).unwrap();
                // a torn packet would break the per-packet pattern
                assert_eq!(frame.samples.len(), 3);
                let first = frame.samples[0];
                assert_eq!(frame.samples[1], first + 1);
                assert_eq!(frame.samples[2], first + 2);
                if let Some(prev) = last_first_sample {
                    assert!(first > prev, "FIFO order violated: {} after {}", first, prev);
                }
                last_first_sample = Some(first);
                received += 1;
            }

            let routed = session.stats().measurement_packets as usize;
            if producer_done.load(Ordering::Acquire) && routed == PACKETS && batch.is_empty() {
                break;
            }
        }
    });

    let stats = session.stats();
    assert_eq!(received as u64 + stats.measurement_overflow_drops, PACKETS as u64);
    assert_eq!(stats.counter_gaps, 0);
}
