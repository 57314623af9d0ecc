//! Background loop moving packets from the transport into the queues.

use crate::cancel::CancelFlag;
use crate::config::SessionConfig;
use crate::constants::PACKET_SIZE;
use crate::error::Result;
use crate::packet::{Packet, WireFormat};
use crate::ring::PacketQueues;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
pub(crate) struct ReceiverCounters {
    measurement_packets: AtomicU64,
    response_packets: AtomicU64,
    short_reads: AtomicU64,
    read_errors: AtomicU64,
    malformed_packets: AtomicU64,
    counter_gaps: AtomicU64,
}

/// Counters kept by the receiver for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiverStats {
    pub measurement_packets: u64,
    pub response_packets: u64,
    pub short_reads: u64,
    pub read_errors: u64,
    pub malformed_packets: u64,
    /// Measurement packets whose rolling counter skipped ahead
    pub counter_gaps: u64,
    pub measurement_overflow_drops: u64,
    pub response_overflow_drops: u64,
}

impl ReceiverCounters {
    pub(crate) fn snapshot(&self, queues: &PacketQueues) -> ReceiverStats {
        let (measurement_overflow_drops, response_overflow_drops) = queues.dropped();
        ReceiverStats {
            measurement_packets: self.measurement_packets.load(Ordering::Acquire),
            response_packets: self.response_packets.load(Ordering::Acquire),
            short_reads: self.short_reads.load(Ordering::Acquire),
            read_errors: self.read_errors.load(Ordering::Acquire),
            malformed_packets: self.malformed_packets.load(Ordering::Acquire),
            counter_gaps: self.counter_gaps.load(Ordering::Acquire),
            measurement_overflow_drops,
            response_overflow_drops,
        }
    }
}

/// Handle to the running receiver thread. Stopping joins the thread.
pub(crate) struct Receiver {
    stop: CancelFlag,
    handle: Option<JoinHandle<()>>,
    counters: Arc<ReceiverCounters>,
}

impl Receiver {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        queues: Arc<PacketQueues>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let stop = CancelFlag::new();
        let counters = Arc::new(ReceiverCounters::default());
        let mut worker = Worker {
            transport,
            queues,
            counters: Arc::clone(&counters),
            stop: stop.clone(),
            wire: config.wire_format,
            poll_interval: config.poll_interval,
            backoff: config.short_read_backoff,
            log_limit: config.short_read_log_limit,
            last_counter: None,
        };

        let handle = thread::Builder::new()
            .name("goio-receiver".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            stop,
            handle: Some(handle),
            counters,
        })
    }

    pub(crate) fn counters(&self) -> Arc<ReceiverCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Receiver thread panicked");
            }
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    transport: Arc<dyn Transport>,
    queues: Arc<PacketQueues>,
    counters: Arc<ReceiverCounters>,
    stop: CancelFlag,
    wire: WireFormat,
    poll_interval: Duration,
    backoff: Duration,
    log_limit: u32,
    last_counter: Option<u8>,
}

impl Worker {
    fn run(&mut self) {
        info!(location = self.transport.location(), "Receiver started");
        let mut buf = [0u8; PACKET_SIZE];
        let mut consecutive_failures = 0u32;

        while !self.stop.is_cancelled() {
            match self.transport.poll_readable(self.poll_interval) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    self.counters.read_errors.fetch_add(1, Ordering::Release);
                    consecutive_failures += 1;
                    if consecutive_failures <= self.log_limit {
                        warn!(error = %e, consecutive_failures, "Transport poll failed");
                    }
                    thread::sleep(self.backoff);
                    continue;
                }
            }

            match self.transport.read(&mut buf) {
                Ok(PACKET_SIZE) => {
                    consecutive_failures = 0;
                    self.route(Packet::new(buf));
                }
                Ok(n) => {
                    self.counters.short_reads.fetch_add(1, Ordering::Release);
                    consecutive_failures += 1;
                    if consecutive_failures <= self.log_limit {
                        warn!(bytes = n, expected = PACKET_SIZE, consecutive_failures, "Short packet read");
                    }
                    thread::sleep(self.backoff);
                }
                Err(e) => {
                    self.counters.read_errors.fetch_add(1, Ordering::Release);
                    consecutive_failures += 1;
                    if consecutive_failures <= self.log_limit {
                        warn!(error = %e, consecutive_failures, "Packet read failed");
                    }
                    thread::sleep(self.backoff);
                }
            }
        }
        info!(location = self.transport.location(), "Receiver stopped");
    }

    fn route(&mut self, packet: Packet) {
        if self.wire.is_response(&packet) {
            trace!(bytes = hex::encode(packet.as_bytes()), "Routing command response");
            self.queues.push_response(packet);
            self.counters.response_packets.fetch_add(1, Ordering::Release);
            return;
        }

        let count = self.wire.sample_count(&packet);
        if count > self.wire.max_samples_per_packet {
            self.counters.malformed_packets.fetch_add(1, Ordering::Release);
            warn!(bytes = hex::encode(packet.as_bytes()), "Dropping malformed measurement packet");
            return;
        }

        let counter = self.wire.rolling_counter(&packet).unwrap_or_default();
        if let Some(prev) = self.last_counter {
            let expected = prev.wrapping_add(1);
            if counter != expected {
                self.counters.counter_gaps.fetch_add(1, Ordering::Release);
                warn!(expected, got = counter, "Measurement rolling counter gap");
            }
        }
        self.last_counter = Some(counter);

        if self.queues.push_measurement(packet, count) {
            debug!("Measurement queue overflow");
        }
        self.counters.measurement_packets.fetch_add(1, Ordering::Release);
    }
}
