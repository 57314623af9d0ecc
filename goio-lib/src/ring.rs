//! Fixed-capacity packet queues shared between the receiver thread and callers.

use crate::packet::Packet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Circular FIFO of packets that drops the oldest entry when full.
///
/// One slot is kept free to tell full from empty, so at most
/// `capacity - 1` packets are held.
#[derive(Debug)]
pub struct PacketRing {
    label: &'static str,
    slots: Box<[Packet]>,
    first: usize,
    next: usize,
    dropped: u64,
    total_pushed: u64,
    overflowing: bool,
}

impl PacketRing {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            label,
            slots: vec![Packet::default(); capacity].into_boxed_slice(),
            first: 0,
            next: 0,
            dropped: 0,
            total_pushed: 0,
            overflowing: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        let capacity = self.capacity();
        (self.next + capacity - self.first) % capacity
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.next
    }

    pub fn is_full(&self) -> bool {
        self.available() == self.capacity() - 1
    }

    /// Store a packet. Returns true if the oldest packet was discarded to make room.
    pub fn push(&mut self, packet: Packet) -> bool {
        let capacity = self.capacity();
        let dropped = self.is_full();
        if dropped {
            self.first = (self.first + 1) % capacity;
            self.dropped += 1;
            if !self.overflowing {
                warn!(queue = self.label, capacity, "Packet queue full, dropping oldest packets");
                self.overflowing = true;
            }
        }
        self.slots[self.next] = packet;
        self.next = (self.next + 1) % capacity;
        self.total_pushed += 1;
        dropped
    }

    pub fn pop(&mut self) -> Option<Packet> {
        if self.is_empty() {
            return None;
        }
        let packet = self.slots[self.first];
        self.first = (self.first + 1) % self.capacity();
        self.overflowing = false;
        Some(packet)
    }

    /// Copy out up to `max` packets, oldest first, without removing them.
    pub fn snapshot(&self, max: usize) -> Vec<Packet> {
        let count = max.min(self.available());
        (0..count)
            .map(|i| self.slots[(self.first + i) % self.capacity()])
            .collect()
    }

    pub fn clear(&mut self) {
        self.first = 0;
        self.next = 0;
        self.overflowing = false;
    }

    /// Packets discarded by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

#[derive(Debug)]
struct QueueState {
    measurements: PacketRing,
    responses: PacketRing,
    last_measurement_count: u8,
}

/// The measurement and command response rings behind one lock.
///
/// Every accessor takes the lock for the duration of the index update and
/// copy only; it is never held across transport I/O or a sleep.
#[derive(Debug)]
pub struct PacketQueues {
    state: Mutex<QueueState>,
}

impl PacketQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                measurements: PacketRing::new("measurement", capacity),
                responses: PacketRing::new("cmd_response", capacity),
                last_measurement_count: 0,
            }),
        }
    }

    // Poison is ignored: no critical section can leave the indices half-updated.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_measurement(&self, packet: Packet, sample_count: u8) -> bool {
        let mut state = self.lock();
        state.last_measurement_count = sample_count;
        state.measurements.push(packet)
    }

    pub fn push_response(&self, packet: Packet) -> bool {
        self.lock().responses.push(packet)
    }

    pub fn pop_measurements(&self, max: usize) -> Vec<Packet> {
        let mut state = self.lock();
        let count = max.min(state.measurements.available());
        (0..count).filter_map(|_| state.measurements.pop()).collect()
    }

    pub fn pop_responses(&self, max: usize) -> Vec<Packet> {
        let mut state = self.lock();
        let count = max.min(state.responses.available());
        (0..count).filter_map(|_| state.responses.pop()).collect()
    }

    /// Queued measurement packets and the sample count of the newest one received.
    pub fn measurements_available(&self) -> (usize, u8) {
        let state = self.lock();
        (state.measurements.available(), state.last_measurement_count)
    }

    pub fn responses_available(&self) -> usize {
        self.lock().responses.available()
    }

    pub fn clear_measurements(&self) {
        let mut state = self.lock();
        state.measurements.clear();
        state.last_measurement_count = 0;
    }

    pub fn clear_responses(&self) {
        self.lock().responses.clear();
    }

    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.measurements.clear();
        state.responses.clear();
        state.last_measurement_count = 0;
    }

    /// Overflow drops as (measurement, cmd_response)
    pub fn dropped(&self) -> (u64, u64) {
        let state = self.lock();
        (state.measurements.dropped(), state.responses.dropped())
    }

    pub fn capacity(&self) -> usize {
        self.lock().measurements.capacity()
    }
}
