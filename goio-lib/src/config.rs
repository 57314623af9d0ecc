use crate::constants::*;
use crate::packet::WireFormat;
use std::time::Duration;

/// Tuning for one open session: queues, receiver loop and response polling.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub ring_capacity: usize,
    pub poll_interval: Duration,
    pub short_read_log_limit: u32,
    pub short_read_backoff: Duration,
    pub response_poll_interval: Duration,
    pub lock_timeout: Duration,
    /// Discard input already buffered by the OS before the receiver starts
    pub flush_on_open: bool,
    pub wire_format: WireFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            short_read_log_limit: DEFAULT_SHORT_READ_LOG_LIMIT,
            short_read_backoff: DEFAULT_SHORT_READ_BACKOFF,
            response_poll_interval: DEFAULT_RESPONSE_POLL_INTERVAL,
            lock_timeout: Duration::from_millis(1000),
            flush_on_open: true,
            wire_format: WireFormat::SKIP,
        }
    }
}

impl SessionConfig {
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_response_poll_interval(mut self, interval: Duration) -> Self {
        self.response_poll_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_flush_on_open(mut self, flush: bool) -> Self {
        self.flush_on_open = flush;
        self
    }

    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }
}

/// USB specifics for [`crate::transport::UsbTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct UsbConfig {
    pub interface: u8,
    /// Interrupt IN endpoint carrying input reports
    pub endpoint_in: u8,
    pub reset_on_open: bool,
    /// Interrupt IN transfers kept in flight
    pub queue_depth: usize,
    pub write_timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            interface: 0,
            endpoint_in: 0x81,
            reset_on_open: true,
            queue_depth: 4,
            write_timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceConfig {
    pub session: SessionConfig,
    pub usb: UsbConfig,
    /// Send INIT right after the session opens
    pub init_on_open: bool,
    /// Run the full sensor open sequence (INIT, sensor id, DDS record,
    /// input channel) right after the session opens
    pub open_sensor: bool,
    /// Refuse DDS records whose checksum does not match
    pub strict_dds_validation: bool,
}

impl DeviceConfig {
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_init_on_open(mut self, init: bool) -> Self {
        self.init_on_open = init;
        self
    }

    pub fn with_open_sensor(mut self, open: bool) -> Self {
        self.open_sensor = open;
        self
    }

    pub fn with_strict_dds_validation(mut self, strict: bool) -> Self {
        self.strict_dds_validation = strict;
        self
    }
}
