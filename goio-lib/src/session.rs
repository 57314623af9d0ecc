use crate::config::{SessionConfig, UsbConfig};
use crate::constants::PACKET_SIZE;
use crate::discovery::DeviceLocation;
use crate::error::{GoError, Result};
use crate::lifecycle::{DeviceLifecycle, LifecycleGuard, LocalLifecycle};
use crate::packet::{Packet, WireFormat};
use crate::receiver::{Receiver, ReceiverCounters, ReceiverStats};
use crate::ring::PacketQueues;
use crate::transport::{Transport, UsbTransport};
use std::sync::Arc;
use tracing::{debug, info};

/// One open device: the transport, both packet queues and the receiver
/// thread feeding them.
pub struct Session {
    transport: Arc<dyn Transport>,
    queues: Arc<PacketQueues>,
    receiver: Option<Receiver>,
    counters: Arc<ReceiverCounters>,
    lifecycle: Arc<dyn DeviceLifecycle>,
    config: SessionConfig,
}

impl Session {
    /// Open the USB device at `location` and start receiving.
    pub fn open_usb(location: &DeviceLocation, usb: &UsbConfig, config: SessionConfig) -> Result<Self> {
        config.wire_format.validate()?;
        let lifecycle: Arc<dyn DeviceLifecycle> = Arc::new(LocalLifecycle::new());
        // Lock before the transport exists so a retiring device is never claimed.
        let held = Arc::clone(&lifecycle);
        let _guard = LifecycleGuard::acquire(held.as_ref(), config.lock_timeout)?;
        let transport = Arc::new(UsbTransport::open(location, usb)?);
        Self::open_with_lifecycle(transport, lifecycle, config)
    }

    pub fn open(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        Self::open_with_lifecycle(transport, Arc::new(LocalLifecycle::new()), config)
    }

    pub fn open_with_lifecycle(
        transport: Arc<dyn Transport>,
        lifecycle: Arc<dyn DeviceLifecycle>,
        config: SessionConfig,
    ) -> Result<Self> {
        if let Err(e) = config.wire_format.validate() {
            let _ = transport.close();
            return Err(e);
        }
        let held = Arc::clone(&lifecycle);
        let _guard = LifecycleGuard::acquire(held.as_ref(), config.lock_timeout)?;

        if config.flush_on_open {
            let discarded = transport.flush_input()?;
            if discarded > 0 {
                debug!(discarded, "Flushed stale input");
            }
        }

        let queues = Arc::new(PacketQueues::new(config.ring_capacity));
        let receiver = Receiver::spawn(Arc::clone(&transport), Arc::clone(&queues), &config)?;
        let counters = receiver.counters();
        info!(
            location = transport.location(),
            capacity = config.ring_capacity,
            "Session opened"
        );

        Ok(Self {
            transport,
            queues,
            receiver: Some(receiver),
            counters,
            lifecycle,
            config,
        })
    }

    /// Stop the receiver, then close the transport. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut receiver) = self.receiver.take() else {
            return Ok(());
        };
        receiver.stop();
        self.queues.clear_all();
        self.transport.close()?;
        info!(location = self.transport.location(), "Session closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn location(&self) -> &str {
        self.transport.location()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn wire_format(&self) -> WireFormat {
        self.config.wire_format
    }

    pub fn lifecycle(&self) -> &Arc<dyn DeviceLifecycle> {
        &self.lifecycle
    }

    fn guard(&self) -> Result<LifecycleGuard<'_>> {
        if !self.is_open() {
            return Err(GoError::DeviceUnavailable(format!("session on {} is closed", self.location())));
        }
        LifecycleGuard::acquire(self.lifecycle.as_ref(), self.config.lock_timeout)
    }

    /// Pop up to `max_count` measurement packets without blocking.
    pub fn read_measurement_packets(&self, max_count: usize) -> Result<Vec<Packet>> {
        let _guard = self.guard()?;
        Ok(self.queues.pop_measurements(max_count))
    }

    /// Pop up to `max_count` command response packets without blocking.
    pub fn read_cmd_response_packets(&self, max_count: usize) -> Result<Vec<Packet>> {
        let _guard = self.guard()?;
        Ok(self.queues.pop_responses(max_count))
    }

    pub fn write_cmd_packet(&self, packet: &Packet) -> Result<()> {
        let _guard = self.guard()?;
        let written = self.transport.write(packet.as_bytes())?;
        if written != PACKET_SIZE {
            return Err(GoError::Transport(format!(
                "short write: {} of {} bytes",
                written, PACKET_SIZE
            )));
        }
        Ok(())
    }

    /// Queued measurement packets and the sample count of the newest one.
    pub fn measurement_packets_available(&self) -> (usize, u8) {
        self.queues.measurements_available()
    }

    pub fn cmd_response_packets_available(&self) -> usize {
        self.queues.responses_available()
    }

    pub fn clear_measurement_queue(&self) {
        self.queues.clear_measurements();
    }

    pub fn clear_cmd_response_queue(&self) {
        self.queues.clear_responses();
    }

    pub fn clear_all(&self) {
        self.queues.clear_all();
    }

    /// Receiver counters; still readable after `close`.
    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot(&self.queues)
    }

    pub fn receiver_running(&self) -> bool {
        self.receiver.as_ref().is_some_and(Receiver::is_running)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
