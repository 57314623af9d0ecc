use crate::config::UsbConfig;
use crate::constants::PACKET_SIZE;
use crate::discovery::{DeviceLocation, find_device};
use crate::error::{GoError, Result};
use nusb::Interface;
use nusb::transfer::{ControlOut, ControlType, Queue, Recipient, RequestBuffer};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, info, trace};

/// Byte-oriented duplex channel to one device.
///
/// Methods take `&self` so the receiver thread can read while a caller
/// writes; implementations synchronise internally.
pub trait Transport: Send + Sync {
    /// Wait up to `timeout` for input. Returns false if nothing arrived.
    fn poll_readable(&self, timeout: Duration) -> Result<bool>;

    /// Read one packet worth of input into `buf`, returning the byte count.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, buf: &[u8]) -> Result<usize>;

    fn close(&self) -> Result<()>;

    fn location(&self) -> &str;

    /// Discard input already buffered. Returns the number of reads discarded.
    fn flush_input(&self) -> Result<usize> {
        let mut discarded = 0;
        let mut buf = [0u8; PACKET_SIZE];
        while self.poll_readable(Duration::ZERO)? {
            self.read(&mut buf)?;
            discarded += 1;
        }
        Ok(discarded)
    }
}

const HID_SET_REPORT: u8 = 0x09;
const HID_OUTPUT_REPORT: u16 = 0x0200;

struct UsbReader {
    queue: Queue<RequestBuffer>,
    runtime: Runtime,
    completed: VecDeque<Vec<u8>>,
}

/// HID transport over `nusb`: input reports on an interrupt IN queue,
/// output reports through SET_REPORT control transfers.
pub struct UsbTransport {
    location: String,
    interface: Interface,
    config: UsbConfig,
    reader: Mutex<UsbReader>,
    writer: Mutex<Runtime>,
    closed: AtomicBool,
}

fn io_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_time().build()?)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UsbTransport {
    pub fn open(location: &DeviceLocation, config: &UsbConfig) -> Result<Self> {
        let info = find_device(location)?;
        let device = info.open().map_err(|e| busy_or_io(e, &location.location))?;

        if config.reset_on_open {
            info!("Performing USB device reset...");
            device.reset()?;
            std::thread::sleep(Duration::from_millis(50));
        }

        let interface = device
            .detach_and_claim_interface(config.interface)
            .map_err(|e| busy_or_io(e, &location.location))?;
        info!(location = %location.location, "Interface claimed successfully.");

        let mut queue = interface.interrupt_in_queue(config.endpoint_in);
        for _ in 0..config.queue_depth.max(1) {
            queue.submit(RequestBuffer::new(PACKET_SIZE));
        }

        Ok(Self {
            location: location.location.clone(),
            interface,
            config: config.clone(),
            reader: Mutex::new(UsbReader {
                queue,
                runtime: io_runtime()?,
                completed: VecDeque::new(),
            }),
            writer: Mutex::new(io_runtime()?),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GoError::Transport(format!("{} is closed", self.location)));
        }
        Ok(())
    }
}

fn busy_or_io(err: io::Error, location: &str) -> GoError {
    if err.kind() == io::ErrorKind::ResourceBusy {
        GoError::DeviceBusy(location.to_string())
    } else {
        GoError::Io(err)
    }
}

impl Transport for UsbTransport {
    fn poll_readable(&self, wait: Duration) -> Result<bool> {
        self.ensure_open()?;
        let mut reader = lock(&self.reader);
        if !reader.completed.is_empty() {
            return Ok(true);
        }

        let UsbReader { queue, runtime, completed } = &mut *reader;
        if queue.pending() == 0 {
            queue.submit(RequestBuffer::new(PACKET_SIZE));
        }
        let completion = match runtime.block_on(async { timeout(wait, queue.next_complete()).await }) {
            Ok(completion) => completion,
            Err(_) => return Ok(false),
        };

        let status = completion.status;
        let data = completion.data;
        queue.submit(RequestBuffer::new(PACKET_SIZE));
        status?;

        trace!(bytes = hex::encode(&data), "Input report");
        completed.push_back(data);
        Ok(true)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let mut reader = lock(&self.reader);
        match reader.completed.pop_front() {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let runtime = lock(&self.writer);
        let transfer = self.interface.control_out(ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request: HID_SET_REPORT,
            value: HID_OUTPUT_REPORT,
            index: self.config.interface as u16,
            data: buf,
        });
        let completion = runtime
            .block_on(async { timeout(self.config.write_timeout, transfer).await })
            .map_err(|_| GoError::Transport(format!("write to {} timed out", self.location)))?;
        let sent = completion.into_result()?;
        debug!(bytes = hex::encode(buf), "Sent {} bytes", sent.actual_length());
        Ok(sent.actual_length())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            lock(&self.reader).queue.cancel_all();
            info!(location = %self.location, "USB transport closed");
        }
        Ok(())
    }

    fn location(&self) -> &str {
        &self.location
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
