//! In-process stand-in for a Go! family device.
//!
//! [`SimulatedGoLink`] answers the Skip command set the way firmware does
//! and lets tests inject measurements, short reads, silence and NVM
//! write failures without hardware.

use crate::command::{CmdStatus, SkipCommand};
use crate::constants::{MAX_NVM_READ_CHUNK, PACKET_SIZE};
use crate::error::{GoError, Result};
use crate::packet::{Packet, WireFormat};
use crate::transport::Transport;
use crate::variant::{DeviceVariant, GoLink};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug)]
struct SimState {
    wire: WireFormat,
    inbox: VecDeque<Vec<u8>>,
    local_nvm: Vec<u8>,
    remote_nvm: Option<Vec<u8>>,
    period_ticks: u32,
    measuring: bool,
    led: [u8; 2],
    channel: u8,
    sensor_id: u32,
    serial: [u8; 5],
    rolling_counter: u8,
    written: Vec<Packet>,
    silent: bool,
    fail_write_chunk: Option<(usize, u8)>,
    nvm_write_chunks: usize,
    claimed: bool,
}

#[derive(Debug)]
struct SimShared {
    state: Mutex<SimState>,
    readable: Condvar,
    location: String,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a simulated device. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedGoLink {
    shared: Arc<SimShared>,
}

impl Default for SimulatedGoLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGoLink {
    /// A Go! Link with blank (0xFF) memory.
    pub fn new() -> Self {
        Self::for_variant::<GoLink>()
    }

    /// A device with the memory geometry of `V`.
    pub fn for_variant<V: DeviceVariant>() -> Self {
        let state = SimState {
            wire: V::WIRE_FORMAT,
            inbox: VecDeque::new(),
            local_nvm: vec![0xFF; V::MAX_LOCAL_NV_ADDR as usize + 1],
            remote_nvm: V::MAX_REMOTE_NV_ADDR.map(|max| vec![0xFF; max as usize + 1]),
            period_ticks: 1000,
            measuring: false,
            led: [0xC0, 0],
            channel: 1,
            sensor_id: 0,
            serial: [21, 9, 0x39, 0x30, 0x00],
            rolling_counter: 0,
            written: Vec::new(),
            silent: false,
            fail_write_chunk: None,
            nvm_write_chunks: 0,
            claimed: false,
        };
        Self {
            shared: Arc::new(SimShared {
                state: Mutex::new(state),
                readable: Condvar::new(),
                location: format!("sim:{:04x}:{:04x}", V::VENDOR_ID, V::PRODUCT_ID),
            }),
        }
    }

    /// Claim the device, as opening a real device node would.
    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        let mut state = self.shared.lock();
        if state.claimed {
            return Err(GoError::DeviceBusy(self.shared.location.clone()));
        }
        state.claimed = true;
        Ok(Arc::new(SimTransport {
            shared: Arc::clone(&self.shared),
        }))
    }

    pub fn is_claimed(&self) -> bool {
        self.shared.lock().claimed
    }

    /// Stop answering commands.
    pub fn set_silent(&self, silent: bool) {
        self.shared.lock().silent = silent;
    }

    /// Answer the `chunk`-th NVM write (1-based, counted from now) with an error.
    pub fn fail_nvm_write_chunk(&self, chunk: usize, status: CmdStatus) {
        let mut state = self.shared.lock();
        state.nvm_write_chunks = 0;
        state.fail_write_chunk = Some((chunk, status.into()));
    }

    pub fn set_sensor_id(&self, id: u32) {
        self.shared.lock().sensor_id = id;
    }

    /// Queue measurement packets holding `samples`, three per packet.
    pub fn push_measurements(&self, samples: &[i16]) {
        let mut state = self.shared.lock();
        let per_packet = state.wire.max_samples_per_packet.max(1) as usize;
        for chunk in samples.chunks(per_packet) {
            let counter = state.rolling_counter;
            state.rolling_counter = counter.wrapping_add(1);
            if let Ok(packet) = state.wire.encode_measurement(counter, chunk) {
                state.inbox.push_back(packet.as_bytes().to_vec());
            }
        }
        self.shared.readable.notify_all();
    }

    /// Queue arbitrary input, including reads shorter than a packet.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.shared.lock().inbox.push_back(bytes.to_vec());
        self.shared.readable.notify_all();
    }

    pub fn push_packet(&self, packet: Packet) {
        self.push_raw(packet.as_bytes());
    }

    /// Every packet written by the host, in order.
    pub fn written_packets(&self) -> Vec<Packet> {
        self.shared.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.shared.lock().written.clear();
    }

    pub fn inbox_len(&self) -> usize {
        self.shared.lock().inbox.len()
    }

    pub fn local_memory(&self) -> Vec<u8> {
        self.shared.lock().local_nvm.clone()
    }

    pub fn remote_memory(&self) -> Option<Vec<u8>> {
        self.shared.lock().remote_nvm.clone()
    }

    pub fn write_local_memory(&self, addr: usize, data: &[u8]) {
        let mut state = self.shared.lock();
        state.local_nvm[addr..addr + data.len()].copy_from_slice(data);
    }

    /// Fill sensor memory directly, bypassing the command set.
    pub fn write_remote_memory(&self, addr: usize, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        let memory = state
            .remote_nvm
            .as_mut()
            .ok_or_else(|| GoError::Precondition("simulated device has no remote memory".to_string()))?;
        let target = memory
            .get_mut(addr..addr + data.len())
            .ok_or_else(|| GoError::Precondition(format!("{} bytes at {:#04x} exceed remote memory", data.len(), addr)))?;
        target.copy_from_slice(data);
        Ok(())
    }

    pub fn analog_input_channel(&self) -> u8 {
        self.shared.lock().channel
    }

    pub fn measurement_period_ticks(&self) -> u32 {
        self.shared.lock().period_ticks
    }

    pub fn is_measuring(&self) -> bool {
        self.shared.lock().measuring
    }
}

impl SimState {
    fn respond(&mut self, cmd: u8, result: std::result::Result<Vec<u8>, CmdStatus>) {
        let packet = match result {
            Ok(payload) => self.wire.encode_response(cmd, false, &payload),
            Err(status) => self.wire.encode_response(cmd, true, &[status.into()]),
        };
        if let Ok(packet) = packet {
            self.inbox.push_back(packet.as_bytes().to_vec());
        }
    }

    fn handle(&mut self, cmd: u8, params: &[u8]) -> std::result::Result<Vec<u8>, CmdStatus> {
        let Ok(command) = SkipCommand::try_from(cmd) else {
            return Err(CmdStatus::CmdNotSupported);
        };

        if let Some((local, len)) = command.nv_write_len() {
            self.nvm_write_chunks += 1;
            if let Some((k, status)) = self.fail_write_chunk {
                if k == self.nvm_write_chunks {
                    return Err(CmdStatus::from(status));
                }
            }
            let addr = params[0] as usize;
            let memory = self.memory(local)?;
            let end = addr + len;
            if end > memory.len() {
                return Err(CmdStatus::InvalidParameter);
            }
            memory[addr..end].copy_from_slice(&params[1..1 + len]);
            return Ok(Vec::new());
        }

        match command {
            SkipCommand::GetStatus => Ok(vec![0, 1, 2, 1, 0]),
            SkipCommand::Init => {
                self.measuring = false;
                self.inbox.clear();
                Ok(Vec::new())
            }
            SkipCommand::StartMeasurements => {
                self.measuring = true;
                Ok(Vec::new())
            }
            SkipCommand::StopMeasurements => {
                self.measuring = false;
                Ok(Vec::new())
            }
            SkipCommand::SetMeasurementPeriod => {
                if self.measuring {
                    return Err(CmdStatus::CannotChangePeriodWhileCollecting);
                }
                self.period_ticks = u32::from_le_bytes([params[0], params[1], params[2], params[3]]);
                Ok(Vec::new())
            }
            SkipCommand::GetMeasurementPeriod => Ok(self.period_ticks.to_le_bytes().to_vec()),
            SkipCommand::ReadLocalNvMem | SkipCommand::ReadRemoteNvMem => {
                let local = command == SkipCommand::ReadLocalNvMem;
                let (addr, count) = (params[0] as usize, params[1] as usize);
                let memory = self.memory(local)?;
                if count > MAX_NVM_READ_CHUNK || addr + count > memory.len() {
                    return Err(CmdStatus::InvalidParameter);
                }
                Ok(memory[addr..addr + count].to_vec())
            }
            SkipCommand::SetLedState => {
                self.led = [params[0], params[1]];
                Ok(Vec::new())
            }
            SkipCommand::GetLedState => Ok(self.led.to_vec()),
            SkipCommand::GetSerialNumber => Ok(self.serial.to_vec()),
            SkipCommand::GetSensorId => Ok(self.sensor_id.to_le_bytes().to_vec()),
            SkipCommand::SetAnalogInputChannel => {
                if params[0] > 3 {
                    return Err(CmdStatus::InvalidParameter);
                }
                self.channel = params[0];
                Ok(Vec::new())
            }
            SkipCommand::GetAnalogInputChannel => Ok(vec![self.channel]),
            _ => Err(CmdStatus::CmdNotSupported),
        }
    }

    fn memory(&mut self, local: bool) -> std::result::Result<&mut Vec<u8>, CmdStatus> {
        if local {
            Ok(&mut self.local_nvm)
        } else {
            self.remote_nvm.as_mut().ok_or(CmdStatus::CmdNotSupported)
        }
    }
}

struct SimTransport {
    shared: Arc<SimShared>,
}

impl Transport for SimTransport {
    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.inbox.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .shared
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(true)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.lock();
        match state.inbox.pop_front() {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let packet = Packet::try_from(buf)?;
        let mut state = self.shared.lock();
        state.written.push(packet);
        trace!(bytes = hex::encode(buf), "Simulator received command");
        if state.silent {
            return Ok(PACKET_SIZE);
        }
        let cmd = buf[0];
        let result = state.handle(cmd, &buf[1..]);
        state.respond(cmd, result);
        drop(state);
        self.shared.readable.notify_all();
        Ok(PACKET_SIZE)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.claimed {
            state.claimed = false;
            debug!(location = %self.shared.location, "Simulated device released");
        }
        Ok(())
    }

    fn location(&self) -> &str {
        &self.shared.location
    }
}
