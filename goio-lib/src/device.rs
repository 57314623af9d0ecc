use crate::cancel::CancelFlag;
use crate::command::{
    AnalogInputChannel, CmdResponseStatus, CmdStatus, DeviceStatus, GetStatusPayload, LedColor, LedStateParams,
    MAX_LED_BRIGHTNESS, MeasurementPeriodParams, NvReadParams, SerialNumber, SerialNumberPayload, SkipCommand,
};
use crate::config::DeviceConfig;
use crate::constants::{
    DEFAULT_TIMEOUT, DIAGNOSTIC_RING_CAPACITY, HOST_IO_STATUS_TIMED_OUT, MAX_LOCAL_NVM_WRITE_CHUNK, MAX_NVM_READ_CHUNK,
    MAX_REMOTE_NVM_WRITE_CHUNK, READ_DDS_TIMEOUT,
};
use crate::dds::{DDS_RECORD_ADDR, DDS_RECORD_SIZE, FIRST_SMART_SENSOR_ID, SensorDdsRecord};
use crate::discovery::DeviceLocation;
use crate::error::{GoError, Result};
use crate::flash::{FLASH_RECORD_ADDR, FLASH_RECORD_SIZE, SkipFlashRecord};
use crate::measurement::SampleReader;
use crate::packet::{Packet, ResponseFrame};
use crate::ring::PacketRing;
use crate::session::Session;
use crate::transport::Transport;
use crate::variant::{DeviceVariant, ProbeType};
use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};

// Slack for float division when converting period limits to ticks
const TICK_EPSILON: f64 = 1e-9;

fn ticks_per_second<V: DeviceVariant>() -> f64 {
    (1.0 / V::TICK_SECONDS).round()
}

/// Quantize a period to whole device ticks within the variant's legal range.
pub fn period_to_ticks<V: DeviceVariant>(period_seconds: f64) -> u32 {
    let min_ticks = (V::MIN_PERIOD_SECONDS / V::TICK_SECONDS - TICK_EPSILON).ceil();
    let max_ticks = (V::MAX_PERIOD_SECONDS / V::TICK_SECONDS + TICK_EPSILON).floor();
    let ticks = (period_seconds / V::TICK_SECONDS).round();
    if ticks.is_nan() {
        return min_ticks as u32;
    }
    ticks.clamp(min_ticks, max_ticks) as u32
}

pub fn ticks_to_period<V: DeviceVariant>(ticks: u32) -> f64 {
    ticks as f64 / ticks_per_second::<V>()
}

/// Nearest period the device can actually run at.
pub fn nearest_legal_period<V: DeviceVariant>(period_seconds: f64) -> f64 {
    ticks_to_period::<V>(period_to_ticks::<V>(period_seconds))
}

fn is_cancelled(cancel: Option<&CancelFlag>) -> bool {
    cancel.is_some_and(CancelFlag::is_cancelled)
}

#[derive(Debug)]
struct Diagnostics {
    output: PacketRing,
    input: PacketRing,
}

/// Protocol engine for one open Go! family device.
///
/// Commands are answered strictly in send order and no request id is
/// carried, so only one command may be in flight at a time. The `&mut self`
/// receivers enforce that within one handle.
pub struct GoDevice<V: DeviceVariant> {
    session: Session,
    samples: SampleReader,
    status: CmdResponseStatus,
    is_measuring: bool,
    host_io_status: u32,
    default_timeout: Duration,
    diagnostics_enabled: bool,
    diagnostics: Option<Diagnostics>,
    flash_record: Option<SkipFlashRecord>,
    dds_record: Option<SensorDdsRecord>,
    probe_type: ProbeType,
    _variant: PhantomData<V>,
}

impl<V: DeviceVariant> GoDevice<V> {
    /// Open the USB device at `location`.
    pub fn open(location: &DeviceLocation, config: DeviceConfig) -> Result<Self> {
        if location.vendor_id != V::VENDOR_ID || location.product_id != V::PRODUCT_ID {
            return Err(GoError::Precondition(format!(
                "{} is {:04x}:{:04x}, not a {}",
                location.location,
                location.vendor_id,
                location.product_id,
                V::NAME
            )));
        }
        info!(location = %location.location, "Opening {}", V::NAME);
        let session_config = config.session.clone().with_wire_format(V::WIRE_FORMAT);
        let session = Session::open_usb(location, &config.usb, session_config)?;
        Self::from_session(session, &config)
    }

    /// Open over an already-acquired transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: DeviceConfig) -> Result<Self> {
        let session_config = config.session.clone().with_wire_format(V::WIRE_FORMAT);
        let session = Session::open(transport, session_config)?;
        Self::from_session(session, &config)
    }

    pub fn from_session(session: Session, config: &DeviceConfig) -> Result<Self> {
        let mut device = Self {
            samples: SampleReader::new(session.wire_format()),
            session,
            status: CmdResponseStatus::default(),
            is_measuring: false,
            host_io_status: 0,
            default_timeout: DEFAULT_TIMEOUT,
            diagnostics_enabled: false,
            diagnostics: None,
            flash_record: None,
            dds_record: None,
            probe_type: ProbeType::default(),
            _variant: PhantomData,
        };
        if config.open_sensor {
            device.open_sensor(config.strict_dds_validation, READ_DDS_TIMEOUT)?;
        } else if config.init_on_open {
            device.init()?;
        }
        Ok(device)
    }

    pub fn close(&mut self) -> Result<()> {
        self.is_measuring = false;
        self.samples.clear();
        self.session.close()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Send one command packet without waiting for its response.
    pub fn send_cmd(&mut self, cmd: u8, params: &[u8]) -> Result<()> {
        let packet = self.session.wire_format().encode_command(cmd, params)?;
        debug!(cmd = format_args!("{:#04x}", cmd), bytes = hex::encode(packet.as_bytes()), "Sending command");
        self.record_diagnostic(packet, true);
        self.session.write_cmd_packet(&packet)
    }

    /// Wait for the next command response.
    ///
    /// Polls the response queue until a packet arrives, `timeout` elapses or
    /// `cancel` is raised. Status fields change only when a response is decoded.
    pub fn get_next_response(&mut self, timeout: Duration, cancel: Option<&CancelFlag>) -> Result<ResponseFrame> {
        let poll = self.session.config().response_poll_interval;
        let start = Instant::now();
        loop {
            if is_cancelled(cancel) {
                return Err(GoError::Cancelled);
            }
            if let Some(packet) = self.session.read_cmd_response_packets(1)?.pop() {
                self.record_diagnostic(packet, false);
                let frame = self.session.wire_format().decode_response(&packet)?;
                debug!(
                    cmd = format_args!("{:#04x}", frame.cmd_echo),
                    error = frame.is_error,
                    bytes = hex::encode(packet.as_bytes()),
                    "Received response"
                );
                if frame.is_error {
                    let status = frame.status();
                    self.status.last_cmd_status = status;
                    self.status.last_cmd_with_error_response_sent_over_the_wire = frame.cmd_echo;
                    self.status.last_error_sent_over_the_wire = status;
                } else {
                    self.status.last_cmd_status = CmdStatus::Success.into();
                }
                return Ok(frame);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(GoError::Timeout {
                    cmd: self.status.last_cmd,
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            thread::sleep(poll.min(timeout - elapsed));
        }
    }

    /// Send `cmd` and wait for its answer, returning the response payload.
    pub fn send_cmd_and_get_response(
        &mut self,
        cmd: u8,
        params: &[u8],
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<Bytes> {
        let command = SkipCommand::try_from(cmd).ok();
        if command == Some(SkipCommand::StartMeasurements) {
            let (queued, _) = self.session.measurement_packets_available();
            if queued > 0 {
                return Err(GoError::Precondition(format!(
                    "{} measurement packets still queued; read or clear them before starting",
                    queued
                )));
            }
        }

        self.session.clear_cmd_response_queue();
        self.status.last_cmd = cmd;
        self.send_cmd(cmd, params)?;

        let frame = match self.get_next_response(timeout, cancel) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_timeout() {
                    self.status.last_cmd_status = CmdStatus::ErrorCommunication.into();
                    self.host_io_status |= HOST_IO_STATUS_TIMED_OUT;
                    warn!(cmd = format_args!("{:#04x}", cmd), "No response from device");
                }
                return Err(e);
            }
        };
        self.host_io_status &= !HOST_IO_STATUS_TIMED_OUT;

        if frame.cmd_echo != cmd {
            return Err(GoError::UnexpectedResponse {
                expected: cmd,
                actual: frame.cmd_echo,
            });
        }
        if frame.is_error {
            warn!(
                cmd = format_args!("{:#04x}", cmd),
                status = %CmdStatus::from(frame.status()),
                "Device returned error response"
            );
            return Err(GoError::ErrorResponse {
                cmd,
                status: frame.status(),
            });
        }

        match command {
            Some(SkipCommand::StartMeasurements) => self.is_measuring = true,
            Some(SkipCommand::StopMeasurements) => self.is_measuring = false,
            Some(SkipCommand::Init) => {
                self.is_measuring = false;
                self.session.clear_all();
                self.samples.clear();
            }
            _ => {}
        }
        Ok(frame.payload)
    }

    fn command(&mut self, cmd: SkipCommand, params: &[u8]) -> Result<Bytes> {
        let timeout = self.default_timeout;
        self.send_cmd_and_get_response(cmd.into(), params, timeout, None)
    }

    pub fn get_last_cmd_response_status(&self) -> CmdResponseStatus {
        self.status
    }

    pub fn host_io_status(&self) -> u32 {
        self.host_io_status
    }

    pub fn init(&mut self) -> Result<()> {
        self.command(SkipCommand::Init, &[])?;
        Ok(())
    }

    pub fn get_status(&mut self) -> Result<DeviceStatus> {
        let payload = self.command(SkipCommand::GetStatus, &[])?;
        let (raw, _) = GetStatusPayload::read_from_prefix(&payload)
            .map_err(|_| GoError::InvalidPacket("GET_STATUS response too short".to_string()))?;
        Ok(DeviceStatus::from(raw))
    }

    pub fn start_measurements(&mut self) -> Result<()> {
        self.command(SkipCommand::StartMeasurements, &[])?;
        Ok(())
    }

    pub fn stop_measurements(&mut self) -> Result<()> {
        self.command(SkipCommand::StopMeasurements, &[])?;
        Ok(())
    }

    pub fn are_measurements_enabled(&self) -> bool {
        self.is_measuring
    }

    pub fn get_sensor_id(&mut self) -> Result<u32> {
        let payload = self.command(SkipCommand::GetSensorId, &[])?;
        let (id, _) = U32::read_from_prefix(&payload)
            .map_err(|_| GoError::InvalidPacket("GET_SENSOR_ID response too short".to_string()))?;
        Ok(id.get())
    }

    pub fn set_analog_input_channel(&mut self, channel: AnalogInputChannel) -> Result<()> {
        self.command(SkipCommand::SetAnalogInputChannel, &[channel.into()])?;
        Ok(())
    }

    pub fn get_analog_input_channel(&mut self) -> Result<AnalogInputChannel> {
        let payload = self.command(SkipCommand::GetAnalogInputChannel, &[])?;
        let raw = payload.first().copied().unwrap_or_default();
        AnalogInputChannel::try_from(raw)
            .map_err(|_| GoError::InvalidPacket(format!("unknown analog input channel {}", raw)))
    }

    /// Bring the sensor side up the way a fresh open does.
    ///
    /// Sends INIT, then on devices with a sensor port asks for the sensor
    /// id, reads the DDS record of a smart sensor and selects the input
    /// channel its probe type needs. Devices without a sensor port read
    /// the record from local memory instead. A sensor whose record cannot
    /// be used gets the default record for its id.
    pub fn open_sensor(&mut self, strict: bool, timeout: Duration) -> Result<SensorDdsRecord> {
        self.init()?;

        if V::MAX_REMOTE_NV_ADDR.is_none() {
            let record = self.read_or_default(0, strict, timeout)?;
            self.cache_dds_record(record.clone(), record.probe_type());
            return Ok(record);
        }

        let id = self.get_sensor_id()?;
        let sensor_number = u8::try_from(id).unwrap_or(u8::MAX);
        let record = if id >= FIRST_SMART_SENSOR_ID {
            self.read_or_default(sensor_number, strict, timeout)?
        } else {
            SensorDdsRecord::default_for_sensor(sensor_number)
        };
        let probe = if id == 0 { ProbeType::NoProbe } else { record.probe_type() };
        self.set_analog_input_channel(probe.input_channel())?;
        info!(sensor_id = id, probe = %probe, name = %record.long_name, "Sensor opened");
        self.cache_dds_record(record.clone(), probe);
        Ok(record)
    }

    fn read_or_default(&mut self, sensor_number: u8, strict: bool, timeout: Duration) -> Result<SensorDdsRecord> {
        let bytes = self.read_sensor_dds_memory(DDS_RECORD_ADDR, DDS_RECORD_SIZE, timeout, None)?;
        match SensorDdsRecord::from_bytes(&bytes, strict) {
            Ok(record) => Ok(record),
            Err(e @ GoError::InvalidRecord(_)) => {
                warn!(error = %e, sensor_number, "Unusable DDS record, using defaults");
                Ok(SensorDdsRecord::default_for_sensor(sensor_number))
            }
            Err(e) => Err(e),
        }
    }

    fn cache_dds_record(&mut self, record: SensorDdsRecord, probe: ProbeType) {
        self.probe_type = probe;
        self.dds_record = Some(record);
    }

    /// Probe type of the attached sensor; `NoProbe` until the sensor is opened.
    pub fn get_probe_type(&self) -> ProbeType {
        self.probe_type
    }

    /// Read, validate and cache the sensor's DDS record.
    pub fn read_dds_record(&mut self, strict: bool, timeout: Duration) -> Result<SensorDdsRecord> {
        let bytes = self.read_sensor_dds_memory(DDS_RECORD_ADDR, DDS_RECORD_SIZE, timeout, None)?;
        let record = SensorDdsRecord::from_bytes(&bytes, strict)?;
        self.cache_dds_record(record.clone(), record.probe_type());
        Ok(record)
    }

    /// Write `record` with a fresh checksum to the sensor and cache it.
    pub fn write_dds_record(&mut self, record: &SensorDdsRecord, timeout: Duration) -> Result<()> {
        self.write_sensor_dds_memory(DDS_RECORD_ADDR, &record.to_bytes(), timeout, None)?;
        self.cache_dds_record(record.clone(), record.probe_type());
        Ok(())
    }

    pub fn dds_record(&self) -> Option<&SensorDdsRecord> {
        self.dds_record.as_ref()
    }

    /// Replace the cached record without touching the sensor.
    pub fn set_dds_record(&mut self, record: SensorDdsRecord) {
        let probe = record.probe_type();
        self.cache_dds_record(record, probe);
    }

    pub fn set_led_state(&mut self, color: LedColor, brightness: u8) -> Result<()> {
        if brightness > MAX_LED_BRIGHTNESS {
            return Err(GoError::Precondition(format!(
                "LED brightness {} exceeds {}",
                brightness, MAX_LED_BRIGHTNESS
            )));
        }
        let params = LedStateParams {
            color: color.into(),
            brightness,
        };
        self.command(SkipCommand::SetLedState, params.as_bytes())?;
        Ok(())
    }

    pub fn get_led_state(&mut self) -> Result<(LedColor, u8)> {
        let payload = self.command(SkipCommand::GetLedState, &[])?;
        let (raw, _) = LedStateParams::read_from_prefix(&payload)
            .map_err(|_| GoError::InvalidPacket("GET_LED_STATE response too short".to_string()))?;
        let color = LedColor::try_from(raw.color)
            .map_err(|_| GoError::InvalidPacket(format!("unknown LED color {:#04x}", raw.color)))?;
        Ok((color, raw.brightness))
    }

    pub fn get_serial_number(&mut self) -> Result<SerialNumber> {
        let payload = self.command(SkipCommand::GetSerialNumber, &[])?;
        let (raw, _) = SerialNumberPayload::read_from_prefix(&payload)
            .map_err(|_| GoError::InvalidPacket("GET_SERIAL_NUMBER response too short".to_string()))?;
        Ok(SerialNumber::from(raw))
    }

    fn check_nv_range(&self, local: bool, addr: u32, len: usize) -> Result<()> {
        let max = if local {
            V::MAX_LOCAL_NV_ADDR
        } else {
            V::MAX_REMOTE_NV_ADDR
                .ok_or_else(|| GoError::Precondition(format!("{} has no remote memory", V::NAME)))?
        };
        let region = if local { "local" } else { "remote" };
        if addr > max {
            return Err(GoError::Precondition(format!(
                "{} memory address {:#04x} exceeds max address {:#04x}",
                region, addr, max
            )));
        }
        if len == 0 {
            return Ok(());
        }
        let last = addr as u64 + len as u64 - 1;
        if last > max as u64 {
            return Err(GoError::Precondition(format!(
                "{} memory range {:#04x}..={:#04x} exceeds max address {:#04x}",
                region,
                addr,
                last,
                max
            )));
        }
        Ok(())
    }

    /// Read `len` bytes of non-volatile memory, one response-sized chunk per command.
    ///
    /// The first failed chunk aborts the whole read.
    pub fn read_non_volatile_memory(
        &mut self,
        local: bool,
        addr: u32,
        len: usize,
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<u8>> {
        self.check_nv_range(local, addr, len)?;
        let cmd: u8 = SkipCommand::read_nv_mem(local).into();
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            if is_cancelled(cancel) {
                return Err(GoError::Cancelled);
            }
            let chunk = (len - out.len()).min(MAX_NVM_READ_CHUNK);
            let params = NvReadParams {
                addr: (addr as usize + out.len()) as u8,
                count: chunk as u8,
            };
            let payload = self.send_cmd_and_get_response(cmd, params.as_bytes(), timeout, cancel)?;
            if payload.len() < chunk {
                return Err(GoError::InvalidPacket(format!(
                    "NVM read returned {} bytes, wanted {}",
                    payload.len(),
                    chunk
                )));
            }
            out.extend_from_slice(&payload[..chunk]);
        }
        Ok(out)
    }

    /// Write `data` to non-volatile memory in chunks of up to 6 (local) or
    /// 5 (remote) bytes. Stops at the first chunk that fails; later chunks
    /// are never sent.
    pub fn write_non_volatile_memory(
        &mut self,
        local: bool,
        addr: u32,
        data: &[u8],
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        self.check_nv_range(local, addr, data.len())?;
        let max_chunk = if local { MAX_LOCAL_NVM_WRITE_CHUNK } else { MAX_REMOTE_NVM_WRITE_CHUNK };
        for (i, chunk) in data.chunks(max_chunk).enumerate() {
            if is_cancelled(cancel) {
                return Err(GoError::Cancelled);
            }
            let cmd = if local {
                SkipCommand::write_local_nv_mem(chunk.len())?
            } else {
                SkipCommand::write_remote_nv_mem(chunk.len())?
            };
            let mut params = Vec::with_capacity(chunk.len() + 1);
            params.push((addr as usize + i * max_chunk) as u8);
            params.extend_from_slice(chunk);
            self.send_cmd_and_get_response(cmd.into(), &params, timeout, cancel)?;
        }
        Ok(())
    }

    /// Sensor DDS memory: remote NVM, or local NVM on devices without a sensor side.
    pub fn read_sensor_dds_memory(
        &mut self,
        addr: u32,
        len: usize,
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<u8>> {
        let local = V::MAX_REMOTE_NV_ADDR.is_none();
        self.read_non_volatile_memory(local, addr, len, timeout, cancel)
    }

    pub fn write_sensor_dds_memory(
        &mut self,
        addr: u32,
        data: &[u8],
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        let local = V::MAX_REMOTE_NV_ADDR.is_none();
        self.write_non_volatile_memory(local, addr, data, timeout, cancel)
    }

    pub fn calculate_nearest_legal_measurement_period(&self, period_seconds: f64) -> f64 {
        nearest_legal_period::<V>(period_seconds)
    }

    /// Program the quantized form of `period_seconds`.
    pub fn set_measurement_period(&mut self, period_seconds: f64, timeout: Duration) -> Result<()> {
        let ticks = period_to_ticks::<V>(period_seconds);
        let params = MeasurementPeriodParams { ticks: U32::new(ticks) };
        self.send_cmd_and_get_response(SkipCommand::SetMeasurementPeriod.into(), params.as_bytes(), timeout, None)?;
        debug!(ticks, "Measurement period set");
        Ok(())
    }

    pub fn get_measurement_period(&mut self, timeout: Duration) -> Result<f64> {
        let payload = self.send_cmd_and_get_response(SkipCommand::GetMeasurementPeriod.into(), &[], timeout, None)?;
        let (params, _) = MeasurementPeriodParams::read_from_prefix(&payload)
            .map_err(|_| GoError::InvalidPacket("GET_MEASUREMENT_PERIOD response too short".to_string()))?;
        Ok(ticks_to_period::<V>(params.ticks.get()))
    }

    pub fn measurements_available(&self) -> usize {
        self.samples.available(&self.session)
    }

    /// Read up to `count` raw samples, or all queued samples for `None`.
    pub fn read_raw_measurements(&mut self, count: Option<usize>) -> Result<Vec<i32>> {
        self.samples.read(&self.session, count)
    }

    pub fn get_latest_raw_measurement(&mut self) -> Result<i32> {
        self.samples.latest(&self.session)
    }

    pub fn convert_to_voltage(&self, raw: i32, probe: ProbeType, calibrate: bool) -> f64 {
        let volts = V::raw_to_voltage(raw, probe);
        match (&self.flash_record, calibrate) {
            (Some(record), true) => record.calibration(probe).apply(volts),
            _ => volts,
        }
    }

    /// Voltage of a raw reading for the attached sensor's probe type.
    pub fn convert_to_sensor_voltage(&self, raw: i32, calibrate: bool) -> f64 {
        self.convert_to_voltage(raw, self.probe_type, calibrate)
    }

    /// Reading in the sensor's own units, via its active calibration page.
    /// Falls back to volts when no DDS record is cached. Devices without a
    /// sensor port already convert to their own units.
    pub fn calibrated_value(&self, raw: i32) -> f64 {
        let volts = self.convert_to_sensor_voltage(raw, true);
        match &self.dds_record {
            Some(record) if V::MAX_REMOTE_NV_ADDR.is_some() => record.calibrate(volts),
            _ => volts,
        }
    }

    pub fn convert_voltage_to_raw(&self, volts: f64, probe: ProbeType) -> i32 {
        V::voltage_to_raw(volts, probe)
    }

    /// Read, validate and cache the calibration record.
    pub fn read_flash_record(&mut self, timeout: Duration) -> Result<SkipFlashRecord> {
        if !V::SUPPORTS_FLASH_RECORD {
            return Err(GoError::Precondition(format!("{} has no flash record", V::NAME)));
        }
        let bytes = self.read_non_volatile_memory(true, FLASH_RECORD_ADDR, FLASH_RECORD_SIZE, timeout, None)?;
        let record = SkipFlashRecord::from_bytes(&bytes)?;
        self.flash_record = Some(record);
        Ok(record)
    }

    pub fn write_flash_record(&mut self, record: &SkipFlashRecord, timeout: Duration) -> Result<()> {
        if !V::SUPPORTS_FLASH_RECORD {
            return Err(GoError::Precondition(format!("{} has no flash record", V::NAME)));
        }
        self.write_non_volatile_memory(true, FLASH_RECORD_ADDR, &record.to_bytes(), timeout, None)?;
        self.flash_record = Some(*record);
        Ok(())
    }

    pub fn flash_record(&self) -> Option<&SkipFlashRecord> {
        self.flash_record.as_ref()
    }

    pub fn set_flash_record(&mut self, record: SkipFlashRecord) {
        self.flash_record = Some(record);
    }

    /// Record every command sent and response received.
    pub fn set_diagnostics(&mut self, enabled: bool) {
        self.diagnostics_enabled = enabled;
        if enabled && self.diagnostics.is_none() {
            self.diagnostics = Some(Diagnostics {
                output: PacketRing::new("diagnostic_output", DIAGNOSTIC_RING_CAPACITY),
                input: PacketRing::new("diagnostic_input", DIAGNOSTIC_RING_CAPACITY),
            });
        }
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics_enabled
    }

    /// Command packets sent while diagnostics were on, oldest first.
    pub fn diagnostic_output(&self) -> Vec<Packet> {
        self.diagnostics
            .as_ref()
            .map(|d| d.output.snapshot(usize::MAX))
            .unwrap_or_default()
    }

    /// Response packets received while diagnostics were on, oldest first.
    pub fn diagnostic_input(&self) -> Vec<Packet> {
        self.diagnostics
            .as_ref()
            .map(|d| d.input.snapshot(usize::MAX))
            .unwrap_or_default()
    }

    fn record_diagnostic(&mut self, packet: Packet, outgoing: bool) {
        if !self.diagnostics_enabled {
            return;
        }
        if let Some(diag) = self.diagnostics.as_mut() {
            if outgoing {
                diag.output.push(packet);
            } else {
                diag.input.push(packet);
            }
        }
    }
}
