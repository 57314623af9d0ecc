use crate::constants::{MAX_CMD_PARAM_BYTES, PACKET_SIZE};
use crate::error::{GoError, Result};
use bytes::Bytes;
use std::fmt;

/// One fixed-size record as it travels over the wire.
///
/// Packets are plain values; the ring buffers copy them in and out.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Packet([u8; PACKET_SIZE]);

impl Packet {
    pub const fn new(bytes: [u8; PACKET_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; PACKET_SIZE] {
        self.0
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({})", hex::encode(self.0))
    }
}

impl From<[u8; PACKET_SIZE]> for Packet {
    fn from(bytes: [u8; PACKET_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = GoError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PACKET_SIZE {
            return Err(GoError::InvalidPacket(format!(
                "expected {} bytes, got {}",
                PACKET_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(bytes.try_into()?))
    }
}

/// Bit layout of the packet stream for one device family.
///
/// Byte 0 carries the type discriminator. Response packets carry the
/// command echo and payload; measurement packets carry a sample count,
/// a rolling counter and little-endian signed 16-bit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    /// Bits of byte 0 set on command response packets
    pub response_mask: u8,
    /// Bits of byte 0 set on error responses
    pub error_mask: u8,
    pub cmd_echo_offset: usize,
    pub response_payload_offset: usize,
    pub sample_count_offset: usize,
    pub sample_count_mask: u8,
    pub rolling_counter_offset: usize,
    pub first_sample_offset: usize,
    pub max_samples_per_packet: u8,
}

impl WireFormat {
    /// Layout spoken by Go! Link and Go! Temp firmware.
    pub const SKIP: WireFormat = WireFormat {
        response_mask: 0x80,
        error_mask: 0x40,
        cmd_echo_offset: 1,
        response_payload_offset: 2,
        sample_count_offset: 0,
        sample_count_mask: 0x0F,
        rolling_counter_offset: 1,
        first_sample_offset: 2,
        max_samples_per_packet: 3,
    };

    /// Reject layouts whose fields fall outside one packet.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("cmd_echo_offset", self.cmd_echo_offset),
            ("sample_count_offset", self.sample_count_offset),
            ("rolling_counter_offset", self.rolling_counter_offset),
        ];
        for (name, offset) in fields {
            if offset >= PACKET_SIZE {
                return Err(GoError::Precondition(format!(
                    "wire format {} {} is outside a {}-byte packet",
                    name, offset, PACKET_SIZE
                )));
            }
        }
        if self.response_payload_offset > PACKET_SIZE {
            return Err(GoError::Precondition(format!(
                "wire format response_payload_offset {} exceeds packet size",
                self.response_payload_offset
            )));
        }
        let samples_end = self.first_sample_offset + self.max_samples_per_packet as usize * 2;
        if samples_end > PACKET_SIZE {
            return Err(GoError::Precondition(format!(
                "{} samples from offset {} do not fit in a {}-byte packet",
                self.max_samples_per_packet, self.first_sample_offset, PACKET_SIZE
            )));
        }
        Ok(())
    }

    pub fn is_response(&self, packet: &Packet) -> bool {
        packet.0[0] & self.response_mask != 0
    }

    /// Raw sample count field of a measurement packet, unvalidated.
    /// Zero when the layout puts the field outside the packet.
    pub fn sample_count(&self, packet: &Packet) -> u8 {
        packet
            .0
            .get(self.sample_count_offset)
            .map_or(0, |b| b & self.sample_count_mask)
    }

    /// Rolling counter of a measurement packet, if the layout has one in range.
    pub fn rolling_counter(&self, packet: &Packet) -> Option<u8> {
        packet.0.get(self.rolling_counter_offset).copied()
    }

    pub fn decode(&self, packet: &Packet) -> Result<Frame> {
        if self.is_response(packet) {
            Ok(Frame::Response(self.decode_response(packet)?))
        } else {
            Ok(Frame::Measurement(self.decode_measurement(packet)?))
        }
    }

    pub fn decode_response(&self, packet: &Packet) -> Result<ResponseFrame> {
        if !self.is_response(packet) {
            return Err(GoError::InvalidPacket(format!(
                "not a command response: {}",
                hex::encode(packet.0)
            )));
        }
        if self.cmd_echo_offset >= PACKET_SIZE || self.response_payload_offset > PACKET_SIZE {
            return Err(GoError::InvalidPacket("response layout exceeds packet size".to_string()));
        }
        Ok(ResponseFrame {
            cmd_echo: packet.0[self.cmd_echo_offset],
            is_error: packet.0[0] & self.error_mask != 0,
            payload: Bytes::copy_from_slice(&packet.0[self.response_payload_offset..]),
        })
    }

    pub fn decode_measurement(&self, packet: &Packet) -> Result<MeasurementFrame> {
        if self.is_response(packet) {
            return Err(GoError::InvalidPacket(format!(
                "not a measurement packet: {}",
                hex::encode(packet.0)
            )));
        }
        self.validate().map_err(|e| GoError::InvalidPacket(e.to_string()))?;
        let count = self.sample_count(packet);
        let end = self.first_sample_offset + count as usize * 2;
        if count > self.max_samples_per_packet || end > PACKET_SIZE {
            return Err(GoError::InvalidPacket(format!(
                "measurement packet claims {} samples (max {})",
                count, self.max_samples_per_packet
            )));
        }
        let samples = packet.0[self.first_sample_offset..end]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(MeasurementFrame {
            sample_count: count,
            rolling_counter: self.rolling_counter(packet).unwrap_or_default(),
            samples,
        })
    }

    /// Build a command packet: command id followed by up to seven parameter bytes.
    pub fn encode_command(&self, cmd: u8, params: &[u8]) -> Result<Packet> {
        if params.len() > MAX_CMD_PARAM_BYTES {
            return Err(GoError::Precondition(format!(
                "{} parameter bytes do not fit in one packet (max {})",
                params.len(),
                MAX_CMD_PARAM_BYTES
            )));
        }
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = cmd;
        bytes[1..1 + params.len()].copy_from_slice(params);
        Ok(Packet(bytes))
    }

    /// Build a response packet as the device would send it.
    pub fn encode_response(&self, cmd_echo: u8, is_error: bool, payload: &[u8]) -> Result<Packet> {
        self.validate()?;
        let room = PACKET_SIZE.saturating_sub(self.response_payload_offset);
        if payload.len() > room {
            return Err(GoError::Precondition(format!(
                "{} response bytes do not fit in one packet (max {})",
                payload.len(),
                room
            )));
        }
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = self.response_mask;
        if is_error {
            bytes[0] |= self.error_mask;
        }
        bytes[self.cmd_echo_offset] = cmd_echo;
        let start = self.response_payload_offset;
        bytes[start..start + payload.len()].copy_from_slice(payload);
        Ok(Packet(bytes))
    }

    /// Build a measurement packet as the device would send it.
    pub fn encode_measurement(&self, rolling_counter: u8, samples: &[i16]) -> Result<Packet> {
        self.validate()?;
        if samples.len() > self.max_samples_per_packet as usize {
            return Err(GoError::Precondition(format!(
                "{} samples do not fit in one packet (max {})",
                samples.len(),
                self.max_samples_per_packet
            )));
        }
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[self.sample_count_offset] = samples.len() as u8 & self.sample_count_mask;
        bytes[self.rolling_counter_offset] = rolling_counter;
        for (i, sample) in samples.iter().enumerate() {
            let at = self.first_sample_offset + i * 2;
            bytes[at..at + 2].copy_from_slice(&sample.to_le_bytes());
        }
        Ok(Packet(bytes))
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::SKIP
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Measurement(MeasurementFrame),
    Response(ResponseFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementFrame {
    pub sample_count: u8,
    pub rolling_counter: u8,
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub cmd_echo: u8,
    pub is_error: bool,
    pub payload: Bytes,
}

impl ResponseFrame {
    /// Status byte of an error response (first payload byte).
    pub fn status(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }
}
