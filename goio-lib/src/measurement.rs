use crate::error::Result;
use crate::packet::WireFormat;
use crate::session::Session;
use std::collections::VecDeque;
use tracing::warn;

/// Unpacks raw samples from queued measurement packets in arrival order.
///
/// Samples left over when a read stops partway through a packet are kept
/// for the next read.
#[derive(Debug)]
pub struct SampleReader {
    wire: WireFormat,
    carried: VecDeque<i32>,
    latest: Option<i32>,
}

impl SampleReader {
    pub fn new(wire: WireFormat) -> Self {
        Self {
            wire,
            carried: VecDeque::new(),
            latest: None,
        }
    }

    /// Samples carried over plus queued packets times the newest packet's count.
    pub fn available(&self, session: &Session) -> usize {
        let (packets, last_count) = session.measurement_packets_available();
        self.carried.len() + packets * last_count as usize
    }

    /// Read up to `max` samples, or everything queued when `max` is `None`.
    pub fn read(&mut self, session: &Session, max: Option<usize>) -> Result<Vec<i32>> {
        let want = max.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        while out.len() < want {
            match self.carried.pop_front() {
                Some(sample) => out.push(sample),
                None => break,
            }
        }

        while out.len() < want {
            let batch = match max {
                None => session.read_measurement_packets(usize::MAX)?,
                Some(_) => session.read_measurement_packets(1)?,
            };
            if batch.is_empty() {
                break;
            }
            for packet in &batch {
                let frame = match self.wire.decode_measurement(packet) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable measurement packet");
                        continue;
                    }
                };
                for sample in frame.samples {
                    let sample = sample as i32;
                    self.latest = Some(sample);
                    if out.len() < want {
                        out.push(sample);
                    } else {
                        self.carried.push_back(sample);
                    }
                }
            }
            if max.is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Drain everything queued and return the newest sample seen, 0 if none yet.
    pub fn latest(&mut self, session: &Session) -> Result<i32> {
        self.read(session, None)?;
        Ok(self.latest.unwrap_or(0))
    }

    pub fn clear(&mut self) {
        self.carried.clear();
    }
}
