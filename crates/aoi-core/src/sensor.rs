//! Rate-paced synthetic payload generator. The testbed's sensor hardware is
//! out of scope; this produces opaque, randomized filler bytes at a
//! configured rate and size so the rest of the pipeline can be exercised
//! end to end.

use rand::RngCore;

use crate::frame::{DataType, Frame};

#[derive(Debug, Clone, Copy)]
pub struct SensorConfig {
    pub data_type: DataType,
    /// Total frame size in bytes, including the datagram header.
    pub packet_size: usize,
    /// Updates per second.
    pub rate: f64,
}

impl SensorConfig {
    pub fn interval(&self) -> f64 {
        1.0 / self.rate
    }

    /// Payload size after subtracting the datagram header. Saturates at 0
    /// for a `packet_size` smaller than the header (malformed config).
    pub fn payload_len(&self) -> usize {
        self.packet_size.saturating_sub(crate::frame::DATAGRAM_HEADER_LEN)
    }
}

/// A single sensor's emission state: its configuration plus the deadline for
/// its next frame. Owns no queue itself — `generate` returns the frame (or
/// `None`) and the caller pushes it onto the relevant `SourceQueues`, so this
/// type stays pure and unit-testable without a queue or a real clock.
#[derive(Debug)]
pub struct Sensor {
    config: SensorConfig,
    next_emission: f64,
}

impl Sensor {
    /// `now` seeds the first deadline so the very first call to `generate`
    /// doesn't have to wait a full interval.
    pub fn new(config: SensorConfig, now: f64) -> Self {
        Self { config, next_emission: now }
    }

    pub fn data_type(&self) -> DataType {
        self.config.data_type
    }

    pub fn config(&self) -> SensorConfig {
        self.config
    }

    /// Rate-gated: emits at most one frame per `interval` wall-clock seconds.
    /// `now` is supplied by the caller rather than read from a real clock so
    /// this is deterministically testable.
    pub fn generate(&mut self, now: f64) -> Option<Frame> {
        if now < self.next_emission {
            return None;
        }
        self.next_emission = now + self.config.interval();

        let mut payload = vec![0u8; self.config.payload_len()];
        rand::rng().fill_bytes(&mut payload);

        Some(Frame {
            is_fragmented: false,
            data_type: self.config.data_type,
            source_id: None,
            timestamp: now,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rate: f64, packet_size: usize) -> SensorConfig {
        SensorConfig { data_type: DataType::General, packet_size, rate }
    }

    #[test]
    fn rate_gated_one_frame_per_interval() {
        let mut s = Sensor::new(cfg(10.0, 50), 0.0);
        assert!(s.generate(0.0).is_some());
        assert!(s.generate(0.05).is_none(), "interval is 0.1s, must not re-fire yet");
        assert!(s.generate(0.1).is_some());
    }

    #[test]
    fn payload_sized_to_packet_size_minus_header() {
        let mut s = Sensor::new(cfg(10.0, 50), 0.0);
        let f = s.generate(0.0).unwrap();
        assert_eq!(f.payload.len(), 50 - crate::frame::DATAGRAM_HEADER_LEN);
    }

    #[test]
    fn packet_size_smaller_than_header_yields_empty_payload() {
        let mut s = Sensor::new(cfg(10.0, 4), 0.0);
        let f = s.generate(0.0).unwrap();
        assert_eq!(f.payload.len(), 0);
    }

    #[test]
    fn stamped_with_caller_supplied_time() {
        let mut s = Sensor::new(cfg(1.0, 50), 10.0);
        let f = s.generate(10.0).unwrap();
        assert_eq!(f.timestamp, 10.0);
    }
}
