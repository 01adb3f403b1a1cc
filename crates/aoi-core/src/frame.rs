//! Wire codec: fixed-header binary frames, in a datagram and a stream encoding.
//!
//! Datagram form (one frame per datagram): `u8 is_fragmented | u8 data_type |
//! f64 timestamp(BE) | payload` — 10-byte header.
//!
//! Stream form (length-prefixed so a TCP receiver can resynchronize on frame
//! boundaries): `u32 total_length(BE) | u8 is_fragmented | u8 data_type |
//! u8 source_id | f64 timestamp(BE) | payload` — `total_length` covers
//! everything after the 4-byte prefix (11-byte header + payload).

use std::convert::TryFrom;
use std::fmt;

pub const DATAGRAM_HEADER_LEN: usize = 10;
pub const STREAM_HEADER_LEN: usize = 11;

/// Defensive upper bound on a single frame's total size (header + payload).
/// Nothing in this testbed sends anything close to this; it exists so a
/// corrupted length prefix can be recognised as malformed rather than
/// stalling the stream decoder waiting for gigabytes that will never arrive.
pub const MAX_FRAME_LEN: usize = 1 << 20; // 1 MiB

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer too short for a header")]
    Truncated,
    #[error("unknown data_type byte: {0}")]
    UnknownDataType(u8),
    #[error("declared frame length {0} exceeds MAX_FRAME_LEN")]
    OversizeLength(u32),
    #[error("stream-encoding a frame requires source_id to be set")]
    MissingSourceId,
}

/// Sensor/message type tag. Fixed, dense, ≤ 8 variants so the destination and
/// scheduler can index per-type state in a small array instead of dispatching
/// through a trait object or hashing a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    TimeRequest = 0,
    General = 1,
    Position = 2,
    Inertial = 3,
    Image = 4,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::TimeRequest,
        DataType::General,
        DataType::Position,
        DataType::Inertial,
        DataType::Image,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DataType {
    type Error = FrameError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(DataType::TimeRequest),
            1 => Ok(DataType::General),
            2 => Ok(DataType::Position),
            3 => Ok(DataType::Inertial),
            4 => Ok(DataType::Image),
            other => Err(FrameError::UnknownDataType(other)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::TimeRequest => "time_request",
            DataType::General => "general",
            DataType::Position => "position",
            DataType::Inertial => "inertial",
            DataType::Image => "image",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DataType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time_request" => Ok(DataType::TimeRequest),
            "general" => Ok(DataType::General),
            "position" => Ok(DataType::Position),
            "inertial" => Ok(DataType::Inertial),
            "image" => Ok(DataType::Image),
            // Accept the raw numeric form too — POLL frames and CLI --sensors
            // specs both carry the type as a small integer.
            _ => s
                .parse::<u8>()
                .map_err(|_| FrameError::UnknownDataType(0))
                .and_then(DataType::try_from),
        }
    }
}

/// A single wire record. `source_id` is only meaningful (and only ever
/// encoded) in stream mode; datagram mode identifies the source by the UDP
/// peer address instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub is_fragmented: bool,
    pub data_type: DataType,
    pub source_id: Option<u8>,
    pub timestamp: f64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn empty_beacon(data_type: DataType, timestamp: f64) -> Self {
        Self { is_fragmented: false, data_type, source_id: None, timestamp, payload: Vec::new() }
    }

    pub fn encode_datagram(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DATAGRAM_HEADER_LEN + self.payload.len());
        out.push(self.is_fragmented as u8);
        out.push(self.data_type.as_u8());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode_datagram(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::OversizeLength(bytes.len() as u32));
        }
        if bytes.len() < DATAGRAM_HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let is_fragmented = bytes[0] != 0;
        let data_type = DataType::try_from(bytes[1])?;
        let timestamp = f64::from_be_bytes(bytes[2..10].try_into().unwrap());
        let payload = bytes[10..].to_vec();
        Ok(Frame { is_fragmented, data_type, source_id: None, timestamp, payload })
    }

    pub fn encode_stream(&self) -> Result<Vec<u8>, FrameError> {
        let source_id = self.source_id.ok_or(FrameError::MissingSourceId)?;
        let total_length = (STREAM_HEADER_LEN + self.payload.len()) as u32;
        let mut out = Vec::with_capacity(4 + total_length as usize);
        out.extend_from_slice(&total_length.to_be_bytes());
        out.push(self.is_fragmented as u8);
        out.push(self.data_type.as_u8());
        out.push(source_id);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

/// Parse a stream-mode frame body — the bytes `total_length` covers, i.e.
/// everything after the 4-byte length prefix. Used both by [`StreamDecoder`]
/// (pure binary-frame streams) and by the transport layer, which sniffs a
/// length-delimited body's first byte to tell a binary frame apart from an
/// ASCII control message (POLL / TIME_RESPONSE / TIME_SYNC) before deciding
/// to call this at all — see `aoi_core::transport`.
pub fn decode_stream_body(body: &[u8]) -> Result<Frame, FrameError> {
    if body.len() < STREAM_HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let is_fragmented = body[0] != 0;
    let data_type = DataType::try_from(body[1])?;
    let source_id = body[2];
    let timestamp = f64::from_be_bytes(body[3..11].try_into().unwrap());
    let payload = body[11..].to_vec();
    Ok(Frame { is_fragmented, data_type, source_id: Some(source_id), timestamp, payload })
}

/// Split one length-prefixed message's raw body off the front of `buf`,
/// without assuming anything about its contents — used by the transport
/// layer, which may find either a binary frame body or an ASCII control
/// message after the length prefix. Returns `None` when fewer than 4 bytes
/// are buffered, or fewer than `total_length` body bytes have arrived yet.
/// A declared length of zero or larger than `MAX_FRAME_LEN` is treated as
/// corrupt and resynced one byte at a time, same as [`StreamDecoder`].
/// `dropped` is incremented once per corrupt length byte skipped, so the
/// caller can attribute the loss to whichever source owns this stream.
pub fn split_next_stream_message(buf: &mut Vec<u8>, dropped: &mut u64) -> Option<Vec<u8>> {
    loop {
        if buf.len() < 4 {
            return None;
        }
        let total_length = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if total_length == 0 || total_length as usize > MAX_FRAME_LEN {
            tracing::warn!(total_length, "malformed stream message length, resyncing");
            buf.remove(0);
            *dropped += 1;
            continue;
        }

        let need = 4 + total_length as usize;
        if buf.len() < need {
            return None;
        }

        let body = buf[4..need].to_vec();
        buf.drain(0..need);
        return Some(body);
    }
}

/// Incremental stream-mode decoder for a pure binary-frame stream (no
/// interleaved ASCII control messages). Owns a growable receive buffer and
/// resynchronizes byte-by-byte on malformed headers instead of giving up.
#[derive(Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    dropped: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new(), dropped: 0 }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Count of frames this decoder has had to resync past — a corrupt
    /// length prefix or a body that failed to decode.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Returns `Ok(Some(frame))` and advances past it when a full frame is
    /// buffered, `Ok(None)` when more bytes are needed (or a malformed
    /// length or data_type was just dropped and resync advanced — call
    /// again), never `Err`: malformed frames are dropped, not surfaced as
    /// decode failures to the caller.
    pub fn try_decode_next(&mut self) -> Option<Frame> {
        loop {
            let body = split_next_stream_message(&mut self.buf, &mut self.dropped)?;
            match decode_stream_body(&body) {
                Ok(frame) => return Some(frame),
                Err(err) => {
                    tracing::warn!(?err, "malformed stream frame body, resyncing");
                    self.dropped += 1;
                    continue;
                }
            }
        }
    }
}
