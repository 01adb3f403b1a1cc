//! Transport abstraction: lets the same source/destination core drive UDP
//! datagrams or length-prefixed TCP streams without branching on which one
//! is in effect.
//!
//! The wire actually interleaves two message shapes on one socket: binary
//! [`Frame`]s (data updates and TIME_REQUEST) and ASCII control strings
//! (POLL, TIME_RESPONSE, the destination-initiated TIME_SYNC). A binary
//! frame's first content byte is always `0` or `1` (`is_fragmented`); every
//! ASCII command starts with a printable letter. That's enough to sniff
//! which parser to use without a type tag on the wire.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};

use socket2::{Domain, Socket, Type};

use crate::frame::{self, DataType, Frame};

/// Where a message came from / is going to. UDP identifies peers by address;
/// stream mode identifies them by connection slot (sources are keyed by
/// `source_id` once the first frame names it — see `aoi_core::source_key`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Udp(SocketAddr),
    Stream(usize),
}

/// Everything that can arrive on the wire, post-sniff.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Data(Frame),
    /// `POLL:<data_type_int>`.
    Poll(DataType),
    /// `TIME_RESPONSE:<t_dest:.15f>:<t1:.15f>`.
    TimeResponse { t_dest: f64, t1: f64 },
    /// Destination-initiated `TIME_SYNC` edge case.
    TimeSync,
    /// The source's reply to a destination-initiated `TIME_SYNC`:
    /// `TIME_RESPONSE:<dest_time>` carrying only the source's own reception
    /// time — no RTT correction is possible in this one-shot form, unlike
    /// the symmetric source-initiated exchange.
    TimeSyncEcho(f64),
}

fn sniff(bytes: &[u8]) -> Option<WireMessage> {
    if bytes.is_empty() {
        return None;
    }
    if bytes[0] == 0 || bytes[0] == 1 {
        return Frame::decode_datagram(bytes).ok().map(WireMessage::Data);
    }
    let text = std::str::from_utf8(bytes).ok()?;
    parse_ascii(text)
}

fn parse_ascii(text: &str) -> Option<WireMessage> {
    if text == "TIME_SYNC" {
        return Some(WireMessage::TimeSync);
    }
    if let Some(rest) = text.strip_prefix("POLL:") {
        let raw: u8 = rest.parse().ok()?;
        return DataType::try_from(raw).ok().map(WireMessage::Poll);
    }
    if let Some(rest) = text.strip_prefix("TIME_RESPONSE:") {
        let mut parts = rest.splitn(2, ':');
        let first: f64 = parts.next()?.parse().ok()?;
        return match parts.next() {
            // Symmetric form: destination echoes the source's t1 alongside
            // its own clock, so the source can compute RTT-corrected theta.
            Some(rest) => {
                let t1: f64 = rest.parse().ok()?;
                Some(WireMessage::TimeResponse { t_dest: first, t1 })
            }
            // One-shot `TIME_SYNC` echo: only the source's own reception
            // time travels back, no t1 to echo.
            None => Some(WireMessage::TimeSyncEcho(first)),
        };
    }
    None
}

fn encode_ascii(msg: &WireMessage) -> Option<Vec<u8>> {
    match msg {
        WireMessage::Poll(dt) => Some(format!("POLL:{}", dt.as_u8()).into_bytes()),
        WireMessage::TimeResponse { t_dest, t1 } => {
            Some(format!("TIME_RESPONSE:{t_dest:010.15}:{t1:010.15}").into_bytes())
        }
        WireMessage::TimeSync => Some(b"TIME_SYNC".to_vec()),
        WireMessage::TimeSyncEcho(t) => Some(format!("TIME_RESPONSE:{t:010.15}").into_bytes()),
        WireMessage::Data(_) => None,
    }
}

/// One successful, non-blocking poll of a [`Transport`]: either a decoded
/// message, or a decode failure attributed to the `Endpoint` it came from so
/// the caller can count it against that source instead of silently losing it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Endpoint, WireMessage),
    Dropped(Endpoint),
}

/// One non-blocking socket capability, shared by both the source and
/// destination binaries. `send`/`try_recv` always deal in [`WireMessage`];
/// the datagram-vs-stream distinction is entirely internal.
pub trait Transport {
    fn send(&mut self, peer: &Endpoint, msg: &WireMessage) -> io::Result<()>;
    /// Non-blocking receive. `Ok(None)` on would-block, never blocks.
    fn try_recv(&mut self) -> io::Result<Option<TransportEvent>>;
}

/// Send `msg`, treating a full send buffer as a transient condition to be
/// ignored and retried next loop, rather than a process-ending error. Returns
/// `Ok(true)` if the message actually went out, `Ok(false)` if it would have
/// blocked (caller should retry next tick, not treat the item as consumed),
/// `Err` only for a genuine I/O failure.
pub fn send_best_effort(transport: &mut dyn Transport, peer: &Endpoint, msg: &WireMessage) -> io::Result<bool> {
    match transport.send(peer, msg) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// UDP datagram transport
// ---------------------------------------------------------------------------

pub struct UdpTransport {
    socket: UdpSocket,
    recv_buf: Vec<u8>,
}

impl UdpTransport {
    pub fn bind(listen_port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let addr: SocketAddr = ([0, 0, 0, 0], listen_port).into();
        socket.bind(&addr.into())?;
        Ok(Self { socket: socket.into(), recv_buf: vec![0u8; 1 << 16] })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, peer: &Endpoint, msg: &WireMessage) -> io::Result<()> {
        let Endpoint::Udp(addr) = peer else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "UdpTransport requires Endpoint::Udp"));
        };
        let bytes = match msg {
            WireMessage::Data(frame) => frame.encode_datagram(),
            other => encode_ascii(other).expect("non-Data WireMessage always has an ASCII encoding"),
        };
        self.socket.send_to(&bytes, addr)?;
        Ok(())
    }

    fn try_recv(&mut self) -> io::Result<Option<TransportEvent>> {
        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((n, addr)) => match sniff(&self.recv_buf[..n]) {
                Some(msg) => Ok(Some(TransportEvent::Message(Endpoint::Udp(addr), msg))),
                None => {
                    tracing::warn!(peer = %addr, len = n, "dropped malformed datagram");
                    Ok(Some(TransportEvent::Dropped(Endpoint::Udp(addr))))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// TCP stream transport
// ---------------------------------------------------------------------------

struct Connection {
    stream: TcpStream,
    inbuf: Vec<u8>,
    /// A body already split off `inbuf` (and thus unrecoverable from it)
    /// whose sniff fell on the same pass as a resync — held here so it is
    /// returned on the very next `try_recv` instead of being lost under the
    /// `Dropped` event reported for that resync.
    pending_body: Option<Vec<u8>>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self { stream, inbuf: Vec::new(), pending_body: None }
    }
}

/// Length-prefixed TCP transport. The destination side accepts connections
/// on a background thread and hands completed `TcpStream`s to the main loop
/// over a bounded channel; the main loop owns all reads/writes, so there is
/// no shared mutable state crossing the thread boundary.
pub struct TcpTransport {
    listener: Option<TcpListener>,
    accept_rx: Option<crossbeam_channel::Receiver<TcpStream>>,
    connections: HashMap<usize, Connection>,
    next_conn_id: usize,
}

impl TcpTransport {
    /// Destination-side: listen and accept connections on a background
    /// thread.
    pub fn listen(listen_port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port))?;
        let accept_source = listener.try_clone()?;
        let (tx, rx) = crossbeam_channel::bounded(64);
        std::thread::Builder::new()
            .name("aoi-tcp-accept".into())
            .spawn(move || {
                for incoming in accept_source.incoming() {
                    match incoming {
                        Ok(stream) => {
                            if tx.send(stream).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            })
            .expect("failed to spawn accept thread");

        Ok(Self { listener: Some(listener), accept_rx: Some(rx), connections: HashMap::new(), next_conn_id: 0 })
    }

    /// Source-side: a single outgoing connection to the destination.
    pub fn connect(destination: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(destination)?;
        stream.set_nonblocking(true)?;
        let mut connections = HashMap::new();
        connections.insert(0, Connection::new(stream));
        Ok(Self { listener: None, accept_rx: None, connections, next_conn_id: 1 })
    }

    fn drain_new_connections(&mut self) {
        let Some(rx) = &self.accept_rx else { return };
        while let Ok(stream) = rx.try_recv() {
            if stream.set_nonblocking(true).is_err() {
                continue;
            }
            let id = self.next_conn_id;
            self.next_conn_id += 1;
            self.connections.insert(id, Connection::new(stream));
        }
    }

    /// Drop a connection whose peer disconnected (stream reset / broken
    /// pipe). The source is expected to reconnect with a fresh session;
    /// the destination just loses that slot's reassembly state.
    fn drop_connection(&mut self, id: usize) {
        self.connections.remove(&id);
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, peer: &Endpoint, msg: &WireMessage) -> io::Result<()> {
        let Endpoint::Stream(id) = peer else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "TcpTransport requires Endpoint::Stream"));
        };
        let Some(conn) = self.connections.get_mut(id) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "unknown stream connection"));
        };

        let body = match msg {
            WireMessage::Data(frame) => frame.encode_stream().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
            other => {
                let ascii = encode_ascii(other).expect("non-Data WireMessage always has an ASCII encoding");
                let mut framed = (ascii.len() as u32).to_be_bytes().to_vec();
                framed.extend_from_slice(&ascii);
                framed
            }
        };
        conn.stream.write_all(&body)
    }

    fn try_recv(&mut self) -> io::Result<Option<TransportEvent>> {
        self.drain_new_connections();

        let ids: Vec<usize> = self.connections.keys().copied().collect();
        for id in ids {
            let conn = self.connections.get_mut(&id).expect("id came from this map's own keys");

            // A body found alongside a resync on the previous call is
            // reported here, on the very next poll, so the `Dropped` event
            // that call returned doesn't also cost this message.
            if let Some(body) = conn.pending_body.take() {
                return Ok(Some(match sniff_stream_body(&body) {
                    Some(msg) => TransportEvent::Message(Endpoint::Stream(id), msg),
                    None => {
                        tracing::warn!(conn = id, "dropped malformed stream message");
                        TransportEvent::Dropped(Endpoint::Stream(id))
                    }
                }));
            }

            let mut chunk = [0u8; 4096];
            match conn.stream.read(&mut chunk) {
                Ok(0) => {
                    self.drop_connection(id);
                    continue;
                }
                Ok(n) => conn.inbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    // A stream reset/broken pipe closes only that
                    // connection; it must never propagate out of
                    // `try_recv` and take down polling for every other
                    // source sharing this transport.
                    tracing::warn!(conn = id, error = %e, "stream reset, dropping connection");
                    self.drop_connection(id);
                    continue;
                }
            }

            let mut resynced = 0u64;
            if let Some(body) = frame::split_next_stream_message(&mut conn.inbuf, &mut resynced) {
                if resynced > 0 {
                    conn.pending_body = Some(body);
                    return Ok(Some(TransportEvent::Dropped(Endpoint::Stream(id))));
                }
                return Ok(Some(match sniff_stream_body(&body) {
                    Some(msg) => TransportEvent::Message(Endpoint::Stream(id), msg),
                    None => {
                        tracing::warn!(conn = id, "dropped malformed stream message");
                        TransportEvent::Dropped(Endpoint::Stream(id))
                    }
                }));
            }
        }
        Ok(None)
    }
}

fn sniff_stream_body(body: &[u8]) -> Option<WireMessage> {
    if body.is_empty() {
        return None;
    }
    if body[0] == 0 || body[0] == 1 {
        return frame::decode_stream_body(body).ok().map(WireMessage::Data);
    }
    std::str::from_utf8(body).ok().and_then(parse_ascii)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_distinguishes_binary_and_ascii() {
        let frame = Frame::empty_beacon(DataType::General, 1.0);
        let bytes = frame.encode_datagram();
        assert_eq!(sniff(&bytes), Some(WireMessage::Data(frame)));

        assert_eq!(sniff(b"POLL:2"), Some(WireMessage::Poll(DataType::Position)));
        assert_eq!(sniff(b"TIME_SYNC"), Some(WireMessage::TimeSync));
    }

    #[test]
    fn ascii_time_response_round_trips_through_parse() {
        let msg = WireMessage::TimeResponse { t_dest: 123.456, t1: 7.0 };
        let bytes = encode_ascii(&msg).unwrap();
        assert_eq!(sniff(&bytes), Some(msg));
    }

    #[test]
    fn ascii_time_sync_echo_round_trips_as_single_value() {
        let msg = WireMessage::TimeSyncEcho(42.5);
        let bytes = encode_ascii(&msg).unwrap();
        assert_eq!(sniff(&bytes), Some(msg));
    }

    #[test]
    fn time_sync_round_trips() {
        let bytes = encode_ascii(&WireMessage::TimeSync).unwrap();
        assert_eq!(sniff(&bytes), Some(WireMessage::TimeSync));
    }

    #[test]
    fn stream_body_sniff_matches_datagram_sniff_semantics() {
        let ascii = b"TIME_SYNC";
        assert_eq!(sniff_stream_body(ascii), Some(WireMessage::TimeSync));

        let frame = Frame { is_fragmented: false, data_type: DataType::Image, source_id: Some(3), timestamp: 9.0, payload: vec![1, 2] };
        let body = frame.encode_stream().unwrap();
        // encode_stream includes the 4-byte length prefix; strip it for the
        // body-only sniff this function operates on.
        assert_eq!(sniff_stream_body(&body[4..]), Some(WireMessage::Data(frame)));
    }

    #[test]
    fn udp_transport_round_trips_a_poll_message() {
        let mut a = UdpTransport::bind(0).unwrap();
        let mut b = UdpTransport::bind(0).unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        b.send(&Endpoint::Udp(a_addr), &WireMessage::Poll(DataType::Inertial)).unwrap();

        // Retry briefly: loopback delivery is effectively immediate but not
        // guaranteed to be visible on the very first non-blocking poll.
        let mut received = None;
        for _ in 0..100 {
            if let Some(event) = a.try_recv().unwrap() {
                received = Some(event);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        match received.expect("expected a datagram to arrive on loopback") {
            TransportEvent::Message(from, msg) => {
                assert_eq!(from, Endpoint::Udp(b_addr));
                assert_eq!(msg, WireMessage::Poll(DataType::Inertial));
            }
            other => panic!("expected a Message event, got {other:?}"),
        }
    }

    #[test]
    fn udp_transport_reports_dropped_for_malformed_datagram() {
        let mut a = UdpTransport::bind(0).unwrap();
        let mut b = UdpTransport::bind(0).unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        // A non-ASCII, non-frame-looking byte: not 0/1 (frame) and not
        // valid UTF-8, so neither sniff path accepts it.
        b.socket.send_to(&[0xFFu8, 0x80], a_addr).unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(event) = a.try_recv().unwrap() {
                received = Some(event);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(received, Some(TransportEvent::Dropped(Endpoint::Udp(b_addr))));
    }
}
