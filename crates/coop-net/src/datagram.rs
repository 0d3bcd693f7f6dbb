//! UDP link layer: connection control packets and the reliable channel.
//!
//! Every UDP datagram starts with a packet kind byte:
//!
//! ```text
//! 0x10 ConnectRequest  key str
//! 0x11 ConnectAccept
//! 0x12 ConnectReject   reason str
//! 0x13 Disconnect
//! 0x14 Ping
//! 0x15 Pong
//! 0x16 Unreliable      payload (rest of datagram)
//! 0x17 Reliable        seq u32, payload (rest of datagram)
//! 0x18 Ack             seq u32
//! ```
//!
//! Session messages ride inside `Unreliable` and `Reliable` packets untouched.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::codec::{ByteReader, ByteWriter, CodecError};

/// A link-layer packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConnectRequest { key: String },
    ConnectAccept,
    ConnectReject { reason: String },
    Disconnect,
    Ping,
    Pong,
    Unreliable { payload: Vec<u8> },
    Reliable { seq: u32, payload: Vec<u8> },
    Ack { seq: u32 },
}

/// Errors produced when decoding a packet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacketError {
    #[error("unknown packet kind 0x{0:02x}")]
    UnknownKind(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

const CONNECT_REQUEST: u8 = 0x10;
const CONNECT_ACCEPT: u8 = 0x11;
const CONNECT_REJECT: u8 = 0x12;
const DISCONNECT: u8 = 0x13;
const PING: u8 = 0x14;
const PONG: u8 = 0x15;
const UNRELIABLE: u8 = 0x16;
const RELIABLE: u8 = 0x17;
const ACK: u8 = 0x18;

impl Packet {
    /// Encode to a datagram. Strings longer than the prefix allows are cut.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(16);
        match self {
            Packet::ConnectRequest { key } => {
                w.put_u8(CONNECT_REQUEST);
                put_str_lossy(&mut w, key);
            }
            Packet::ConnectAccept => w.put_u8(CONNECT_ACCEPT),
            Packet::ConnectReject { reason } => {
                w.put_u8(CONNECT_REJECT);
                put_str_lossy(&mut w, reason);
            }
            Packet::Disconnect => w.put_u8(DISCONNECT),
            Packet::Ping => w.put_u8(PING),
            Packet::Pong => w.put_u8(PONG),
            Packet::Unreliable { payload } => {
                w.put_u8(UNRELIABLE);
                w.put_bytes(payload);
            }
            Packet::Reliable { seq, payload } => {
                w.put_u8(RELIABLE);
                w.put_u32(*seq);
                w.put_bytes(payload);
            }
            Packet::Ack { seq } => {
                w.put_u8(ACK);
                w.put_u32(*seq);
            }
        }
        w.into_inner()
    }

    /// Decode a datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut r = ByteReader::new(bytes);
        let kind = r.get_u8()?;
        let packet = match kind {
            CONNECT_REQUEST => Packet::ConnectRequest {
                key: r.get_string()?,
            },
            CONNECT_ACCEPT => Packet::ConnectAccept,
            CONNECT_REJECT => Packet::ConnectReject {
                reason: r.get_string()?,
            },
            DISCONNECT => Packet::Disconnect,
            PING => Packet::Ping,
            PONG => Packet::Pong,
            UNRELIABLE => Packet::Unreliable {
                payload: r.rest().to_vec(),
            },
            RELIABLE => Packet::Reliable {
                seq: r.get_u32()?,
                payload: r.rest().to_vec(),
            },
            ACK => Packet::Ack { seq: r.get_u32()? },
            other => return Err(PacketError::UnknownKind(other)),
        };
        Ok(packet)
    }
}

fn put_str_lossy(w: &mut ByteWriter, value: &str) {
    let mut end = value.len().min(usize::from(u16::MAX));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    // Cannot fail: the slice fits the prefix.
    let _ = w.put_str(&value[..end]);
}

// ---------------------------------------------------------------------------
// Reliable channel
// ---------------------------------------------------------------------------

struct InFlight {
    payload: Vec<u8>,
    last_sent: Instant,
}

/// Per-connection reliable-ordered channel state.
///
/// Outgoing payloads are numbered and kept until acknowledged; incoming
/// payloads are released strictly in sequence order, with duplicates dropped.
#[derive(Default)]
pub struct ReliableChannel {
    next_send: u32,
    in_flight: BTreeMap<u32, InFlight>,
    next_recv: u32,
    out_of_order: BTreeMap<u32, Vec<u8>>,
}

impl ReliableChannel {
    /// Number a payload for sending and start tracking it.
    pub fn send(&mut self, payload: Vec<u8>, now: Instant) -> Packet {
        let seq = self.next_send;
        self.next_send = self.next_send.wrapping_add(1);
        self.in_flight.insert(
            seq,
            InFlight {
                payload: payload.clone(),
                last_sent: now,
            },
        );
        Packet::Reliable { seq, payload }
    }

    /// Stop tracking an acknowledged payload.
    pub fn acknowledge(&mut self, seq: u32) {
        self.in_flight.remove(&seq);
    }

    /// Accept an incoming payload; returns payloads now deliverable in order.
    pub fn receive(&mut self, seq: u32, payload: Vec<u8>) -> Vec<Vec<u8>> {
        // Sequence numbers behind the window have already been delivered.
        if seq.wrapping_sub(self.next_recv) > u32::MAX / 2 {
            return Vec::new();
        }
        self.out_of_order.entry(seq).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(next) = self.out_of_order.remove(&self.next_recv) {
            ready.push(next);
            self.next_recv = self.next_recv.wrapping_add(1);
        }
        ready
    }

    /// Packets whose last send is older than `interval`; marks them re-sent.
    pub fn due_resends(&mut self, now: Instant, interval: Duration) -> Vec<Packet> {
        self.in_flight
            .iter_mut()
            .filter(|(_, f)| now.duration_since(f.last_sent) >= interval)
            .map(|(seq, f)| {
                f.last_sent = now;
                Packet::Reliable {
                    seq: *seq,
                    payload: f.payload.clone(),
                }
            })
            .collect()
    }

    /// Payloads still awaiting acknowledgement.
    pub fn unacked(&self) -> usize {
        self.in_flight.len()
    }
}
