//! Session wire protocol.
//!
//! Every session message is a single tag byte followed by its payload:
//!
//! ```text
//! +---------+-------------------------------------------------------+
//! | tag u8  | payload                                               |
//! +---------+-------------------------------------------------------+
//! | 0x02    | AssignId       peer u64                               |
//! | 0x03    | StartRun       seed i32, scene str                    |
//! | 0x04    | PawnTransform  sender u64, pos f32x3, rot f32x4 (xyzw) |
//! | 0x05    | Appearance     sender u64, payload str                |
//! | 0x06    | AckId          peer u64                               |
//! +---------+-------------------------------------------------------+
//! ```
//!
//! Numbers are little-endian; strings carry a `u16` byte-length prefix.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::peer::{Delivery, PeerId};

/// Wire tag bytes.
pub mod tags {
    pub const ASSIGN_ID: u8 = 0x02;
    pub const START_RUN: u8 = 0x03;
    pub const PAWN_TRANSFORM: u8 = 0x04;
    pub const APPEARANCE: u8 = 0x05;
    pub const ACK_ID: u8 = 0x06;
}

/// A decoded session message.
#[derive(Debug, Clone, PartialEq)]
pub enum NetMessage {
    /// Host tells a client its peer id.
    AssignId { peer: PeerId },
    /// Client echoes the id it was assigned.
    AckId { peer: PeerId },
    /// Host starts a run with the authoritative seed.
    StartRun { seed: i32, scene: String },
    /// Pose of the sender's avatar.
    PawnTransform {
        sender: PeerId,
        position: [f32; 3],
        rotation: [f32; 4],
    },
    /// Serialized appearance record of the sender.
    Appearance { sender: PeerId, payload: String },
}

/// Errors produced when decoding or encoding a session message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Zero-length datagram.
    #[error("empty message")]
    Empty,

    /// The tag byte is not one of the known message kinds.
    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    /// The payload was malformed.
    #[error("malformed payload for tag 0x{tag:02x}: {source}")]
    Malformed {
        /// Tag of the message being decoded.
        tag: u8,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },
}

impl NetMessage {
    /// The wire tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            NetMessage::AssignId { .. } => tags::ASSIGN_ID,
            NetMessage::AckId { .. } => tags::ACK_ID,
            NetMessage::StartRun { .. } => tags::START_RUN,
            NetMessage::PawnTransform { .. } => tags::PAWN_TRANSFORM,
            NetMessage::Appearance { .. } => tags::APPEARANCE,
        }
    }

    /// Delivery class the session uses for this message.
    pub fn delivery(&self) -> Delivery {
        match self {
            NetMessage::PawnTransform { .. } => Delivery::Unreliable,
            _ => Delivery::Reliable,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let tag = self.tag();
        let malformed = |source| ProtocolError::Malformed { tag, source };

        let mut w = ByteWriter::with_capacity(40);
        w.put_u8(tag);
        match self {
            NetMessage::AssignId { peer } | NetMessage::AckId { peer } => w.put_u64(peer.0),
            NetMessage::StartRun { seed, scene } => {
                w.put_i32(*seed);
                w.put_str(scene).map_err(malformed)?;
            }
            NetMessage::PawnTransform {
                sender,
                position,
                rotation,
            } => {
                w.put_u64(sender.0);
                for v in position.iter().chain(rotation.iter()) {
                    w.put_f32(*v);
                }
            }
            NetMessage::Appearance { sender, payload } => {
                w.put_u64(sender.0);
                w.put_str(payload).map_err(malformed)?;
            }
        }
        Ok(w.into_inner())
    }

    /// Decode from wire bytes. Trailing bytes after a complete payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(bytes);
        let tag = r.get_u8().map_err(|_| ProtocolError::Empty)?;
        Self::decode_body(tag, &mut r).map_err(|source| match source {
            DecodeFailure::Unknown => ProtocolError::UnknownTag(tag),
            DecodeFailure::Codec(source) => ProtocolError::Malformed { tag, source },
        })
    }

    fn decode_body(tag: u8, r: &mut ByteReader<'_>) -> Result<Self, DecodeFailure> {
        let msg = match tag {
            tags::ASSIGN_ID => NetMessage::AssignId {
                peer: PeerId(r.get_u64()?),
            },
            tags::ACK_ID => NetMessage::AckId {
                peer: PeerId(r.get_u64()?),
            },
            tags::START_RUN => NetMessage::StartRun {
                seed: r.get_i32()?,
                scene: r.get_string()?,
            },
            tags::PAWN_TRANSFORM => {
                let sender = PeerId(r.get_u64()?);
                let position = [r.get_f32()?, r.get_f32()?, r.get_f32()?];
                let rotation = [r.get_f32()?, r.get_f32()?, r.get_f32()?, r.get_f32()?];
                NetMessage::PawnTransform {
                    sender,
                    position,
                    rotation,
                }
            }
            tags::APPEARANCE => NetMessage::Appearance {
                sender: PeerId(r.get_u64()?),
                payload: r.get_string()?,
            },
            _ => return Err(DecodeFailure::Unknown),
        };
        Ok(msg)
    }
}

enum DecodeFailure {
    Unknown,
    Codec(CodecError),
}

impl From<CodecError> for DecodeFailure {
    fn from(e: CodecError) -> Self {
        DecodeFailure::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_id_layout() {
        let bytes = NetMessage::AssignId { peer: PeerId(3) }.encode().unwrap();
        assert_eq!(bytes, vec![0x02, 3, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_start_run_layout() {
        let bytes = NetMessage::StartRun {
            seed: -1,
            scene: "L1".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![0x03, 0xFF, 0xFF, 0xFF, 0xFF, 2, 0, b'L', b'1']);
    }

    #[test]
    fn test_pawn_transform_size_and_roundtrip() {
        let msg = NetMessage::PawnTransform {
            sender: PeerId(2),
            position: [1.0, 2.5, -3.0],
            rotation: [0.0, 0.7071, 0.0, 0.7071],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 1 + 8 + 7 * 4);
        assert_eq!(NetMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_appearance_roundtrip() {
        let msg = NetMessage::Appearance {
            sender: PeerId(5),
            payload: "YQ==|Yg==".to_string(),
        };
        assert_eq!(NetMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        assert_eq!(
            NetMessage::decode(&[0x7F, 1, 2]),
            Err(ProtocolError::UnknownTag(0x7F))
        );
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(NetMessage::decode(&[]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let result = NetMessage::decode(&[0x04, 1, 0, 0]);
        assert!(matches!(
            result,
            Err(ProtocolError::Malformed {
                tag: tags::PAWN_TRANSFORM,
                ..
            })
        ));
    }

    #[test]
    fn test_delivery_classes() {
        let pose = NetMessage::PawnTransform {
            sender: PeerId(1),
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        };
        assert_eq!(pose.delivery(), Delivery::Unreliable);
        assert_eq!(
            NetMessage::AckId { peer: PeerId(1) }.delivery(),
            Delivery::Reliable
        );
    }
}
