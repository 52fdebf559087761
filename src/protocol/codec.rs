//! Packet framing module
//!
//! Splits the raw TCP byte stream into whole protocol packets using the UO
//! packet-length table. Every packet starts with a one-byte command id; the
//! table says whether the body length is fixed or carried in a big-endian
//! short directly after the id. Downstream consumers always receive fully
//! framed, length-validated packets.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::buffer::MAX_PACKET_SIZE;
use crate::protocol::ProtocolVersion;

/// Packet command ids used by the proxy
///
/// Only the ids the proxy inspects get names; everything else is forwarded
/// by table lookup alone.
pub mod ids {
    /// Client movement request
    pub const WALK: u8 = 0x02;
    /// Mobile status (stats window data)
    pub const MOBILE_STATUS: u8 = 0x11;
    /// Item on the ground (pre-7 dialect)
    pub const WORLD_ITEM: u8 = 0x1a;
    /// Login confirmation, names the player mobile
    pub const START: u8 = 0x1b;
    /// ASCII speech
    pub const SPEAK_ASCII: u8 = 0x1c;
    /// Remove entity by serial
    pub const REMOVE: u8 = 0x1d;
    /// Player mobile update
    pub const MOBILE_UPDATE: u8 = 0x20;
    /// Movement rejected
    pub const WALK_CANCEL: u8 = 0x21;
    /// Movement acknowledged
    pub const WALK_ACK: u8 = 0x22;
    /// Open container gump
    pub const CONTAINER_OPEN: u8 = 0x24;
    /// Single item added to a container
    pub const CONTAINER_UPDATE: u8 = 0x25;
    /// Equip item on a mobile
    pub const EQUIP: u8 = 0x2e;
    /// Full container inventory
    pub const CONTAINER_CONTENT: u8 = 0x3c;
    /// Personal light level
    pub const PERSONAL_LIGHT_LEVEL: u8 = 0x4e;
    /// Global light level
    pub const GLOBAL_LIGHT_LEVEL: u8 = 0x4f;
    /// Character select after relay
    pub const PLAY_CHARACTER: u8 = 0x5d;
    /// Targeting cursor
    pub const TARGET: u8 = 0x6c;
    /// War mode toggle
    pub const WAR_MODE: u8 = 0x72;
    /// Ping
    pub const PING: u8 = 0x73;
    /// Zone/map position change
    pub const ZONE_CHANGE: u8 = 0x76;
    /// Mobile movement seen
    pub const MOBILE_MOVING: u8 = 0x77;
    /// Full mobile state with equipment
    pub const MOBILE_INCOMING: u8 = 0x78;
    /// Account login (login server phase)
    pub const ACCOUNT_LOGIN: u8 = 0x80;
    /// Redirect to game server
    pub const RELAY: u8 = 0x8c;
    /// Game server login after relay
    pub const GAME_LOGIN: u8 = 0x91;
    /// Server select
    pub const SERVER_SELECT: u8 = 0xa0;
    /// Server list
    pub const SERVER_LIST: u8 = 0xa8;
    /// Character list
    pub const CHARACTER_LIST: u8 = 0xa9;
    /// Unicode speech (client request)
    pub const SPEAK_UNICODE_REQUEST: u8 = 0xad;
    /// Supported feature flags
    pub const SUPPORTED_FEATURES: u8 = 0xb9;
    /// Season
    pub const SEASON: u8 = 0xbc;
    /// Client version report/request
    pub const CLIENT_VERSION: u8 = 0xbd;
    /// Extended packet (map change, map patches, ...)
    pub const EXTENDED: u8 = 0xbf;
    /// Extended login seed
    pub const EXTENDED_SEED: u8 = 0xef;
    /// Item on the ground (7.0 dialect)
    pub const WORLD_ITEM_7: u8 = 0xf3;
}

/// Extended-packet (0xBF) sub-commands the mirror consumes
pub mod extended {
    /// Map change
    pub const MAP_CHANGE: u16 = 0x0008;
    /// Static map patches
    pub const MAP_PATCHES: u16 = 0x0018;
}

/// Wire length class of a packet id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Fixed total size including the id byte
    Fixed(usize),
    /// Big-endian u16 total size at offset 1
    Variable,
    /// Not in the table
    Unknown,
}

impl PacketLength {
    /// Get the fixed size value, if applicable
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            PacketLength::Fixed(size) => Some(*size),
            _ => None,
        }
    }
}

/// Look up the wire length class for a packet id
///
/// Covers the classic table as spoken by 6.x/7.x clients. Ids absent from
/// the table cannot be framed and poison the stream.
pub fn packet_length(id: u8) -> PacketLength {
    use PacketLength::{Fixed, Variable};

    match id {
        0x00 => Fixed(104),
        0x01 => Fixed(5),
        0x02 => Fixed(7),
        0x03 => Variable,
        0x05 => Fixed(5),
        0x06 => Fixed(5),
        0x07 => Fixed(7),
        0x08 => Fixed(14),
        0x09 => Fixed(5),
        0x0b => Fixed(7),
        0x11 => Variable,
        0x12 => Variable,
        0x13 => Fixed(10),
        0x17 => Variable,
        0x1a => Variable,
        0x1b => Fixed(37),
        0x1c => Variable,
        0x1d => Fixed(5),
        0x20 => Fixed(19),
        0x21 => Fixed(8),
        0x22 => Fixed(3),
        0x23 => Fixed(26),
        0x24 => Fixed(7),
        0x25 => Fixed(21),
        0x26 => Fixed(5),
        0x27 => Fixed(2),
        0x28 => Fixed(5),
        0x2c => Fixed(2),
        0x2d => Fixed(17),
        0x2e => Fixed(15),
        0x2f => Fixed(10),
        0x34 => Fixed(10),
        0x38 => Fixed(7),
        0x3a => Variable,
        0x3b => Variable,
        0x3c => Variable,
        0x4e => Fixed(6),
        0x4f => Fixed(2),
        0x53 => Fixed(2),
        0x54 => Fixed(12),
        0x55 => Fixed(1),
        0x56 => Fixed(11),
        0x5b => Fixed(4),
        0x5d => Fixed(73),
        0x65 => Fixed(4),
        0x66 => Variable,
        0x6c => Fixed(19),
        0x6d => Fixed(3),
        0x6e => Fixed(14),
        0x6f => Variable,
        0x70 => Fixed(28),
        0x71 => Variable,
        0x72 => Fixed(5),
        0x73 => Fixed(2),
        0x74 => Variable,
        0x75 => Fixed(35),
        0x76 => Fixed(16),
        0x77 => Fixed(17),
        0x78 => Variable,
        0x7c => Variable,
        0x80 => Fixed(62),
        0x82 => Fixed(2),
        0x83 => Fixed(39),
        0x85 => Fixed(2),
        0x86 => Variable,
        0x88 => Fixed(66),
        0x89 => Variable,
        0x8c => Fixed(11),
        0x90 => Fixed(19),
        0x91 => Fixed(65),
        0x93 => Fixed(99),
        0x95 => Fixed(9),
        0x97 => Fixed(2),
        0x98 => Variable,
        0x99 => Fixed(26),
        0x9b => Fixed(258),
        0x9e => Variable,
        0xa0 => Fixed(3),
        0xa1 => Fixed(9),
        0xa2 => Fixed(9),
        0xa3 => Fixed(9),
        0xa4 => Fixed(149),
        0xa5 => Variable,
        0xa6 => Variable,
        0xa7 => Fixed(4),
        0xa8 => Variable,
        0xa9 => Variable,
        0xaa => Fixed(5),
        0xab => Variable,
        0xad => Variable,
        0xae => Variable,
        0xaf => Fixed(13),
        0xb0 => Variable,
        0xb1 => Variable,
        0xb2 => Variable,
        0xb5 => Fixed(64),
        0xb6 => Fixed(9),
        0xb7 => Variable,
        0xb8 => Variable,
        0xb9 => Fixed(3),
        0xba => Fixed(6),
        0xbb => Fixed(9),
        0xbc => Fixed(3),
        0xbd => Variable,
        0xbf => Variable,
        0xc1 => Variable,
        0xc8 => Fixed(2),
        0xcc => Variable,
        0xd1 => Fixed(2),
        0xd6 => Variable,
        0xd7 => Variable,
        0xd9 => Fixed(268),
        0xdc => Fixed(9),
        0xdd => Variable,
        0xdf => Variable,
        0xe2 => Fixed(10),
        0xef => Fixed(21),
        0xf0 => Variable,
        0xf3 => Fixed(24),
        0xf5 => Fixed(21),
        _ => PacketLength::Unknown,
    }
}

/// Look up the wire length class for a packet id under a specific dialect
///
/// A few fixed packets widened in the 7.0.9 protocol; everything else is
/// shared between dialects.
pub fn packet_length_for(protocol: ProtocolVersion, id: u8) -> PacketLength {
    match (protocol, id) {
        (ProtocolVersion::V7, ids::CONTAINER_OPEN) => PacketLength::Fixed(9),
        (ProtocolVersion::V7, ids::SUPPORTED_FEATURES) => PacketLength::Fixed(5),
        _ => packet_length(id),
    }
}

/// A fully framed protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet command id
    pub id: u8,
    /// Complete packet bytes, id and length prefix included
    pub data: Bytes,
}

impl Frame {
    /// Wrap already-framed bytes
    pub fn new(data: Bytes) -> Self {
        Self { id: data[0], data }
    }

    /// Body length including the id byte
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes (never true for a decoded frame)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Incremental frame decoder over an accumulating byte buffer
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Dialect the peer speaks; affects the widened 7.0.9 packets
    protocol: ProtocolVersion,
}

impl FrameDecoder {
    /// Create a new decoder for the default (7.x) dialect
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder for a specific dialect
    pub fn with_protocol(protocol: ProtocolVersion) -> Self {
        Self { protocol }
    }

    /// Switch the dialect mid-stream (after a client version report)
    pub fn set_protocol(&mut self, protocol: ProtocolVersion) {
        self.protocol = protocol;
    }

    /// Try to split one whole packet off the front of `buf`
    ///
    /// Returns `Ok(None)` when more bytes are needed. The consumed bytes are
    /// removed from `buf`.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let id = buf[0];
        let total = match packet_length_for(self.protocol, id) {
            PacketLength::Fixed(size) => size,
            PacketLength::Variable => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                let size = u16::from_be_bytes([buf[1], buf[2]]) as usize;
                if size < 3 {
                    return Err(ProtocolError::InvalidLength {
                        id,
                        expected: 3,
                        actual: size,
                    });
                }
                size
            }
            PacketLength::Unknown => {
                return Err(ProtocolError::UnknownPacket(id));
            }
        };

        if total > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: total,
                max: MAX_PACKET_SIZE,
            });
        }

        if buf.len() < total {
            return Ok(None);
        }

        let data = buf.split_to(total).freeze();
        Ok(Some(Frame { id, data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_table() {
        assert_eq!(packet_length(ids::WALK), PacketLength::Fixed(7));
        assert_eq!(packet_length(ids::START).fixed_size(), Some(37));
        assert_eq!(packet_length(ids::MOBILE_STATUS).fixed_size(), None);
        assert_eq!(packet_length(ids::WALK_ACK), PacketLength::Fixed(3));
        assert_eq!(packet_length(ids::WALK_CANCEL), PacketLength::Fixed(8));
        assert_eq!(packet_length(ids::START), PacketLength::Fixed(37));
        assert_eq!(packet_length(ids::MOBILE_INCOMING), PacketLength::Variable);
        assert_eq!(packet_length(ids::WORLD_ITEM_7), PacketLength::Fixed(24));
        assert_eq!(packet_length(0x04), PacketLength::Unknown);
    }

    #[test]
    fn test_length_table_dialects() {
        assert_eq!(
            packet_length_for(ProtocolVersion::V6, ids::CONTAINER_OPEN),
            PacketLength::Fixed(7)
        );
        assert_eq!(
            packet_length_for(ProtocolVersion::V7, ids::CONTAINER_OPEN),
            PacketLength::Fixed(9)
        );
        assert_eq!(
            packet_length_for(ProtocolVersion::V7, ids::SUPPORTED_FEATURES),
            PacketLength::Fixed(5)
        );
        assert_eq!(
            packet_length_for(ProtocolVersion::V7, ids::WALK),
            PacketLength::Fixed(7)
        );
    }

    #[test]
    fn test_decode_fixed_packet() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x73u8, 0x01, 0x1d, 0x40, 0x00, 0x01, 0x00][..]);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.id, ids::PING);
        assert_eq!(frame.data.as_ref(), &[0x73, 0x01]);

        // Next packet in the same buffer
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.id, ids::REMOVE);
        assert_eq!(frame.len(), 5);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_decode_partial_fixed() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x02u8, 0x01, 0x00][..]);

        // Walk needs 7 bytes, only 3 present
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&[0, 0, 0, 0]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.id, ids::WALK);
        assert_eq!(frame.len(), 7);
    }

    #[test]
    fn test_decode_variable_packet() {
        let decoder = FrameDecoder::new();
        // 0x1c speech, declared length 9
        let mut buf = BytesMut::from(&[0x1cu8, 0x00, 0x09, 1, 2, 3, 4, 5][..]);

        // One byte short
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[6]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.id, ids::SPEAK_ASCII);
        assert_eq!(frame.len(), 9);
    }

    #[test]
    fn test_decode_variable_needs_length_bytes() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x78u8, 0x00][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_id() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x04u8, 0x00][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::UnknownPacket(0x04))
        ));
    }

    #[test]
    fn test_decode_undersized_variable_length() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x78u8, 0x00, 0x02, 0x00][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::InvalidLength { id: 0x78, .. })
        ));
    }
}
