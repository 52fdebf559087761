//! Packet definitions module
//!
//! Typed forms of the protocol packets the proxy inspects, with
//! `decode`/`encode` against a [`PacketBuffer`]. Decoded structs hold
//! host-order fields; each `encode` re-emits the packet's native wire
//! layout, so a cached packet round-trips byte-exact. Packets the proxy
//! only stores and replays (season, light levels, targeting, map patches)
//! are carried as raw frames and have no typed form here.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::protocol::buffer::PacketBuffer;
use crate::protocol::codec::{ids, Frame};

/// Mask for the item-id field of a mobile equipment fragment; the high bit
/// signals a trailing hue field.
pub const ITEM_ID_MASK: u16 = 0x3fff;

/// A packet with a typed wire form
pub trait WirePacket: Sized {
    /// The packet command id
    const ID: u8;

    /// Decode the packet body; the buffer is positioned at the id byte
    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError>;

    /// Encode the whole packet, id and length prefix included
    fn encode(&self, buf: &mut PacketBuffer);

    /// Decode from a framed packet, checking the command id
    fn parse(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.id != Self::ID {
            return Err(ProtocolError::Malformed(format!(
                "expected packet {:#04x}, got {:#04x}",
                Self::ID,
                frame.id
            )));
        }
        let mut buf = PacketBuffer::from_bytes(&frame.data);
        Self::decode(&mut buf)
    }

    /// Encode to an owned frame
    fn to_frame(&self) -> Frame {
        let mut buf = PacketBuffer::with_capacity(64);
        self.encode(&mut buf);
        Frame::new(buf.freeze())
    }
}

// ============ Movement ============

/// Client walk request (0x02)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walk {
    /// Step direction; bit 0x80 marks a running step
    pub direction: u8,
    /// Client-side walk sequence
    pub seq: u8,
    /// Fastwalk prevention key
    pub fastwalk_key: u32,
}

impl WirePacket for Walk {
    const ID: u8 = ids::WALK;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            direction: buf.read_u8(),
            seq: buf.read_u8(),
            fastwalk_key: buf.read_u32(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u8(self.direction);
        buf.write_u8(self.seq);
        buf.write_u32(self.fastwalk_key);
    }
}

/// Server walk acknowledgement (0x22)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkAck {
    /// Sequence being acknowledged
    pub seq: u8,
    /// Player notoriety after the step
    pub notoriety: u8,
}

impl WirePacket for WalkAck {
    const ID: u8 = ids::WALK_ACK;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            seq: buf.read_u8(),
            notoriety: buf.read_u8(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u8(self.seq);
        buf.write_u8(self.notoriety);
    }
}

/// Server walk rejection (0x21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkCancel {
    /// Sequence being rejected
    pub seq: u8,
    /// Authoritative position after the rejection
    pub x: u16,
    /// Authoritative position after the rejection
    pub y: u16,
    /// Authoritative facing
    pub direction: u8,
    /// Authoritative elevation
    pub z: i8,
}

impl WirePacket for WalkCancel {
    const ID: u8 = ids::WALK_CANCEL;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            seq: buf.read_u8(),
            x: buf.read_u16(),
            y: buf.read_u16(),
            direction: buf.read_u8(),
            z: buf.read_i8(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u8(self.seq);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_u8(self.direction);
        buf.write_i8(self.z);
    }
}

// ============ Player ============

/// Login confirmation (0x1B); names the player mobile
///
/// The wire form carries `z` as a big-endian 16-bit field, unlike the
/// byte-sized `z` of [`MobileUpdate`]; `encode` preserves both layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Start {
    /// Serial of the player's mobile
    pub serial: u32,
    /// Body graphic
    pub body: u16,
    /// Position
    pub x: u16,
    /// Position
    pub y: u16,
    /// Elevation (16-bit on the wire)
    pub z: i16,
    /// Facing
    pub direction: u8,
    /// Map width advertised at login
    pub map_width: u16,
    /// Map height advertised at login
    pub map_height: u16,
}

impl WirePacket for Start {
    const ID: u8 = ids::START;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        let serial = buf.read_u32();
        buf.skip(4);
        let body = buf.read_u16();
        let x = buf.read_u16();
        let y = buf.read_u16();
        let z = buf.read_i16();
        let direction = buf.read_u8();
        buf.skip(9);
        let map_width = buf.read_u16();
        let map_height = buf.read_u16();
        Ok(Self {
            serial,
            body,
            x,
            y,
            z,
            direction,
            map_width,
            map_height,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
        buf.write_u32(0);
        buf.write_u16(self.body);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_i16(self.z);
        buf.write_u8(self.direction);
        buf.write_bytes(&[0; 9]);
        buf.write_u16(self.map_width);
        buf.write_u16(self.map_height);
        buf.write_bytes(&[0; 6]);
    }
}

/// Player mobile update (0x20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileUpdate {
    /// Mobile serial
    pub serial: u32,
    /// Body graphic
    pub body: u16,
    /// Skin hue
    pub hue: u16,
    /// Status flags
    pub flags: u8,
    /// Position
    pub x: u16,
    /// Position
    pub y: u16,
    /// Facing
    pub direction: u8,
    /// Elevation (byte-sized on the wire)
    pub z: i8,
}

impl WirePacket for MobileUpdate {
    const ID: u8 = ids::MOBILE_UPDATE;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        let serial = buf.read_u32();
        let body = buf.read_u16();
        buf.skip(1);
        let hue = buf.read_u16();
        let flags = buf.read_u8();
        let x = buf.read_u16();
        let y = buf.read_u16();
        buf.skip(2);
        let direction = buf.read_u8();
        let z = buf.read_i8();
        Ok(Self {
            serial,
            body,
            hue,
            flags,
            x,
            y,
            direction,
            z,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
        buf.write_u16(self.body);
        buf.write_u8(0);
        buf.write_u16(self.hue);
        buf.write_u8(self.flags);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_u16(0);
        buf.write_u8(self.direction);
        buf.write_i8(self.z);
    }
}

/// Zone/map position change (0x76)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneChange {
    /// New position
    pub x: u16,
    /// New position
    pub y: u16,
    /// New elevation
    pub z: i16,
    /// Server area origin
    pub server_x: u16,
    /// Server area origin
    pub server_y: u16,
    /// Map width of the new zone
    pub map_width: u16,
    /// Map height of the new zone
    pub map_height: u16,
}

impl WirePacket for ZoneChange {
    const ID: u8 = ids::ZONE_CHANGE;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        let x = buf.read_u16();
        let y = buf.read_u16();
        let z = buf.read_i16();
        buf.skip(1);
        let server_x = buf.read_u16();
        let server_y = buf.read_u16();
        let map_width = buf.read_u16();
        let map_height = buf.read_u16();
        Ok(Self {
            x,
            y,
            z,
            server_x,
            server_y,
            map_width,
            map_height,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_i16(self.z);
        buf.write_u8(0);
        buf.write_u16(self.server_x);
        buf.write_u16(self.server_y);
        buf.write_u16(self.map_width);
        buf.write_u16(self.map_height);
    }
}

// ============ Mobiles ============

/// One equipment entry embedded in a mobile-incoming packet
///
/// The wire fragment is variable width: a hue field is present only when
/// the high bit of the item id is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileItemFragment {
    /// Item serial
    pub serial: u32,
    /// Item graphic, already masked with [`ITEM_ID_MASK`]
    pub item_id: u16,
    /// Equipment layer
    pub layer: u8,
    /// Hue, when the fragment carried one
    pub hue: Option<u16>,
}

/// Full mobile state with equipment (0x78)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileIncoming {
    /// Mobile serial
    pub serial: u32,
    /// Body graphic
    pub body: u16,
    /// Position
    pub x: u16,
    /// Position
    pub y: u16,
    /// Elevation
    pub z: i8,
    /// Facing
    pub direction: u8,
    /// Skin hue
    pub hue: u16,
    /// Status flags
    pub flags: u8,
    /// Notoriety
    pub notoriety: u8,
    /// Equipped items
    pub items: Vec<MobileItemFragment>,
}

impl WirePacket for MobileIncoming {
    const ID: u8 = ids::MOBILE_INCOMING;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let serial = buf.read_u32();
        let body = buf.read_u16();
        let x = buf.read_u16();
        let y = buf.read_u16();
        let z = buf.read_i8();
        let direction = buf.read_u8();
        let hue = buf.read_u16();
        let flags = buf.read_u8();
        let notoriety = buf.read_u8();

        // Fragments run until a zero serial or the declared packet length
        let mut items = Vec::new();
        while buf.remaining() >= 4 {
            let item_serial = buf.read_u32();
            if item_serial == 0 {
                break;
            }
            if buf.remaining() < 3 {
                return Err(ProtocolError::Malformed(
                    "truncated mobile equipment fragment".into(),
                ));
            }
            let raw_id = buf.read_u16();
            let layer = buf.read_u8();
            let item_hue = if raw_id & 0x8000 != 0 {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Malformed(
                        "truncated mobile equipment hue".into(),
                    ));
                }
                Some(buf.read_u16())
            } else {
                None
            };
            items.push(MobileItemFragment {
                serial: item_serial,
                item_id: raw_id & ITEM_ID_MASK,
                layer,
                hue: item_hue,
            });
        }

        Ok(Self {
            serial,
            body,
            x,
            y,
            z,
            direction,
            hue,
            flags,
            notoriety,
            items,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0); // length, patched below
        buf.write_u32(self.serial);
        buf.write_u16(self.body);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_i8(self.z);
        buf.write_u8(self.direction);
        buf.write_u16(self.hue);
        buf.write_u8(self.flags);
        buf.write_u8(self.notoriety);
        for item in &self.items {
            buf.write_u32(item.serial);
            match item.hue {
                Some(hue) => {
                    buf.write_u16(item.item_id | 0x8000);
                    buf.write_u8(item.layer);
                    buf.write_u16(hue);
                }
                None => {
                    buf.write_u16(item.item_id);
                    buf.write_u8(item.layer);
                }
            }
        }
        buf.write_u32(0);
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Mobile status header (0x11)
///
/// Only the header is decoded; the stat block that follows varies with
/// `flags` and is carried as an opaque tail for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileStatus {
    /// Mobile serial
    pub serial: u32,
    /// Mobile name
    pub name: String,
    /// Current hit points
    pub hits: u16,
    /// Maximum hit points
    pub hits_max: u16,
    /// Whether the client may rename this mobile
    pub renameable: u8,
    /// Layout richness indicator; higher values carry more stat fields
    pub flags: u8,
    /// Undecoded stat block
    pub tail: Bytes,
}

impl WirePacket for MobileStatus {
    const ID: u8 = ids::MOBILE_STATUS;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let serial = buf.read_u32();
        let name = buf.read_string_fixed(30);
        let hits = buf.read_u16();
        let hits_max = buf.read_u16();
        let renameable = buf.read_u8();
        let flags = buf.read_u8();
        let tail = buf.read_remaining();
        Ok(Self {
            serial,
            name,
            hits,
            hits_max,
            renameable,
            flags,
            tail,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        buf.write_u32(self.serial);
        buf.write_string_fixed(&self.name, 30);
        buf.write_u16(self.hits);
        buf.write_u16(self.hits_max);
        buf.write_u8(self.renameable);
        buf.write_u8(self.flags);
        buf.write_bytes(&self.tail);
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Mobile movement seen by the player (0x77)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobileMoving {
    /// Mobile serial
    pub serial: u32,
    /// Body graphic
    pub body: u16,
    /// Position
    pub x: u16,
    /// Position
    pub y: u16,
    /// Elevation
    pub z: i8,
    /// Facing
    pub direction: u8,
    /// Skin hue
    pub hue: u16,
    /// Status flags
    pub flags: u8,
    /// Notoriety
    pub notoriety: u8,
}

impl WirePacket for MobileMoving {
    const ID: u8 = ids::MOBILE_MOVING;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            serial: buf.read_u32(),
            body: buf.read_u16(),
            x: buf.read_u16(),
            y: buf.read_u16(),
            z: buf.read_i8(),
            direction: buf.read_u8(),
            hue: buf.read_u16(),
            flags: buf.read_u8(),
            notoriety: buf.read_u8(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
        buf.write_u16(self.body);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_i8(self.z);
        buf.write_u8(self.direction);
        buf.write_u16(self.hue);
        buf.write_u8(self.flags);
        buf.write_u8(self.notoriety);
    }
}

// ============ Items ============

/// Item on the ground, pre-7 dialect (0x1A)
///
/// The wire form is densely packed: optional fields are flagged in the high
/// bits of the serial and coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldItem {
    /// Item serial, high flag bit already stripped
    pub serial: u32,
    /// Item graphic
    pub item_id: u16,
    /// Stack amount, when sent
    pub amount: Option<u16>,
    /// Position, flag bits stripped
    pub x: u16,
    /// Position, flag bits stripped
    pub y: u16,
    /// Facing, when sent
    pub direction: Option<u8>,
    /// Elevation
    pub z: i8,
    /// Hue, when sent
    pub hue: Option<u16>,
    /// Item flags, when sent
    pub flags: Option<u8>,
}

impl WirePacket for WorldItem {
    const ID: u8 = ids::WORLD_ITEM;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let raw_serial = buf.read_u32();
        let item_id = buf.read_u16();
        let amount = if raw_serial & 0x8000_0000 != 0 {
            Some(buf.read_u16())
        } else {
            None
        };
        let raw_x = buf.read_u16();
        let raw_y = buf.read_u16();
        let direction = if raw_x & 0x8000 != 0 {
            Some(buf.read_u8())
        } else {
            None
        };
        let z = buf.read_i8();
        let hue = if raw_y & 0x8000 != 0 {
            Some(buf.read_u16())
        } else {
            None
        };
        let flags = if raw_y & 0x4000 != 0 {
            Some(buf.read_u8())
        } else {
            None
        };
        Ok(Self {
            serial: raw_serial & 0x7fff_ffff,
            item_id,
            amount,
            x: raw_x & 0x7fff,
            y: raw_y & 0x3fff,
            direction,
            z,
            hue,
            flags,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        let raw_serial = if self.amount.is_some() {
            self.serial | 0x8000_0000
        } else {
            self.serial
        };
        buf.write_u32(raw_serial);
        buf.write_u16(self.item_id);
        if let Some(amount) = self.amount {
            buf.write_u16(amount);
        }
        let mut raw_x = self.x;
        if self.direction.is_some() {
            raw_x |= 0x8000;
        }
        let mut raw_y = self.y;
        if self.hue.is_some() {
            raw_y |= 0x8000;
        }
        if self.flags.is_some() {
            raw_y |= 0x4000;
        }
        buf.write_u16(raw_x);
        buf.write_u16(raw_y);
        if let Some(direction) = self.direction {
            buf.write_u8(direction);
        }
        buf.write_i8(self.z);
        if let Some(hue) = self.hue {
            buf.write_u16(hue);
        }
        if let Some(flags) = self.flags {
            buf.write_u8(flags);
        }
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Item on the ground, 7.0 dialect (0xF3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldItem7 {
    /// Object kind (0 item, 2 multi)
    pub item_type: u8,
    /// Item serial
    pub serial: u32,
    /// Item graphic
    pub item_id: u16,
    /// Facing
    pub direction: u8,
    /// Stack amount
    pub amount: u16,
    /// Position
    pub x: u16,
    /// Position
    pub y: u16,
    /// Elevation
    pub z: i8,
    /// Light level
    pub light_level: u8,
    /// Hue
    pub hue: u16,
    /// Item flags
    pub flags: u8,
}

impl WirePacket for WorldItem7 {
    const ID: u8 = ids::WORLD_ITEM_7;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3); // id plus the constant 0x0001 marker
        let item_type = buf.read_u8();
        let serial = buf.read_u32();
        let item_id = buf.read_u16();
        let direction = buf.read_u8();
        let amount = buf.read_u16();
        buf.skip(2); // amount repeat
        let x = buf.read_u16();
        let y = buf.read_u16();
        let z = buf.read_i8();
        let light_level = buf.read_u8();
        let hue = buf.read_u16();
        let flags = buf.read_u8();
        Ok(Self {
            item_type,
            serial,
            item_id,
            direction,
            amount,
            x,
            y,
            z,
            light_level,
            hue,
            flags,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0x0001);
        buf.write_u8(self.item_type);
        buf.write_u32(self.serial);
        buf.write_u16(self.item_id);
        buf.write_u8(self.direction);
        buf.write_u16(self.amount);
        buf.write_u16(self.amount);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_i8(self.z);
        buf.write_u8(self.light_level);
        buf.write_u16(self.hue);
        buf.write_u8(self.flags);
    }
}

/// Item equipped on a mobile (0x2E)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Equip {
    /// Item serial
    pub serial: u32,
    /// Item graphic
    pub item_id: u16,
    /// Equipment layer
    pub layer: u8,
    /// Serial of the wearing mobile
    pub parent_serial: u32,
    /// Hue
    pub hue: u16,
}

impl WirePacket for Equip {
    const ID: u8 = ids::EQUIP;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        let serial = buf.read_u32();
        let item_id = buf.read_u16();
        buf.skip(1);
        let layer = buf.read_u8();
        let parent_serial = buf.read_u32();
        let hue = buf.read_u16();
        Ok(Self {
            serial,
            item_id,
            layer,
            parent_serial,
            hue,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
        buf.write_u16(self.item_id);
        buf.write_u8(0);
        buf.write_u8(self.layer);
        buf.write_u32(self.parent_serial);
        buf.write_u16(self.hue);
    }
}

/// Open container gump (0x24); the 7.0.9 dialect appends a two-byte tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOpen {
    /// Container item serial
    pub serial: u32,
    /// Gump graphic id
    pub gump_id: u16,
}

impl WirePacket for ContainerOpen {
    const ID: u8 = ids::CONTAINER_OPEN;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        // A 7.0.9 frame is two bytes longer; the base header is identical
        // and the tail is not mirrored.
        buf.skip(1);
        Ok(Self {
            serial: buf.read_u32(),
            gump_id: buf.read_u16(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
        buf.write_u16(self.gump_id);
    }
}

/// One item entry of a container packet (shared by 0x25 and 0x3C)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerItem {
    /// Item serial
    pub serial: u32,
    /// Item graphic
    pub item_id: u16,
    /// Stack amount
    pub amount: u16,
    /// Position inside the container gump
    pub x: u16,
    /// Position inside the container gump
    pub y: u16,
    /// Grid slot
    pub grid_index: u8,
    /// Serial of the containing item
    pub parent_serial: u32,
    /// Hue
    pub hue: u16,
}

impl ContainerItem {
    fn read(buf: &mut PacketBuffer) -> Self {
        let serial = buf.read_u32();
        let item_id = buf.read_u16();
        buf.skip(1);
        let amount = buf.read_u16();
        let x = buf.read_u16();
        let y = buf.read_u16();
        let grid_index = buf.read_u8();
        let parent_serial = buf.read_u32();
        let hue = buf.read_u16();
        Self {
            serial,
            item_id,
            amount,
            x,
            y,
            grid_index,
            parent_serial,
            hue,
        }
    }

    fn write(&self, buf: &mut PacketBuffer) {
        buf.write_u32(self.serial);
        buf.write_u16(self.item_id);
        buf.write_u8(0);
        buf.write_u16(self.amount);
        buf.write_u16(self.x);
        buf.write_u16(self.y);
        buf.write_u8(self.grid_index);
        buf.write_u32(self.parent_serial);
        buf.write_u16(self.hue);
    }

    /// Wire width of one entry
    pub const WIDTH: usize = 20;
}

/// Single item added to a container (0x25)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerUpdate {
    /// The item entry
    pub item: ContainerItem,
}

impl WirePacket for ContainerUpdate {
    const ID: u8 = ids::CONTAINER_UPDATE;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            item: ContainerItem::read(buf),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        self.item.write(buf);
    }
}

/// Full container inventory (0x3C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerContent {
    /// The container's items; all entries share one parent serial
    pub items: Vec<ContainerItem>,
}

impl WirePacket for ContainerContent {
    const ID: u8 = ids::CONTAINER_CONTENT;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let num = buf.read_u16() as usize;
        if buf.remaining() < num * ContainerItem::WIDTH {
            return Err(ProtocolError::Malformed(format!(
                "container content declares {num} items but carries {} bytes",
                buf.remaining()
            )));
        }
        let mut items = Vec::with_capacity(num);
        for _ in 0..num {
            items.push(ContainerItem::read(buf));
        }
        Ok(Self { items })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        buf.write_u16(self.items.len() as u16);
        for item in &self.items {
            item.write(buf);
        }
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Remove entity by serial (0x1D)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remove {
    /// Serial to remove
    pub serial: u32,
}

impl WirePacket for Remove {
    const ID: u8 = ids::REMOVE;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            serial: buf.read_u32(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.serial);
    }
}

// ============ Speech ============

/// ASCII speech (0x1C)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakAscii {
    /// Speaking entity, or 0xffffffff for system text
    pub serial: u32,
    /// Body graphic of the speaker
    pub graphic: u16,
    /// Speech kind (0 say, 1 broadcast, 6 label, ...)
    pub speech_type: u8,
    /// Text hue
    pub hue: u16,
    /// Font
    pub font: u16,
    /// Speaker name
    pub name: String,
    /// The spoken text
    pub text: String,
}

impl WirePacket for SpeakAscii {
    const ID: u8 = ids::SPEAK_ASCII;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let serial = buf.read_u32();
        let graphic = buf.read_u16();
        let speech_type = buf.read_u8();
        let hue = buf.read_u16();
        let font = buf.read_u16();
        let name = buf.read_string_fixed(30);
        let text = buf.read_string();
        Ok(Self {
            serial,
            graphic,
            speech_type,
            hue,
            font,
            name,
            text,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        buf.write_u32(self.serial);
        buf.write_u16(self.graphic);
        buf.write_u8(self.speech_type);
        buf.write_u16(self.hue);
        buf.write_u16(self.font);
        buf.write_string_fixed(&self.name, 30);
        buf.write_string(&self.text);
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Extract the text of a unicode speech request (0xAD)
///
/// Tokenized requests (type bit 0xc0) carry a keyword list the proxy does
/// not parse; those return `None`.
pub fn unicode_speech_text(frame: &Frame) -> Option<String> {
    let mut buf = PacketBuffer::from_bytes(&frame.data);
    buf.skip(3);
    let speech_type = buf.read_u8();
    if speech_type & 0xc0 != 0 {
        return None;
    }
    buf.skip(8); // hue, font, language tag
    let mut text = String::new();
    while buf.remaining() >= 2 {
        let unit = buf.read_u16();
        if unit == 0 {
            break;
        }
        text.push(char::from_u32(unit as u32)?);
    }
    Some(text)
}

// ============ Login phase ============

/// Account login on the login-server socket (0x80)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLogin {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl WirePacket for AccountLogin {
    const ID: u8 = ids::ACCOUNT_LOGIN;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            username: buf.read_string_fixed(30),
            password: buf.read_string_fixed(30),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_string_fixed(&self.username, 30);
        buf.write_string_fixed(&self.password, 30);
        buf.write_u8(0);
    }
}

/// Game server login after a relay (0x91)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLogin {
    /// Token from the relay packet
    pub auth_id: u32,
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl WirePacket for GameLogin {
    const ID: u8 = ids::GAME_LOGIN;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            auth_id: buf.read_u32(),
            username: buf.read_string_fixed(30),
            password: buf.read_string_fixed(30),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(self.auth_id);
        buf.write_string_fixed(&self.username, 30);
        buf.write_string_fixed(&self.password, 30);
    }
}

/// Redirect to a game server (0x8C)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relay {
    /// Game server address
    pub ip: [u8; 4],
    /// Game server port
    pub port: u16,
    /// Token to present in the follow-up game login
    pub auth_id: u32,
}

impl WirePacket for Relay {
    const ID: u8 = ids::RELAY;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        let mut ip = [0u8; 4];
        for octet in ip.iter_mut() {
            *octet = buf.read_u8();
        }
        Ok(Self {
            ip,
            port: buf.read_u16(),
            auth_id: buf.read_u32(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_bytes(&self.ip);
        buf.write_u16(self.port);
        buf.write_u32(self.auth_id);
    }
}

/// Server select on the login socket (0xA0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSelect {
    /// Index into the server list
    pub index: u16,
}

impl WirePacket for ServerSelect {
    const ID: u8 = ids::SERVER_SELECT;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            index: buf.read_u16(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(self.index);
    }
}

/// One game server advertised by the login server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListEntry {
    /// List index, echoed in the select packet
    pub index: u16,
    /// Display name
    pub name: String,
    /// Address the ping gauge uses
    pub ip: [u8; 4],
}

/// Game server list (0xA8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerList {
    /// Advertised servers
    pub entries: Vec<ServerListEntry>,
}

impl WirePacket for ServerList {
    const ID: u8 = ids::SERVER_LIST;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        buf.skip(1); // flags
        let count = buf.read_u16() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 40 {
                return Err(ProtocolError::Malformed(
                    "truncated server list entry".into(),
                ));
            }
            let index = buf.read_u16();
            let name = buf.read_string_fixed(32);
            buf.skip(2); // fill percentage, timezone
            let mut ip = [0u8; 4];
            // The gauge address is byte-reversed on the wire
            for octet in ip.iter_mut().rev() {
                *octet = buf.read_u8();
            }
            entries.push(ServerListEntry { index, name, ip });
        }
        Ok(Self { entries })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        buf.write_u8(0x5d);
        buf.write_u16(self.entries.len() as u16);
        for entry in &self.entries {
            buf.write_u16(entry.index);
            buf.write_string_fixed(&entry.name, 32);
            buf.write_u8(0);
            buf.write_u8(0);
            for octet in entry.ip.iter().rev() {
                buf.write_u8(*octet);
            }
        }
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Character list after game login (0xA9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterList {
    /// Character names by slot; empty slots are empty strings
    pub names: Vec<String>,
    /// Feature flags advertised with the list
    pub flags: u32,
}

impl WirePacket for CharacterList {
    const ID: u8 = ids::CHARACTER_LIST;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(3);
        let count = buf.read_u8() as usize;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 60 {
                return Err(ProtocolError::Malformed(
                    "truncated character list entry".into(),
                ));
            }
            names.push(buf.read_string_fixed(30));
            buf.skip(30); // password field, always zero
        }
        let city_count = buf.read_u8() as usize;
        buf.skip(city_count * 63);
        let flags = buf.read_u32();
        Ok(Self { names, flags })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(0);
        buf.write_u8(self.names.len() as u8);
        for name in &self.names {
            buf.write_string_fixed(name, 30);
            buf.write_string_fixed("", 30);
        }
        buf.write_u8(0); // no starting cities on an attach list
        buf.write_u32(self.flags);
        buf.patch_u16(1, buf.len() as u16);
    }
}

/// Character select after the relay (0x5D)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayCharacter {
    /// Selected character name
    pub name: String,
    /// Client feature flags
    pub client_flags: u32,
    /// Character slot
    pub slot: u32,
    /// Client address as reported by the client
    pub client_ip: u32,
}

impl WirePacket for PlayCharacter {
    const ID: u8 = ids::PLAY_CHARACTER;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        buf.skip(4); // 0xedededed pattern
        let name = buf.read_string_fixed(30);
        buf.skip(2);
        let client_flags = buf.read_u32();
        buf.skip(4);
        buf.skip(4); // login count
        buf.skip(16);
        let slot = buf.read_u32();
        let client_ip = buf.read_u32();
        Ok(Self {
            name,
            client_flags,
            slot,
            client_ip,
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u32(0xedededed);
        buf.write_string_fixed(&self.name, 30);
        buf.write_u16(0);
        buf.write_u32(self.client_flags);
        buf.write_u32(0);
        buf.write_u32(0);
        buf.write_bytes(&[0; 16]);
        buf.write_u32(self.slot);
        buf.write_u32(self.client_ip);
    }
}

/// Supported feature flags (0xB9), pre-7 form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFeatures {
    /// Feature bitfield
    pub flags: u16,
}

impl WirePacket for SupportedFeatures {
    const ID: u8 = ids::SUPPORTED_FEATURES;

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buf.skip(1);
        Ok(Self {
            flags: buf.read_u16(),
        })
    }

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_u8(Self::ID);
        buf.write_u16(self.flags);
    }
}

/// Extract the version string from a client-version report (0xBD)
pub fn client_version_string(frame: &Frame) -> Option<String> {
    if frame.len() <= 3 {
        return None;
    }
    let mut buf = PacketBuffer::from_bytes(&frame.data);
    buf.skip(3);
    Some(buf.read_string())
}

/// Read the sub-command of an extended packet (0xBF)
pub fn extended_subcommand(frame: &Frame) -> Option<u16> {
    if frame.len() < 5 {
        return None;
    }
    Some(u16::from_be_bytes([frame.data[3], frame.data[4]]))
}
