//! Protocol dialect translation module
//!
//! The proxy mirrors and replays packets in their canonical forms (the 7.0
//! shapes where two dialects exist) and downgrades per attached client at
//! send time. Translation is shape-only; no field values are invented.

use crate::protocol::codec::{ids, Frame};
use crate::protocol::packets::{WirePacket, WorldItem, WorldItem7};
use crate::protocol::ProtocolVersion;

/// Convert a pre-7 ground item to the 7.0 form
pub fn world_item_to_7(p: &WorldItem) -> WorldItem7 {
    WorldItem7 {
        item_type: 0,
        serial: p.serial,
        item_id: p.item_id,
        direction: p.direction.unwrap_or(0),
        amount: p.amount.unwrap_or(1),
        x: p.x,
        y: p.y,
        z: p.z,
        light_level: 0,
        hue: p.hue.unwrap_or(0),
        flags: p.flags.unwrap_or(0),
    }
}

/// Convert a 7.0 ground item to the pre-7 form
pub fn world_item_from_7(p: &WorldItem7) -> WorldItem {
    WorldItem {
        serial: p.serial,
        item_id: p.item_id,
        amount: Some(p.amount),
        x: p.x,
        y: p.y,
        direction: (p.direction != 0).then_some(p.direction),
        z: p.z,
        hue: (p.hue != 0).then_some(p.hue),
        flags: (p.flags != 0).then_some(p.flags),
    }
}

/// Rewrite a server-origin frame for a client speaking `dialect`
///
/// Canonical frames already match the 7.0 dialect; a V6 client needs the
/// ground-item form swapped and the widened fixed packets truncated to
/// their base headers.
pub fn downgrade(frame: &Frame, dialect: ProtocolVersion) -> Frame {
    if dialect == ProtocolVersion::V7 {
        return frame.clone();
    }

    match frame.id {
        ids::WORLD_ITEM_7 => match WorldItem7::parse(frame) {
            Ok(p) => world_item_from_7(&p).to_frame(),
            Err(_) => frame.clone(),
        },
        ids::CONTAINER_OPEN if frame.len() > 7 => Frame::new(frame.data.slice(..7)),
        ids::SUPPORTED_FEATURES if frame.len() > 3 => Frame::new(frame.data.slice(..3)),
        _ => frame.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ground_item_6() -> WorldItem {
        WorldItem {
            serial: 0x4000_0010,
            item_id: 0x0eed,
            amount: Some(100),
            x: 1400,
            y: 1700,
            direction: None,
            z: 0,
            hue: Some(0x44),
            flags: None,
        }
    }

    #[test]
    fn test_world_item_to_7() {
        let p7 = world_item_to_7(&ground_item_6());
        assert_eq!(p7.serial, 0x4000_0010);
        assert_eq!(p7.amount, 100);
        assert_eq!(p7.hue, 0x44);
        assert_eq!(p7.direction, 0);
        assert_eq!(p7.flags, 0);
    }

    #[test]
    fn test_world_item_to_7_defaults() {
        let mut p6 = ground_item_6();
        p6.amount = None;
        p6.hue = None;
        let p7 = world_item_to_7(&p6);
        assert_eq!(p7.amount, 1);
        assert_eq!(p7.hue, 0);
    }

    #[test]
    fn test_world_item_position_roundtrip() {
        let p7 = world_item_to_7(&ground_item_6());
        let back = world_item_from_7(&p7);
        assert_eq!(back.serial, 0x4000_0010);
        assert_eq!(back.x, 1400);
        assert_eq!(back.y, 1700);
        assert_eq!(back.amount, Some(100));
        assert_eq!(back.hue, Some(0x44));
    }

    #[test]
    fn test_downgrade_passthrough_for_v7() {
        let frame = world_item_to_7(&ground_item_6()).to_frame();
        let out = downgrade(&frame, ProtocolVersion::V7);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_downgrade_ground_item_for_v6() {
        let frame = world_item_to_7(&ground_item_6()).to_frame();
        let out = downgrade(&frame, ProtocolVersion::V6);
        assert_eq!(out.id, ids::WORLD_ITEM);
        let decoded = WorldItem::parse(&out).unwrap();
        assert_eq!(decoded.serial, 0x4000_0010);
        assert_eq!(decoded.x, 1400);
    }

    #[test]
    fn test_downgrade_truncates_widened_container_open() {
        let frame = Frame::new(Bytes::from_static(&[
            0x24, 0x40, 0x00, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x7d,
        ]));
        let out = downgrade(&frame, ProtocolVersion::V6);
        assert_eq!(out.len(), 7);
        assert_eq!(out.id, ids::CONTAINER_OPEN);
    }

    #[test]
    fn test_downgrade_leaves_unrelated_frames() {
        let frame = Frame::new(Bytes::from_static(&[0x73, 0x00]));
        let out = downgrade(&frame, ProtocolVersion::V6);
        assert_eq!(out, frame);
    }
}
