//! Attach replay module
//!
//! Synthesizes a stream of server-origin packets from the world mirror
//! sufficient to bring a freshly attached client to parity with the live
//! session. Frames are emitted in their canonical (7.0) forms; per-client
//! dialect translation happens at send time.

use crate::protocol::codec::Frame;
use crate::protocol::packets::{ContainerUpdate, WirePacket};
use crate::world::{ItemPlacement, WorldMirror};

/// Build the bootstrap packet stream for one attaching client
///
/// The order matters: the client must know the player before the world,
/// mobiles before their equipment, and containers before their contents.
/// An out-of-game mirror yields no frames.
pub fn build_replay(world: &WorldMirror) -> Vec<Frame> {
    let Some(start) = world.start.as_ref() else {
        return Vec::new();
    };

    let mut frames = Vec::new();
    frames.push(start.to_frame());

    // Map and ambience
    for cached in [
        world.map_change.as_ref(),
        world.map_patches.as_ref(),
        world.season.as_ref(),
        world.global_light_level.as_ref(),
        world.personal_light_level.as_ref(),
        world.war_mode.as_ref(),
        world.target.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        frames.push(cached.clone());
    }

    // The player's own mobile
    if let Some(update) = world.mobile_update.as_ref() {
        frames.push(update.to_frame());
    }
    if let Some(incoming) = world
        .mobiles
        .find(start.serial)
        .and_then(|m| m.incoming.as_ref())
    {
        frames.push(incoming.to_frame());
    }

    // Every other mobile, each followed by its equipment
    for mobile in world.mobiles.iter() {
        if mobile.serial == start.serial {
            continue;
        }
        let Some(incoming) = mobile.incoming.as_ref() else {
            continue;
        };
        frames.push(incoming.to_frame());

        for item in world.items.children_of(mobile.serial) {
            if let ItemPlacement::Equipped(equip) = &item.placement {
                frames.push(equip.to_frame());
            }
        }
    }

    // Ground items
    for item in world.items.iter() {
        if let ItemPlacement::Ground(ground) = &item.placement {
            frames.push(ground.to_frame());
        }
    }

    // Opened containers, then their contents
    for item in world.items.iter() {
        let Some(container_open) = item.container_open.as_ref() else {
            continue;
        };
        frames.push(container_open.to_frame());

        for child in world.items.children_of(item.serial) {
            if let ItemPlacement::Contained(fragment) = &child.placement {
                frames.push(ContainerUpdate { item: *fragment }.to_frame());
            }
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::ids;
    use crate::protocol::packets::{
        ContainerContent, ContainerItem, ContainerOpen, MobileIncoming, MobileItemFragment, Start,
        WorldItem7,
    };

    fn populated_world() -> WorldMirror {
        let mut world = WorldMirror::new();
        world.start(&Start {
            serial: 0x0000_0001,
            body: 0x190,
            x: 1400,
            y: 1700,
            z: 0,
            direction: 0,
            map_width: 6144,
            map_height: 4096,
        });
        // The player and one other mobile with an equipped item
        world.mobile_incoming(&MobileIncoming {
            serial: 0x0000_0001,
            body: 0x190,
            x: 1400,
            y: 1700,
            z: 0,
            direction: 0,
            hue: 0,
            flags: 0,
            notoriety: 1,
            items: Vec::new(),
        });
        world.mobile_incoming(&MobileIncoming {
            serial: 0x0000_0002,
            body: 0x191,
            x: 1401,
            y: 1700,
            z: 0,
            direction: 4,
            hue: 0,
            flags: 0,
            notoriety: 3,
            items: vec![MobileItemFragment {
                serial: 0x4000_0100,
                item_id: 0x1f00,
                layer: 1,
                hue: Some(0x84),
            }],
        });
        // A ground item
        world.world_item_7(&WorldItem7 {
            item_type: 0,
            serial: 0x4000_0010,
            item_id: 0x0eed,
            direction: 0,
            amount: 100,
            x: 1402,
            y: 1701,
            z: 0,
            light_level: 0,
            hue: 0,
            flags: 0,
        });
        // An opened container with one child
        world.container_open(&ContainerOpen {
            serial: 0x4000_0000,
            gump_id: 0x3c,
        });
        world.container_content(&ContainerContent {
            items: vec![ContainerItem {
                serial: 0x4000_0101,
                item_id: 0x0f06,
                amount: 1,
                x: 40,
                y: 60,
                grid_index: 0,
                parent_serial: 0x4000_0000,
                hue: 0,
            }],
        });
        world
    }

    #[test]
    fn test_empty_mirror_yields_nothing() {
        let world = WorldMirror::new();
        assert!(build_replay(&world).is_empty());
    }

    #[test]
    fn test_replay_order() {
        let world = populated_world();
        let frames = build_replay(&world);
        let sequence: Vec<u8> = frames.iter().map(|f| f.id).collect();

        // Start leads
        assert_eq!(sequence[0], ids::START);

        // Player update precedes player incoming; both precede the other
        // mobile, which precedes its equip packet
        let update = sequence.iter().position(|&id| id == ids::MOBILE_UPDATE).unwrap();
        let incomings: Vec<usize> = sequence
            .iter()
            .enumerate()
            .filter(|(_, &id)| id == ids::MOBILE_INCOMING)
            .map(|(i, _)| i)
            .collect();
        let equip = sequence.iter().position(|&id| id == ids::EQUIP).unwrap();
        assert_eq!(incomings.len(), 2);
        assert!(update < incomings[0]);
        assert!(incomings[1] < equip);

        // Ground items before container opens, opens before their contents
        let ground = sequence.iter().position(|&id| id == ids::WORLD_ITEM_7).unwrap();
        let open = sequence
            .iter()
            .position(|&id| id == ids::CONTAINER_OPEN)
            .unwrap();
        let content = sequence
            .iter()
            .position(|&id| id == ids::CONTAINER_UPDATE)
            .unwrap();
        assert!(equip < ground);
        assert!(ground < open);
        assert!(open + 1 == content);
    }

    #[test]
    fn test_replay_includes_ambience_when_cached() {
        let mut world = populated_world();
        let season = Frame::new(bytes::Bytes::from_static(&[0xbc, 0x01, 0x01]));
        world.cache_player_frame(&season);

        let frames = build_replay(&world);
        let position = frames.iter().position(|f| f.id == ids::SEASON).unwrap();

        // Season arrives after start but before the player's mobile
        let update = frames
            .iter()
            .position(|f| f.id == ids::MOBILE_UPDATE)
            .unwrap();
        assert!(position > 0);
        assert!(position < update);
    }
}
