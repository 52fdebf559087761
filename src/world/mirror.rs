//! World mirror module
//!
//! Maintains a mirror of the server-side world as seen on the wire:
//! - Item and mobile tables keyed by serial
//! - The player-centric packets a fresh client needs (start, map, season,
//!   light levels, war mode, targeting)
//! - Coherence between the cached start and player-update packets
//!
//! Handlers are driven by decoded server-origin packets. They are
//! idempotent under re-delivery and never fail; a malformed update is
//! dropped, leaving prior state intact.

use tracing::debug;

use crate::protocol::codec::{extended, ids, Frame};
use crate::protocol::packets::{
    extended_subcommand, ContainerContent, ContainerOpen, ContainerUpdate, Equip, MobileIncoming,
    MobileMoving, MobileStatus, MobileUpdate, Start, WorldItem, WorldItem7, ZoneChange,
};
use crate::protocol::translate;
use crate::world::item::{ItemPlacement, ItemStore};
use crate::world::mobile::MobileStore;
use crate::world::serial::{classify, Serial, SerialClass};

/// Mirror of the observed server-side world
#[derive(Debug, Default)]
pub struct WorldMirror {
    /// Login confirmation; names the player mobile
    pub start: Option<Start>,
    /// Player mobile update, kept coherent with `start`
    pub mobile_update: Option<MobileUpdate>,
    /// Last map change (raw extended frame)
    pub map_change: Option<Frame>,
    /// Last map patches (raw extended frame)
    pub map_patches: Option<Frame>,
    /// Last season (raw frame)
    pub season: Option<Frame>,
    /// Last global light level (raw frame)
    pub global_light_level: Option<Frame>,
    /// Last personal light level (raw frame)
    pub personal_light_level: Option<Frame>,
    /// Last war mode (raw frame)
    pub war_mode: Option<Frame>,
    /// Last targeting cursor (raw frame)
    pub target: Option<Frame>,
    /// Items observed in the world
    pub items: ItemStore,
    /// Mobiles observed in the world
    pub mobiles: MobileStore,
    /// Monotone epoch for container-content reconciliation
    sweep_epoch: u64,
}

impl WorldMirror {
    /// Create an empty mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial of the player's mobile, once the session is in game
    pub fn player_serial(&self) -> Option<Serial> {
        self.start.as_ref().map(|s| s.serial)
    }

    /// Player position as `(x, y, direction, z)` from the start cache
    pub fn player_position(&self) -> Option<(u16, u16, u8, i8)> {
        self.start
            .as_ref()
            .map(|s| (s.x, s.y, s.direction, s.z as i8))
    }

    /// Current sweep epoch
    pub fn sweep_epoch(&self) -> u64 {
        self.sweep_epoch
    }

    /// Drop all mirrored state (used when the upstream session restarts)
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ============ Player-centric handlers ============

    /// Login confirmation
    pub fn start(&mut self, p: &Start) {
        self.start = Some(*p);
        // Seed the player-update cache so the two stay coherent even if the
        // server never sends a separate update before an attach.
        let update = self.mobile_update.get_or_insert(MobileUpdate {
            serial: p.serial,
            body: p.body,
            hue: 0,
            flags: 0,
            x: p.x,
            y: p.y,
            direction: p.direction,
            z: p.z as i8,
        });
        if update.serial != p.serial {
            *update = MobileUpdate {
                serial: p.serial,
                body: p.body,
                hue: 0,
                flags: 0,
                x: p.x,
                y: p.y,
                direction: p.direction,
                z: p.z as i8,
            };
        }
    }

    /// Cache a player-centric frame the mirror stores verbatim
    ///
    /// Returns false when the frame is not one of the cached kinds.
    pub fn cache_player_frame(&mut self, frame: &Frame) -> bool {
        match frame.id {
            ids::SEASON => self.season = Some(frame.clone()),
            ids::GLOBAL_LIGHT_LEVEL => self.global_light_level = Some(frame.clone()),
            ids::PERSONAL_LIGHT_LEVEL => self.personal_light_level = Some(frame.clone()),
            ids::WAR_MODE => self.war_mode = Some(frame.clone()),
            ids::TARGET => self.target = Some(frame.clone()),
            ids::EXTENDED => match extended_subcommand(frame) {
                Some(extended::MAP_CHANGE) => self.map_change = Some(frame.clone()),
                Some(extended::MAP_PATCHES) => self.map_patches = Some(frame.clone()),
                _ => return false,
            },
            _ => return false,
        }
        true
    }

    // ============ Item handlers ============

    /// Item on the ground, pre-7 dialect
    pub fn world_item(&mut self, p: &WorldItem) {
        let item = self.items.upsert(p.serial);
        item.placement = ItemPlacement::Ground(translate::world_item_to_7(p));
    }

    /// Item on the ground, 7.0 dialect
    pub fn world_item_7(&mut self, p: &WorldItem7) {
        let item = self.items.upsert(p.serial);
        item.placement = ItemPlacement::Ground(*p);
    }

    /// Item equipped on a mobile
    pub fn equip(&mut self, p: &Equip) {
        let item = self.items.upsert(p.serial);
        item.placement = ItemPlacement::Equipped(*p);
    }

    /// Container gump opened; both dialects reduce to the base header
    pub fn container_open(&mut self, p: &ContainerOpen) {
        let item = self.items.upsert(p.serial);
        item.container_open = Some(*p);
    }

    /// Single item placed in a container
    pub fn container_update(&mut self, p: &ContainerUpdate) {
        let item = self.items.upsert(p.item.serial);
        item.placement = ItemPlacement::Contained(p.item);
    }

    /// Authoritative container inventory
    ///
    /// Children of the batch's container that the batch does not mention
    /// have been removed server-side and are swept.
    pub fn container_content(&mut self, p: &ContainerContent) {
        self.sweep_epoch += 1;
        let epoch = self.sweep_epoch;

        for fragment in &p.items {
            let item = self.items.upsert(fragment.serial);
            item.placement = ItemPlacement::Contained(*fragment);
            item.sweep_epoch = epoch;
        }

        // All fragments share one parent; the first names the container
        if let Some(first) = p.items.first() {
            self.items.sweep_children_of(first.parent_serial, epoch);
        }
    }

    // ============ Mobile handlers ============

    /// Full mobile state with equipment
    pub fn mobile_incoming(&mut self, p: &MobileIncoming) {
        if self.player_serial() == Some(p.serial) {
            if let Some(start) = self.start.as_mut() {
                start.body = p.body;
                start.x = p.x;
                start.y = p.y;
                start.z = p.z as i16;
                start.direction = p.direction;
            }
            if let Some(update) = self.mobile_update.as_mut() {
                update.body = p.body;
                update.hue = p.hue;
                update.flags = p.flags;
                update.x = p.x;
                update.y = p.y;
                update.direction = p.direction;
                update.z = p.z;
            }
        }

        let mobile = self.mobiles.upsert(p.serial);
        mobile.incoming = Some(p.clone());

        // The embedded equipment list doubles as a stream of equip events
        let equips: Vec<Equip> = p
            .items
            .iter()
            .map(|fragment| Equip {
                serial: fragment.serial,
                item_id: fragment.item_id,
                layer: fragment.layer,
                parent_serial: p.serial,
                hue: fragment.hue.unwrap_or(0),
            })
            .collect();
        for equip in &equips {
            self.equip(equip);
        }
    }

    /// Mobile status; replaced only when at least as rich as the cache
    pub fn mobile_status(&mut self, p: &MobileStatus) {
        let mobile = self.mobiles.upsert(p.serial);
        let replace = mobile
            .status
            .as_ref()
            .map_or(true, |cached| cached.flags <= p.flags);
        if replace {
            mobile.status = Some(p.clone());
        }
    }

    /// Mobile update; patches the cached incoming packet in place
    pub fn mobile_update(&mut self, p: &MobileUpdate) {
        if self.player_serial() == Some(p.serial) {
            self.mobile_update = Some(*p);
            if let Some(start) = self.start.as_mut() {
                start.body = p.body;
                start.x = p.x;
                start.y = p.y;
                start.z = p.z as i16;
                start.direction = p.direction;
            }
        }

        let Some(mobile) = self.mobiles.find_mut(p.serial) else {
            debug!(serial = format_args!("{:#010x}", p.serial), "mobile update for unknown mobile");
            return;
        };

        // Patch moving fields only; the equipment list stays intact
        if let Some(incoming) = mobile.incoming.as_mut() {
            incoming.body = p.body;
            incoming.x = p.x;
            incoming.y = p.y;
            incoming.z = p.z;
            incoming.direction = p.direction;
            incoming.hue = p.hue;
            incoming.flags = p.flags;
        }
    }

    /// Mobile movement; as update, plus notoriety
    pub fn mobile_moving(&mut self, p: &MobileMoving) {
        if self.player_serial() == Some(p.serial) {
            if let Some(start) = self.start.as_mut() {
                start.body = p.body;
                start.x = p.x;
                start.y = p.y;
                start.z = p.z as i16;
                start.direction = p.direction;
            }
            if let Some(update) = self.mobile_update.as_mut() {
                update.body = p.body;
                update.hue = p.hue;
                update.flags = p.flags;
                update.x = p.x;
                update.y = p.y;
                update.direction = p.direction;
                update.z = p.z;
            }
        }

        let Some(mobile) = self.mobiles.find_mut(p.serial) else {
            debug!(serial = format_args!("{:#010x}", p.serial), "mobile moving for unknown mobile");
            return;
        };

        if let Some(incoming) = mobile.incoming.as_mut() {
            incoming.body = p.body;
            incoming.x = p.x;
            incoming.y = p.y;
            incoming.z = p.z;
            incoming.direction = p.direction;
            incoming.hue = p.hue;
            incoming.flags = p.flags;
            incoming.notoriety = p.notoriety;
        }
    }

    /// Zone change; coordinates only
    pub fn zone_change(&mut self, p: &ZoneChange) {
        if let Some(start) = self.start.as_mut() {
            start.x = p.x;
            start.y = p.y;
            start.z = p.z;
        }
        if let Some(update) = self.mobile_update.as_mut() {
            update.x = p.x;
            update.y = p.y;
            update.z = p.z as i8;
        }
    }

    /// A player step was acknowledged
    pub fn walked(&mut self, x: u16, y: u16, direction: u8, notoriety: u8) {
        if let Some(start) = self.start.as_mut() {
            start.x = x;
            start.y = y;
            start.direction = direction;
        }
        if let Some(update) = self.mobile_update.as_mut() {
            update.x = x;
            update.y = y;
            update.direction = direction;
        }

        let Some(player) = self.player_serial() else {
            return;
        };
        if let Some(incoming) = self
            .mobiles
            .find_mut(player)
            .and_then(|m| m.incoming.as_mut())
        {
            incoming.x = x;
            incoming.y = y;
            incoming.direction = direction;
            incoming.notoriety = notoriety;
        }
    }

    /// A player step was rejected; snap back to the server's position
    pub fn walk_cancel(&mut self, x: u16, y: u16, direction: u8) {
        if let Some(start) = self.start.as_mut() {
            start.x = x;
            start.y = y;
            start.direction = direction;
        }
        if let Some(update) = self.mobile_update.as_mut() {
            update.x = x;
            update.y = y;
            update.direction = direction;
        }

        let Some(player) = self.player_serial() else {
            return;
        };
        if let Some(incoming) = self
            .mobiles
            .find_mut(player)
            .and_then(|m| m.incoming.as_mut())
        {
            incoming.x = x;
            incoming.y = y;
            incoming.direction = direction;
        }
    }

    // ============ Removal ============

    /// Remove an entity by serial, classifying it first
    pub fn remove_serial(&mut self, serial: Serial) {
        match classify(serial) {
            SerialClass::Mobile => {
                self.mobiles.remove(serial);
                self.items.remove_subtree(serial);
            }
            SerialClass::Item => {
                self.items.remove(serial);
                self.items.remove_subtree(serial);
            }
            SerialClass::Reserved => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::{ContainerItem, MobileItemFragment};
    use bytes::Bytes;

    fn start_packet(serial: Serial) -> Start {
        Start {
            serial,
            body: 0x190,
            x: 1400,
            y: 1700,
            z: 10,
            direction: 4,
            map_width: 6144,
            map_height: 4096,
        }
    }

    fn incoming(serial: Serial, items: Vec<MobileItemFragment>) -> MobileIncoming {
        MobileIncoming {
            serial,
            body: 0x190,
            x: 10,
            y: 20,
            z: 0,
            direction: 2,
            hue: 0x83ea,
            flags: 0,
            notoriety: 1,
            items,
        }
    }

    fn container_item(serial: Serial, parent_serial: Serial) -> ContainerItem {
        ContainerItem {
            serial,
            item_id: 0x0f06,
            amount: 1,
            x: 40,
            y: 60,
            grid_index: 0,
            parent_serial,
            hue: 0,
        }
    }

    #[test]
    fn test_mobile_arrive_with_equipment() {
        let mut world = WorldMirror::new();
        world.mobile_incoming(&incoming(
            0x0000_0001,
            vec![MobileItemFragment {
                serial: 0x4000_0100,
                item_id: 0x1f00,
                layer: 1,
                hue: Some(0x84),
            }],
        ));

        assert!(world.mobiles.find(0x0000_0001).is_some());
        let item = world.items.find(0x4000_0100).unwrap();
        match &item.placement {
            ItemPlacement::Equipped(equip) => {
                assert_eq!(equip.parent_serial, 0x0000_0001);
                assert_eq!(equip.item_id, 0x1f00);
                assert_eq!(equip.hue, 0x84);
            }
            other => panic!("expected equipped placement, got {other:?}"),
        }
    }

    #[test]
    fn test_mobile_incoming_without_hue_defaults_to_zero() {
        let mut world = WorldMirror::new();
        world.mobile_incoming(&incoming(
            0x0000_0002,
            vec![MobileItemFragment {
                serial: 0x4000_0200,
                item_id: 0x1515,
                layer: 13,
                hue: None,
            }],
        ));

        match &world.items.find(0x4000_0200).unwrap().placement {
            ItemPlacement::Equipped(equip) => assert_eq!(equip.hue, 0),
            other => panic!("expected equipped placement, got {other:?}"),
        }
    }

    #[test]
    fn test_world_item_idempotent() {
        let mut world = WorldMirror::new();
        let p = WorldItem7 {
            item_type: 0,
            serial: 0x4000_0010,
            item_id: 0x0eed,
            direction: 0,
            amount: 100,
            x: 1400,
            y: 1700,
            z: 0,
            light_level: 0,
            hue: 0x44,
            flags: 0,
        };

        world.world_item_7(&p);
        let first = world.items.find(0x4000_0010).unwrap().clone();
        world.world_item_7(&p);
        let second = world.items.find(0x4000_0010).unwrap();

        assert_eq!(&first, second);
        assert_eq!(world.items.len(), 1);
    }

    #[test]
    fn test_container_content_sweeps_stale_children() {
        let mut world = WorldMirror::new();
        world.container_content(&ContainerContent {
            items: vec![
                container_item(0x4000_0101, 0x4000_0000),
                container_item(0x4000_0102, 0x4000_0000),
            ],
        });
        assert!(world.items.find(0x4000_0101).is_some());
        assert!(world.items.find(0x4000_0102).is_some());

        world.container_content(&ContainerContent {
            items: vec![container_item(0x4000_0101, 0x4000_0000)],
        });

        assert!(world.items.find(0x4000_0101).is_some());
        assert!(world.items.find(0x4000_0102).is_none());
    }

    #[test]
    fn test_container_content_repeat_is_noop() {
        let mut world = WorldMirror::new();
        let batch = ContainerContent {
            items: vec![
                container_item(0x4000_0101, 0x4000_0000),
                container_item(0x4000_0102, 0x4000_0000),
            ],
        };

        world.container_content(&batch);
        world.container_content(&batch);

        assert_eq!(world.items.len(), 2);
        assert!(world.items.find(0x4000_0101).is_some());
        assert!(world.items.find(0x4000_0102).is_some());
    }

    #[test]
    fn test_empty_container_content_sweeps_nothing() {
        let mut world = WorldMirror::new();
        world.container_content(&ContainerContent {
            items: vec![container_item(0x4000_0101, 0x4000_0000)],
        });
        world.container_content(&ContainerContent { items: Vec::new() });

        assert!(world.items.find(0x4000_0101).is_some());
    }

    #[test]
    fn test_remove_mobile_takes_equipment() {
        let mut world = WorldMirror::new();
        world.mobile_incoming(&incoming(
            0x0000_0001,
            vec![MobileItemFragment {
                serial: 0x4000_0100,
                item_id: 0x1f00,
                layer: 1,
                hue: Some(0x84),
            }],
        ));

        world.remove_serial(0x0000_0001);

        assert!(world.mobiles.find(0x0000_0001).is_none());
        assert!(world.items.find(0x4000_0100).is_none());
    }

    #[test]
    fn test_remove_reserved_serial_is_ignored() {
        let mut world = WorldMirror::new();
        world.world_item_7(&WorldItem7 {
            item_type: 0,
            serial: 0x4000_0010,
            item_id: 1,
            direction: 0,
            amount: 1,
            x: 0,
            y: 0,
            z: 0,
            light_level: 0,
            hue: 0,
            flags: 0,
        });

        world.remove_serial(0x8000_0000);
        assert_eq!(world.items.len(), 1);
    }

    #[test]
    fn test_remove_then_add_restores_state() {
        let mut world = WorldMirror::new();
        let p = incoming(0x0000_0003, Vec::new());

        world.mobile_incoming(&p);
        let before = world.mobiles.find(0x0000_0003).unwrap().clone();

        world.remove_serial(0x0000_0003);
        world.mobile_incoming(&p);
        let after = world.mobiles.find(0x0000_0003).unwrap();

        assert_eq!(&before, after);
    }

    #[test]
    fn test_player_caches_stay_coherent() {
        let mut world = WorldMirror::new();
        world.start(&start_packet(0x0000_0001));

        let mut p = incoming(0x0000_0001, Vec::new());
        p.x = 1401;
        p.y = 1699;
        p.direction = 6;
        world.mobile_incoming(&p);

        let start = world.start.unwrap();
        let update = world.mobile_update.unwrap();
        assert_eq!(start.serial, update.serial);
        assert_eq!(start.body, update.body);
        assert_eq!((start.x, start.y), (update.x, update.y));
        assert_eq!(start.direction, update.direction);
        assert_eq!(start.z, update.z as i16);
    }

    #[test]
    fn test_walked_updates_player_state() {
        let mut world = WorldMirror::new();
        world.start(&start_packet(0x0000_0001));
        world.mobile_incoming(&incoming(0x0000_0001, Vec::new()));

        world.walked(1401, 1700, 2, 3);

        let start = world.start.unwrap();
        assert_eq!((start.x, start.y, start.direction), (1401, 1700, 2));
        let update = world.mobile_update.unwrap();
        assert_eq!((update.x, update.y, update.direction), (1401, 1700, 2));
        let inc = world
            .mobiles
            .find(0x0000_0001)
            .unwrap()
            .incoming
            .as_ref()
            .unwrap();
        assert_eq!((inc.x, inc.y, inc.direction, inc.notoriety), (1401, 1700, 2, 3));
    }

    #[test]
    fn test_walk_cancel_keeps_notoriety() {
        let mut world = WorldMirror::new();
        world.start(&start_packet(0x0000_0001));
        let mut p = incoming(0x0000_0001, Vec::new());
        p.notoriety = 5;
        world.mobile_incoming(&p);

        world.walk_cancel(1400, 1700, 0);

        let inc = world
            .mobiles
            .find(0x0000_0001)
            .unwrap()
            .incoming
            .as_ref()
            .unwrap();
        assert_eq!(inc.notoriety, 5);
        assert_eq!((inc.x, inc.y, inc.direction), (1400, 1700, 0));
    }

    #[test]
    fn test_mobile_update_preserves_equipment() {
        let mut world = WorldMirror::new();
        world.mobile_incoming(&incoming(
            0x0000_0004,
            vec![MobileItemFragment {
                serial: 0x4000_0400,
                item_id: 0x1f00,
                layer: 1,
                hue: None,
            }],
        ));

        world.mobile_update(&MobileUpdate {
            serial: 0x0000_0004,
            body: 0x191,
            hue: 0x22,
            flags: 0x40,
            x: 99,
            y: 98,
            direction: 1,
            z: -3,
        });

        let inc = world
            .mobiles
            .find(0x0000_0004)
            .unwrap()
            .incoming
            .as_ref()
            .unwrap();
        assert_eq!(inc.body, 0x191);
        assert_eq!((inc.x, inc.y, inc.z), (99, 98, -3));
        assert_eq!(inc.items.len(), 1);
    }

    #[test]
    fn test_mobile_update_for_unknown_mobile_is_dropped() {
        let mut world = WorldMirror::new();
        world.mobile_update(&MobileUpdate {
            serial: 0x0000_0009,
            body: 0x190,
            hue: 0,
            flags: 0,
            x: 1,
            y: 2,
            direction: 0,
            z: 0,
        });
        assert!(world.mobiles.find(0x0000_0009).is_none());
    }

    #[test]
    fn test_mobile_status_freshness() {
        let mut world = WorldMirror::new();
        let rich = MobileStatus {
            serial: 1,
            name: "Iolo".to_string(),
            hits: 80,
            hits_max: 100,
            renameable: 0,
            flags: 4,
            tail: Bytes::new(),
        };
        let poor = MobileStatus { flags: 0, ..rich.clone() };

        world.mobile_status(&rich);
        world.mobile_status(&poor);
        assert_eq!(
            world.mobiles.find(1).unwrap().status.as_ref().unwrap().flags,
            4
        );

        // Equal flags replace (newer values under the same layout)
        let refreshed = MobileStatus {
            hits: 50,
            ..rich.clone()
        };
        world.mobile_status(&refreshed);
        assert_eq!(
            world.mobiles.find(1).unwrap().status.as_ref().unwrap().hits,
            50
        );
    }

    #[test]
    fn test_zone_change_moves_player_only() {
        let mut world = WorldMirror::new();
        world.start(&start_packet(0x0000_0001));

        world.zone_change(&ZoneChange {
            x: 200,
            y: 300,
            z: -10,
            server_x: 0,
            server_y: 0,
            map_width: 6144,
            map_height: 4096,
        });

        let start = world.start.unwrap();
        assert_eq!((start.x, start.y, start.z), (200, 300, -10));
        let update = world.mobile_update.unwrap();
        assert_eq!((update.x, update.y, update.z), (200, 300, -10));
        // Body untouched
        assert_eq!(start.body, 0x190);
    }

    #[test]
    fn test_cache_player_frames() {
        let mut world = WorldMirror::new();
        let season = Frame::new(Bytes::from_static(&[0xbc, 0x01, 0x01]));
        let map_change = Frame::new(Bytes::from_static(&[0xbf, 0x00, 0x06, 0x00, 0x08, 0x01]));
        let ping = Frame::new(Bytes::from_static(&[0x73, 0x00]));

        assert!(world.cache_player_frame(&season));
        assert!(world.cache_player_frame(&map_change));
        assert!(!world.cache_player_frame(&ping));

        assert_eq!(world.season.as_ref(), Some(&season));
        assert_eq!(world.map_change.as_ref(), Some(&map_change));
        assert!(world.map_patches.is_none());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut world = WorldMirror::new();
        world.start(&start_packet(0x0000_0001));
        world.mobile_incoming(&incoming(0x0000_0001, Vec::new()));
        world.container_content(&ContainerContent {
            items: vec![container_item(0x4000_0101, 0x4000_0000)],
        });

        world.clear();

        assert!(world.start.is_none());
        assert!(world.mobile_update.is_none());
        assert!(world.items.is_empty());
        assert!(world.mobiles.is_empty());
        assert_eq!(world.sweep_epoch(), 0);
    }
}
