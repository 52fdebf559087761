//! Walk state machine module
//!
//! The walk protocol is strictly sequenced: every step request carries a
//! one-byte sequence the server acknowledges or rejects. With several
//! attached clients only one may walk, and the server sees a single
//! monotonic sequence space per connection. This module queues client
//! steps, assigns server-bound sequence numbers, correlates the server's
//! answers, and rolls the world mirror back on rejection.
//!
//! Operations return actions instead of doing I/O; the connection turns
//! them into socket writes.

use tracing::warn;

use crate::protocol::packets::{Walk, WalkAck, WalkCancel};
use crate::world::WorldMirror;

/// Identity of an attached client
pub type ClientId = u64;

/// Maximum number of in-flight walk requests
pub const MAX_WALK_QUEUE: usize = 4;

/// Per-direction step deltas; directions run clockwise from north
const STEP_DELTAS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Predicted position change for a step in `direction`
fn step_delta(direction: u8) -> (i32, i32) {
    STEP_DELTAS[(direction & 0x07) as usize]
}

/// One queued step
#[derive(Debug, Clone, Copy)]
struct WalkEntry {
    /// The walk packet as the client sent it
    packet: Walk,
    /// The sequence number forwarded to the server
    seq: u8,
}

/// Outcome of a client walk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkRequest {
    /// Send this packet to the server
    Forward(Walk),
    /// Send this synthetic rejection back to the requesting client
    Reject(WalkCancel),
}

/// Outcome of a server walk acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAckAction {
    /// Deliver to the walking client with its own sequence restored
    Deliver { client: ClientId, packet: WalkAck },
    /// Out of sync; forward the server packet unchanged
    PassThrough,
}

/// Outcome of a server walk rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkCancelAction {
    /// Deliver to the walking client with its own sequence restored
    Deliver {
        client: ClientId,
        packet: WalkCancel,
    },
    /// Out of sync; forward the server packet unchanged
    PassThrough,
}

/// Walk queue and sequence state for one connection
#[derive(Debug, Default)]
pub struct WalkState {
    queue: Vec<WalkEntry>,
    seq_next: u8,
    walker: Option<ClientId>,
}

impl WalkState {
    /// Create an idle walk state
    pub fn new() -> Self {
        Self::default()
    }

    /// The client currently owning the queue
    pub fn walker(&self) -> Option<ClientId> {
        self.walker
    }

    /// Number of steps in flight
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Server sequence numbers currently in flight, oldest first
    pub fn queued_seqs(&self) -> Vec<u8> {
        self.queue.iter().map(|entry| entry.seq).collect()
    }

    /// Advance the sequence counter, skipping the reserved initial value
    fn next_seq(&mut self) -> u8 {
        let seq = self.seq_next;
        self.seq_next = if self.seq_next == 255 { 1 } else { self.seq_next + 1 };
        seq
    }

    /// A synthetic rejection echoing the mirror's current player position
    fn reject_at_current_position(seq: u8, world: &WorldMirror) -> WalkCancel {
        let (x, y, direction, z) = world.player_position().unwrap_or((0, 0, 0, 0));
        WalkCancel {
            seq,
            x,
            y,
            direction,
            z,
        }
    }

    /// Handle a walk request from an attached client
    ///
    /// The first requester is adopted as the walking client. Requests from
    /// other clients and requests past the queue bound are rejected with a
    /// synthetic cancel at the mirror's position. When the assigned server
    /// sequence happens to coincide with the client's own, the forwarded
    /// packet is byte-identical to the request.
    pub fn request(&mut self, client: ClientId, packet: Walk, world: &WorldMirror) -> WalkRequest {
        if self.walker.is_none() {
            self.walker = Some(client);
        }

        if self.walker != Some(client) {
            return WalkRequest::Reject(Self::reject_at_current_position(packet.seq, world));
        }

        if self.queue.len() >= MAX_WALK_QUEUE {
            return WalkRequest::Reject(Self::reject_at_current_position(packet.seq, world));
        }

        let seq = self.next_seq();
        self.queue.push(WalkEntry { packet, seq });

        WalkRequest::Forward(Walk { seq, ..packet })
    }

    /// Handle a walk acknowledgement from the server
    ///
    /// The head of the queue must carry the acknowledged sequence;
    /// anything else means the connection desynchronized, which is logged
    /// and passed through in favor of progress. The mirror is advanced to
    /// the post-step position predicted from the acknowledged packet's
    /// direction before the answer is forwarded.
    pub fn ack(&mut self, p: &WalkAck, world: &mut WorldMirror) -> WalkAckAction {
        let Some(head) = self.queue.first().copied() else {
            warn!(seq = p.seq, "walk ack with empty queue");
            return WalkAckAction::PassThrough;
        };
        if head.seq != p.seq {
            warn!(queued = head.seq, received = p.seq, "walk ack out of sequence");
            return WalkAckAction::PassThrough;
        }
        let Some(client) = self.walker else {
            warn!(seq = p.seq, "walk ack without walking client");
            return WalkAckAction::PassThrough;
        };

        self.queue.remove(0);

        // Predict the post-step position from the acknowledged packet's
        // direction and advance the mirror to it.
        if let Some((x, y, _, _)) = world.player_position() {
            let (dx, dy) = step_delta(head.packet.direction);
            let x = (x as i32 + dx) as u16;
            let y = (y as i32 + dy) as u16;
            world.walked(x, y, head.packet.direction, p.notoriety);
        }

        WalkAckAction::Deliver {
            client,
            packet: WalkAck {
                seq: head.packet.seq,
                notoriety: p.notoriety,
            },
        }
    }

    /// Handle a walk rejection from the server
    ///
    /// The rejected entry and everything queued after it are dropped;
    /// their position predictions chained off the rejected step. The
    /// mirror snaps back to the server's authoritative position either
    /// way.
    pub fn cancel(&mut self, p: &WalkCancel, world: &mut WorldMirror) -> WalkCancelAction {
        world.walk_cancel(p.x, p.y, p.direction);

        let position = self.queue.iter().position(|entry| entry.seq == p.seq);
        let Some(index) = position else {
            warn!(seq = p.seq, "walk cancel for unknown sequence");
            return WalkCancelAction::PassThrough;
        };
        let Some(client) = self.walker else {
            warn!(seq = p.seq, "walk cancel without walking client");
            return WalkCancelAction::PassThrough;
        };

        let original_seq = self.queue[index].packet.seq;
        self.queue.truncate(index);

        WalkCancelAction::Deliver {
            client,
            packet: WalkCancel {
                seq: original_seq,
                ..*p
            },
        }
    }

    /// The walking client detached; release the queue
    ///
    /// The sequence counter is not reset: the server's sequence space
    /// continues across walker changes.
    pub fn client_removed(&mut self, client: ClientId) {
        if self.walker == Some(client) {
            self.walker = None;
            self.queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::{MobileIncoming, Start};

    fn world_at(x: u16, y: u16, direction: u8) -> WorldMirror {
        let mut world = WorldMirror::new();
        world.start(&Start {
            serial: 0x0000_0001,
            body: 0x190,
            x,
            y,
            z: 0,
            direction,
            map_width: 6144,
            map_height: 4096,
        });
        world.mobile_incoming(&MobileIncoming {
            serial: 0x0000_0001,
            body: 0x190,
            x,
            y,
            z: 0,
            direction,
            hue: 0,
            flags: 0,
            notoriety: 1,
            items: Vec::new(),
        });
        world
    }

    fn walk(direction: u8, seq: u8) -> Walk {
        Walk {
            direction,
            seq,
            fastwalk_key: 0,
        }
    }

    #[test]
    fn test_happy_path_single_step() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // Client walks north with its own sequence 0
        let action = state.request(7, walk(0, 0), &world);
        let WalkRequest::Forward(forwarded) = action else {
            panic!("expected forward, got {action:?}");
        };
        assert_eq!(forwarded.seq, 0);
        assert_eq!(state.queue_len(), 1);

        // Server acknowledges the assigned sequence
        let action = state.ack(
            &WalkAck {
                seq: forwarded.seq,
                notoriety: 2,
            },
            &mut world,
        );
        assert_eq!(
            action,
            WalkAckAction::Deliver {
                client: 7,
                packet: WalkAck { seq: 0, notoriety: 2 }
            }
        );
        assert_eq!(state.queue_len(), 0);

        // Mirror advanced one tile north
        let (x, y, direction, _) = world.player_position().unwrap();
        assert_eq!((x, y, direction), (100, 99, 0));
        let incoming = world
            .mobiles
            .find(0x0000_0001)
            .unwrap()
            .incoming
            .as_ref()
            .unwrap();
        assert_eq!(incoming.notoriety, 2);
    }

    #[test]
    fn test_step_follows_direction_table() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // Facing north, stepping east: the delta comes from the
        // acknowledged packet's direction
        let WalkRequest::Forward(forwarded) = state.request(1, walk(2, 0), &world) else {
            panic!("expected forward");
        };
        state.ack(
            &WalkAck {
                seq: forwarded.seq,
                notoriety: 1,
            },
            &mut world,
        );

        let (x, y, direction, _) = world.player_position().unwrap();
        assert_eq!((x, y), (101, 100));
        assert_eq!(direction, 2);

        // A diagonal step moves on both axes
        let WalkRequest::Forward(forwarded) = state.request(1, walk(5, 1), &world) else {
            panic!("expected forward");
        };
        state.ack(
            &WalkAck {
                seq: forwarded.seq,
                notoriety: 1,
            },
            &mut world,
        );

        let (x, y, direction, _) = world.player_position().unwrap();
        assert_eq!((x, y), (100, 101));
        assert_eq!(direction, 5);
    }

    #[test]
    fn test_client_sequence_restored_on_ack() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // Fill the sequence space a bit so client and server seqs diverge
        for client_seq in 10..13u8 {
            state.request(1, walk(0, client_seq), &world);
        }
        assert_eq!(state.queued_seqs(), vec![0, 1, 2]);

        let action = state.ack(&WalkAck { seq: 0, notoriety: 1 }, &mut world);
        let WalkAckAction::Deliver { packet, .. } = action else {
            panic!("expected deliver");
        };
        assert_eq!(packet.seq, 10);
    }

    #[test]
    fn test_second_client_rejected_with_mirror_position() {
        let world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        state.request(1, walk(0, 0), &world);
        let action = state.request(2, walk(4, 9), &world);

        assert_eq!(
            action,
            WalkRequest::Reject(WalkCancel {
                seq: 9,
                x: 100,
                y: 100,
                direction: 0,
                z: 0,
            })
        );
        // The rejected request did not consume a server sequence
        assert_eq!(state.queued_seqs(), vec![0]);
    }

    #[test]
    fn test_matching_sequences_forward_identically() {
        let world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // A fresh queue assigns sequence 0; a client also starting at 0
        // gets its packet forwarded byte-identical.
        let action = state.request(1, walk(0, 0), &world);
        assert_eq!(action, WalkRequest::Forward(walk(0, 0)));
    }

    #[test]
    fn test_queue_bound() {
        let world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        for client_seq in 0..4u8 {
            let action = state.request(1, walk(0, client_seq), &world);
            assert!(matches!(action, WalkRequest::Forward(_)));
        }
        assert_eq!(state.queue_len(), MAX_WALK_QUEUE);

        // The fifth request is rejected and seq_next is not advanced
        let action = state.request(1, walk(0, 4), &world);
        assert!(matches!(action, WalkRequest::Reject(_)));
        assert_eq!(state.queue_len(), MAX_WALK_QUEUE);

        let mut world = world;
        state.ack(&WalkAck { seq: 0, notoriety: 1 }, &mut world);
        let WalkRequest::Forward(forwarded) = state.request(1, walk(0, 5), &world) else {
            panic!("expected forward after drain");
        };
        assert_eq!(forwarded.seq, 4);
    }

    #[test]
    fn test_sequence_wrap_skips_zero() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // Drive the counter to 255
        for _ in 0..255 {
            let WalkRequest::Forward(forwarded) = state.request(1, walk(0, 0), &world) else {
                panic!("expected forward");
            };
            state.ack(
                &WalkAck {
                    seq: forwarded.seq,
                    notoriety: 1,
                },
                &mut world,
            );
        }

        let WalkRequest::Forward(forwarded) = state.request(1, walk(0, 0), &world) else {
            panic!("expected forward");
        };
        assert_eq!(forwarded.seq, 255);
        state.ack(
            &WalkAck {
                seq: 255,
                notoriety: 1,
            },
            &mut world,
        );

        // 255 wraps to 1, never 0
        let WalkRequest::Forward(forwarded) = state.request(1, walk(0, 0), &world) else {
            panic!("expected forward");
        };
        assert_eq!(forwarded.seq, 1);
    }

    #[test]
    fn test_cancel_drops_rejected_suffix() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        // Advance past the initial sequence so server seqs are 1,2,3
        let WalkRequest::Forward(first) = state.request(1, walk(0, 0), &world) else {
            panic!("expected forward");
        };
        assert_eq!(first.seq, 0);
        state.ack(&WalkAck { seq: 0, notoriety: 1 }, &mut world);

        for client_seq in 1..4u8 {
            state.request(1, walk(0, client_seq), &world);
        }
        assert_eq!(state.queued_seqs(), vec![1, 2, 3]);

        let action = state.cancel(
            &WalkCancel {
                seq: 2,
                x: 100,
                y: 99,
                direction: 0,
                z: 0,
            },
            &mut world,
        );

        // Only the entry before the rejected one survives
        assert_eq!(state.queued_seqs(), vec![1]);
        let WalkCancelAction::Deliver { client, packet } = action else {
            panic!("expected deliver");
        };
        assert_eq!(client, 1);
        assert_eq!(packet.seq, 2); // the client's own sequence for that step
        assert_eq!((packet.x, packet.y), (100, 99));

        // Mirror snapped back to the server position
        let (x, y, _, _) = world.player_position().unwrap();
        assert_eq!((x, y), (100, 99));
    }

    #[test]
    fn test_ack_out_of_sequence_passes_through() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        state.request(1, walk(0, 0), &world);
        let action = state.ack(&WalkAck { seq: 9, notoriety: 1 }, &mut world);
        assert_eq!(action, WalkAckAction::PassThrough);

        // The queue is untouched; the mirror did not move
        assert_eq!(state.queue_len(), 1);
        let (x, y, _, _) = world.player_position().unwrap();
        assert_eq!((x, y), (100, 100));
    }

    #[test]
    fn test_cancel_unknown_sequence_still_snaps_mirror() {
        let mut world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        let action = state.cancel(
            &WalkCancel {
                seq: 7,
                x: 90,
                y: 91,
                direction: 5,
                z: 0,
            },
            &mut world,
        );
        assert_eq!(action, WalkCancelAction::PassThrough);

        let (x, y, direction, _) = world.player_position().unwrap();
        assert_eq!((x, y, direction), (90, 91, 5));
    }

    #[test]
    fn test_client_removed_releases_queue() {
        let world = world_at(100, 100, 0);
        let mut state = WalkState::new();

        state.request(1, walk(0, 0), &world);
        state.request(1, walk(0, 1), &world);

        // Some other client detaching changes nothing
        state.client_removed(2);
        assert_eq!(state.walker(), Some(1));
        assert_eq!(state.queue_len(), 2);

        state.client_removed(1);
        assert_eq!(state.walker(), None);
        assert_eq!(state.queue_len(), 0);

        // The sequence space continues for the next walker
        let WalkRequest::Forward(forwarded) = state.request(2, walk(0, 0), &world) else {
            panic!("expected forward");
        };
        assert_eq!(forwarded.seq, 2);
    }
}
