//! Relay Room
//!
//! The transport every peer talks through. A room assigns actor numbers,
//! keeps exactly one master, fans payloads out by target and keeps a
//! buffer of `*Buffered` payloads that is replayed to late joiners.
//! The relay never interprets game state beyond spawn ownership.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::entity::{EntityId, PeerId};
use crate::network::protocol::{Payload, PeerInfo, PeerProperties, RelayMessage, Target};

/// Messages to deliver, in order, with their recipient.
pub type Outgoing = Vec<(PeerId, RelayMessage)>;

/// Relay errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The room has no free slot.
    #[error("Room is full")]
    RoomFull,

    /// The peer is not in this room.
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),
}

/// A buffered payload and the peer that sent it.
#[derive(Debug, Clone, PartialEq)]
struct BufferedPayload {
    sender: PeerId,
    payload: Payload,
}

/// One relay room.
#[derive(Debug)]
pub struct RelayRoom {
    id: Uuid,
    name: String,
    peers: BTreeMap<PeerId, PeerInfo>,
    next_actor: u32,
    master: Option<PeerId>,
    buffer: Vec<BufferedPayload>,
    max_peers: usize,
}

impl RelayRoom {
    /// Create an empty room.
    pub fn new(name: impl Into<String>, max_peers: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            peers: BTreeMap::new(),
            next_actor: 1,
            master: None,
            buffer: Vec::new(),
            max_peers,
        }
    }

    /// Create an empty room with a fixed id.
    pub fn with_id(id: Uuid, name: impl Into<String>, max_peers: usize) -> Self {
        Self { id, ..Self::new(name, max_peers) }
    }

    /// Room id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current master.
    pub fn master(&self) -> Option<PeerId> {
        self.master
    }

    /// Peers in actor order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// No peers left?
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Buffered payloads.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Add a peer. The joiner gets `Joined` and the buffer replay before
    /// anything else; the others get `PeerJoined`.
    pub fn join(&mut self, nickname: impl Into<String>, properties: PeerProperties) -> Result<(PeerId, Outgoing), RelayError> {
        if self.peers.len() >= self.max_peers {
            return Err(RelayError::RoomFull);
        }

        let id = PeerId(self.next_actor);
        self.next_actor += 1;

        let info = PeerInfo { id, nickname: nickname.into(), properties };
        self.peers.insert(id, info.clone());
        let master = *self.master.get_or_insert(id);

        info!(room = %self.name, peer = %id, %master, "Peer joined room");

        let mut out = Vec::with_capacity(self.buffer.len() + self.peers.len());
        out.push((
            id,
            RelayMessage::Joined {
                you: id,
                room_id: self.id,
                master,
                peers: self.peers.values().cloned().collect(),
            },
        ));
        for entry in &self.buffer {
            out.push((id, RelayMessage::Deliver { sender: entry.sender, payload: entry.payload.clone() }));
        }
        for &other in self.peers.keys().filter(|&&p| p != id) {
            out.push((other, RelayMessage::PeerJoined { peer: info.clone() }));
        }

        Ok((id, out))
    }

    /// Remove a peer. Its avatars and effects leave the buffer; room-owned
    /// entities it spawned are handed to the master.
    pub fn leave(&mut self, peer: PeerId) -> Result<Outgoing, RelayError> {
        self.peers.remove(&peer).ok_or(RelayError::UnknownPeer(peer))?;

        let previous = self.master;
        if self.master == Some(peer) {
            self.master = self.peers.keys().next().copied();
        }

        let mut dropped: Vec<EntityId> = Vec::new();
        for entry in &mut self.buffer {
            if let Payload::Spawn(spawn) = &mut entry.payload {
                if spawn.owner != peer {
                    continue;
                }
                if spawn.kind.is_room_owned() {
                    if let Some(master) = self.master {
                        spawn.owner = master;
                    }
                } else {
                    dropped.push(spawn.entity);
                }
            }
        }
        if !dropped.is_empty() {
            self.buffer.retain(|entry| !dropped.contains(&entry.payload.entity()));
            debug!(room = %self.name, %peer, entities = dropped.len(), "Pruned buffered entities");
        }

        info!(room = %self.name, %peer, master = ?self.master, "Peer left room");

        let mut out = Vec::new();
        for &other in self.peers.keys() {
            out.push((other, RelayMessage::PeerLeft { peer }));
        }
        if let Some(master) = self.master.filter(|_| self.master != previous) {
            for &other in self.peers.keys() {
                out.push((other, RelayMessage::MasterSwitched { master }));
            }
        }
        Ok(out)
    }

    /// Replace a peer's lobby properties and tell the others.
    pub fn set_properties(&mut self, peer: PeerId, properties: PeerProperties) -> Result<Outgoing, RelayError> {
        let info = self.peers.get_mut(&peer).ok_or(RelayError::UnknownPeer(peer))?;
        info.properties = properties.clone();

        Ok(self
            .peers
            .keys()
            .filter(|&&p| p != peer)
            .map(|&p| (p, RelayMessage::PropertiesChanged { peer, properties: properties.clone() }))
            .collect())
    }

    /// Fan a payload out to its target. Order per sender is preserved.
    pub fn route(&mut self, sender: PeerId, target: Target, payload: Payload) -> Result<Outgoing, RelayError> {
        if !self.peers.contains_key(&sender) {
            return Err(RelayError::UnknownPeer(sender));
        }

        if let Payload::Destroy { entity } = payload {
            self.buffer.retain(|entry| entry.payload.entity() != entity);
        }
        if target.is_buffered() {
            self.buffer.push(BufferedPayload { sender, payload: payload.clone() });
        }

        let recipients: Vec<PeerId> = match target {
            Target::All | Target::AllBuffered => self.peers.keys().copied().collect(),
            Target::Others | Target::OthersBuffered => {
                self.peers.keys().copied().filter(|&p| p != sender).collect()
            }
            Target::Master => self.master.into_iter().collect(),
            Target::Peer(peer) => self.peers.contains_key(&peer).then_some(peer).into_iter().collect(),
        };

        Ok(recipients
            .into_iter()
            .map(|p| (p, RelayMessage::Deliver { sender, payload: payload.clone() }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Quat, Vec3};
    use crate::game::entity::{EntityKind, PlayerClass, SpawnRequest};
    use crate::network::protocol::{Operation, RemoteCall};

    fn spawn(entity: u32, owner: u32, kind: EntityKind) -> Payload {
        Payload::Spawn(SpawnRequest {
            entity: EntityId(entity),
            kind,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            owner: PeerId(owner),
            payload: None,
        })
    }

    fn delivered(out: &Outgoing, to: PeerId) -> Vec<&Payload> {
        out.iter()
            .filter(|(p, _)| *p == to)
            .filter_map(|(_, m)| match m {
                RelayMessage::Deliver { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_joiner_is_master() {
        let mut room = RelayRoom::new("r", 4);
        let (a, out) = room.join("a", PeerProperties::default()).unwrap();
        assert_eq!(a, PeerId(1));
        assert_eq!(room.master(), Some(a));
        assert!(matches!(&out[0].1, RelayMessage::Joined { you, master, .. } if *you == a && *master == a));

        let (b, out) = room.join("b", PeerProperties::default()).unwrap();
        assert_eq!(b, PeerId(2));
        assert_eq!(room.master(), Some(a));
        assert!(out.iter().any(|(p, m)| *p == a && matches!(m, RelayMessage::PeerJoined { .. })));
    }

    #[test]
    fn test_room_full() {
        let mut room = RelayRoom::new("r", 1);
        room.join("a", PeerProperties::default()).unwrap();
        assert_eq!(room.join("b", PeerProperties::default()).unwrap_err(), RelayError::RoomFull);
    }

    #[test]
    fn test_buffer_replayed_to_late_joiner() {
        let mut room = RelayRoom::new("r", 4);
        let (a, _) = room.join("a", PeerProperties::default()).unwrap();

        room.route(a, Target::OthersBuffered, spawn(1001, 1, EntityKind::Player(PlayerClass::Warrior)))
            .unwrap();
        room.route(a, Target::Others, spawn(1002, 1, EntityKind::Projectile)).unwrap();
        assert_eq!(room.buffered(), 1);

        let (b, out) = room.join("b", PeerProperties::default()).unwrap();
        assert!(matches!(out[0].1, RelayMessage::Joined { .. }));
        let replay = delivered(&out, b);
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].entity(), EntityId(1001));
    }

    #[test]
    fn test_destroy_prunes_buffer() {
        let mut room = RelayRoom::new("r", 4);
        let (a, _) = room.join("a", PeerProperties::default()).unwrap();

        room.route(a, Target::OthersBuffered, spawn(1001, 1, EntityKind::Boss)).unwrap();
        room.route(
            a,
            Target::OthersBuffered,
            Payload::Call(RemoteCall { entity: EntityId(1001), op: Operation::BossDefeated }),
        )
        .unwrap();
        assert_eq!(room.buffered(), 2);

        room.route(a, Target::Others, Payload::Destroy { entity: EntityId(1001) }).unwrap();
        assert_eq!(room.buffered(), 0);
    }

    #[test]
    fn test_routing_targets() {
        let mut room = RelayRoom::new("r", 4);
        let (a, _) = room.join("a", PeerProperties::default()).unwrap();
        let (b, _) = room.join("b", PeerProperties::default()).unwrap();
        let (c, _) = room.join("c", PeerProperties::default()).unwrap();
        let call = Payload::Call(RemoteCall { entity: EntityId(2001), op: Operation::ReviveCheck });

        let out = room.route(b, Target::Others, call.clone()).unwrap();
        assert_eq!(out.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![a, c]);

        let out = room.route(b, Target::Master, call.clone()).unwrap();
        assert_eq!(out.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![a]);

        let out = room.route(a, Target::Peer(c), call.clone()).unwrap();
        assert_eq!(out.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![c]);

        let out = room.route(a, Target::Peer(PeerId(9)), call).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_random_churn_keeps_one_master() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut room = RelayRoom::new("r", 4);
        for _ in 0..200 {
            let ids = room.peer_ids();
            if ids.is_empty() || (ids.len() < 4 && rng.gen_bool(0.5)) {
                room.join("p", PeerProperties::default()).unwrap();
            } else {
                let leaver = ids[rng.gen_range(0..ids.len())];
                room.leave(leaver).unwrap();
            }

            match room.master() {
                Some(master) => assert!(room.peer_ids().contains(&master)),
                None => assert!(room.is_empty()),
            }
        }
    }

    #[test]
    fn test_master_leaves() {
        let mut room = RelayRoom::new("r", 4);
        let (a, _) = room.join("a", PeerProperties::default()).unwrap();
        let (b, _) = room.join("b", PeerProperties::default()).unwrap();
        let (c, _) = room.join("c", PeerProperties::default()).unwrap();

        room.route(a, Target::OthersBuffered, spawn(1001, 1, EntityKind::Player(PlayerClass::Archer)))
            .unwrap();
        room.route(a, Target::OthersBuffered, spawn(1002, 1, EntityKind::Enemy(crate::game::entity::EnemyType::Melee)))
            .unwrap();

        let out = room.leave(a).unwrap();
        assert_eq!(room.master(), Some(b));
        assert!(out.iter().any(|(p, m)| *p == c && matches!(m, RelayMessage::MasterSwitched { master } if *master == b)));

        // The avatar is gone from the buffer, the enemy now belongs to b
        assert_eq!(room.buffered(), 1);
        let (d, out) = room.join("d", PeerProperties::default()).unwrap();
        let replay = delivered(&out, d);
        assert!(matches!(replay[0], Payload::Spawn(s) if s.entity == EntityId(1002) && s.owner == b));

        assert_eq!(room.leave(PeerId(1)).unwrap_err(), RelayError::UnknownPeer(PeerId(1)));
    }
}
