//! Session Authority
//!
//! Tracks the roster of a room and which peer is master. The relay
//! decides who the master is; this resolver mirrors its announcements
//! and keeps exactly one roster entry flagged as authority.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::game::entity::PeerId;
use crate::network::protocol::{PeerInfo, PeerProperties};

/// A connected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Actor number.
    pub id: PeerId,
    /// Display name.
    pub nickname: String,
    /// Is this peer the master?
    pub is_authority: bool,
    /// Lobby properties.
    pub properties: PeerProperties,
}

impl Peer {
    fn from_info(info: PeerInfo) -> Self {
        Self {
            id: info.id,
            nickname: info.nickname,
            is_authority: false,
            properties: info.properties,
        }
    }
}

/// Roster and master of one room, as seen by one peer.
#[derive(Debug, Clone, Default)]
pub struct AuthorityResolver {
    local: Option<PeerId>,
    roster: BTreeMap<PeerId, Peer>,
    master: Option<PeerId>,
}

impl AuthorityResolver {
    /// Empty resolver (not joined yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset from a join acknowledgement.
    pub fn on_joined(&mut self, local: PeerId, master: PeerId, peers: Vec<PeerInfo>) {
        self.local = Some(local);
        self.roster = peers.into_iter().map(|p| (p.id, Peer::from_info(p))).collect();
        self.set_master(master);
        info!(%local, %master, peers = self.roster.len(), "Joined room");
    }

    /// A peer joined.
    pub fn add_peer(&mut self, info: PeerInfo) {
        debug!(peer = %info.id, nickname = %info.nickname, "Peer joined");
        let mut peer = Peer::from_info(info);
        peer.is_authority = self.master == Some(peer.id);
        self.roster.insert(peer.id, peer);
    }

    /// A peer left. Returns it if it was known.
    pub fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        let removed = self.roster.remove(&id);
        if self.master == Some(id) {
            self.master = None;
        }
        removed
    }

    /// Adopt the relay's master. Returns `true` if it changed.
    pub fn set_master(&mut self, master: PeerId) -> bool {
        let changed = self.master != Some(master);
        self.master = Some(master);
        for peer in self.roster.values_mut() {
            peer.is_authority = peer.id == master;
        }
        changed
    }

    /// Lowest actor number still present.
    pub fn elect_master(&self) -> Option<PeerId> {
        self.roster.keys().next().copied()
    }

    /// Current master.
    pub fn master(&self) -> Option<PeerId> {
        self.master
    }

    /// Local actor number.
    pub fn local(&self) -> Option<PeerId> {
        self.local
    }

    /// Is the local peer the master?
    pub fn is_authority(&self) -> bool {
        self.local.is_some() && self.local == self.master
    }

    /// Peer by id.
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.roster.get(&id)
    }

    /// All peers in actor order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.roster.values()
    }

    /// Actor numbers in order.
    pub fn peer_ids(&self) -> Vec<u32> {
        self.roster.keys().map(|id| id.0).collect()
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.roster.len()
    }

    /// No peers?
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Every peer has set `ready`.
    pub fn all_ready(&self) -> bool {
        !self.roster.is_empty() && self.roster.values().all(|p| p.properties.ready)
    }

    /// Replace a peer's properties.
    pub fn set_properties(&mut self, id: PeerId, properties: PeerProperties) -> bool {
        match self.roster.get_mut(&id) {
            Some(peer) => {
                peer.properties = properties;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32) -> PeerInfo {
        PeerInfo {
            id: PeerId(id),
            nickname: format!("peer{}", id),
            properties: PeerProperties::default(),
        }
    }

    fn authority_count(resolver: &AuthorityResolver) -> usize {
        resolver.peers().filter(|p| p.is_authority).count()
    }

    #[test]
    fn test_exactly_one_authority() {
        let mut resolver = AuthorityResolver::new();
        resolver.on_joined(PeerId(2), PeerId(1), vec![info(1), info(2)]);
        assert!(!resolver.is_authority());
        assert_eq!(authority_count(&resolver), 1);

        resolver.add_peer(info(3));
        assert_eq!(authority_count(&resolver), 1);

        resolver.remove_peer(PeerId(1));
        assert_eq!(resolver.master(), None);
        assert_eq!(resolver.elect_master(), Some(PeerId(2)));

        assert!(resolver.set_master(PeerId(2)));
        assert!(resolver.is_authority());
        assert_eq!(authority_count(&resolver), 1);
        assert!(!resolver.set_master(PeerId(2)));
    }

    #[test]
    fn test_all_ready() {
        let mut resolver = AuthorityResolver::new();
        assert!(!resolver.all_ready());

        resolver.on_joined(PeerId(1), PeerId(1), vec![info(1), info(2)]);
        assert!(!resolver.all_ready());

        let ready = PeerProperties { class: None, ready: true };
        resolver.set_properties(PeerId(1), ready.clone());
        assert!(!resolver.all_ready());
        resolver.set_properties(PeerId(2), ready.clone());
        assert!(resolver.all_ready());

        assert!(!resolver.set_properties(PeerId(9), ready));
    }
}
