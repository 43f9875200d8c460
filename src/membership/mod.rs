//! The fixed-capacity membership table and its `Peer` records.
//!
//! `Membership` is the one piece of shared state the consensus engine, the
//! peer sessions, and the KV store all touch, so every operation here runs
//! under a single `parking_lot::RwLock` and returns value copies — no
//! internal pointer ever escapes the lock (invariant 6 of spec.md §3).

mod peer;

pub use peer::{Liveness, Peer, RoleHint};

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Signed node identifier in `[1, 1000]`; `-1` means "unknown/self not set".
pub type NodeId = i32;

pub const UNKNOWN_NODE_ID: NodeId = -1;
pub const MAX_NODES: usize = 10;

struct Inner {
    self_id: NodeId,
    peers: Vec<Peer>,
}

pub struct Membership {
    inner: RwLock<Inner>,
}

impl Membership {
    /// Zeroes the table and sets `self_id = -1`.
    pub fn init() -> Self {
        Self {
            inner: RwLock::new(Inner {
                self_id: UNKNOWN_NODE_ID,
                peers: Vec::with_capacity(MAX_NODES),
            }),
        }
    }

    pub fn set_self(&self, id: NodeId) -> Result<()> {
        if !(1..=1000).contains(&id) {
            return Err(Error::InvalidNodeId(id));
        }
        self.inner.write().self_id = id;
        Ok(())
    }

    pub fn self_id(&self) -> NodeId {
        self.inner.read().self_id
    }

    pub fn add_peer(&self, peer: Peer) -> Result<()> {
        if !(1..=1000).contains(&peer.id) {
            return Err(Error::InvalidNodeId(peer.id));
        }
        if peer.name.len() > 254 {
            return Err(Error::InvalidParam("peer name too long".into()));
        }
        if peer.ip.len() > 63 {
            return Err(Error::InvalidParam("peer ip too long".into()));
        }
        if peer.consensus_port == 0 || peer.store_port == 0 {
            return Err(Error::InvalidParam("peer ports must be in [1, 65535]".into()));
        }

        let mut inner = self.inner.write();
        if inner.peers.iter().any(|p| p.id == peer.id) {
            return Err(Error::AlreadyExists(peer.id));
        }
        if inner.peers.len() >= MAX_NODES {
            return Err(Error::CapacityExceeded);
        }
        let mut peer = peer;
        peer.last_heartbeat = std::time::Instant::now();
        peer.liveness = Liveness::Active;
        inner.peers.push(peer);
        Ok(())
    }

    /// Shifts the tail left to close the gap; order is not semantically
    /// meaningful but must stay stable between save/load.
    pub fn remove_peer(&self, id: NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        let idx = inner
            .peers
            .iter()
            .position(|p| p.id == id)
            .ok_or(Error::NotFound)?;
        inner.peers.remove(idx);
        Ok(())
    }

    pub fn get_by_id(&self, id: NodeId) -> Option<Peer> {
        self.inner.read().peers.iter().find(|p| p.id == id).cloned()
    }

    pub fn get_by_index(&self, index: usize) -> Option<Peer> {
        self.inner.read().peers.get(index).cloned()
    }

    /// Count of peers in the table, not including self.
    pub fn count(&self) -> usize {
        self.inner.read().peers.len()
    }

    /// Count including self, used for quorum math (N in spec.md §4.6).
    pub fn cluster_count(&self) -> usize {
        let inner = self.inner.read();
        let self_counted = if inner.self_id != UNKNOWN_NODE_ID { 1 } else { 0 };
        inner.peers.len() + self_counted
    }

    pub fn all(&self) -> Vec<Peer> {
        self.inner.read().peers.clone()
    }

    pub fn mark_live(&self, id: NodeId, live: bool) {
        let mut inner = self.inner.write();
        if let Some(peer) = inner.peers.iter_mut().find(|p| p.id == id) {
            peer.liveness = if live { Liveness::Active } else { Liveness::Inactive };
            if !live && peer.role_hint == RoleHint::Leader {
                peer.role_hint = RoleHint::Offline;
            }
            if live {
                peer.last_heartbeat = std::time::Instant::now();
            }
        }
    }

    pub fn set_role_hint(&self, id: NodeId, role_hint: RoleHint) {
        let mut inner = self.inner.write();
        if let Some(peer) = inner.peers.iter_mut().find(|p| p.id == id) {
            peer.role_hint = role_hint;
        }
    }

    pub fn update_term_seen(&self, id: NodeId, term: u32) {
        let mut inner = self.inner.write();
        if let Some(peer) = inner.peers.iter_mut().find(|p| p.id == id) {
            if term > peer.term_seen {
                peer.term_seen = term;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer(id: NodeId) -> Peer {
        Peer::new(id, format!("node-{id}"), "127.0.0.1".into(), 5000 + id as u16, 6000 + id as u16)
    }

    #[test]
    fn set_self_rejects_out_of_range() {
        let m = Membership::init();
        assert!(matches!(m.set_self(0), Err(Error::InvalidNodeId(0))));
        assert!(matches!(m.set_self(1001), Err(Error::InvalidNodeId(1001))));
        assert!(m.set_self(1).is_ok());
        assert_eq!(m.self_id(), 1);
    }

    #[test]
    fn add_peer_rejects_duplicates_and_capacity() {
        let m = Membership::init();
        m.add_peer(test_peer(2)).unwrap();
        assert!(matches!(m.add_peer(test_peer(2)), Err(Error::AlreadyExists(2))));

        for id in 3..(3 + MAX_NODES as i32 - 1) {
            m.add_peer(test_peer(id)).unwrap();
        }
        assert!(matches!(m.add_peer(test_peer(999)), Err(Error::CapacityExceeded)));
    }

    #[test]
    fn remove_then_add_preserves_count_p4() {
        let m = Membership::init();
        m.add_peer(test_peer(2)).unwrap();
        m.add_peer(test_peer(3)).unwrap();
        let count_after_adds = m.count();

        m.remove_peer(2).unwrap();
        m.add_peer(test_peer(2)).unwrap();
        assert_eq!(m.count(), count_after_adds);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let m = Membership::init();
        assert!(matches!(m.remove_peer(42), Err(Error::NotFound)));
    }

    #[test]
    fn mark_live_false_demotes_leader_hint_to_offline() {
        let m = Membership::init();
        m.add_peer(test_peer(2)).unwrap();
        m.set_role_hint(2, RoleHint::Leader);
        m.mark_live(2, false);
        let p = m.get_by_id(2).unwrap();
        assert_eq!(p.liveness, Liveness::Inactive);
        assert_eq!(p.role_hint, RoleHint::Offline);
    }
}
