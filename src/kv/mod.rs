//! The replicated key-value store: leader-mediated writes, forward-to-leader,
//! and the peer-frame handling table of spec.md §4.7.
//!
//! Reads are always served from the local in-memory copy; every node keeps
//! one because the leader fans out every committed `PUT`/`DELETE` to all
//! live stream sessions (§4.7's replication rule), so a quiescent cluster
//! converges on a single value per key (P3).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consensus::Role;
use crate::error::{Error, Result};
use crate::membership::{Membership, NodeId, UNKNOWN_NODE_ID};
use crate::persist::{KvLog, StateStore};
use crate::transport::frame::Frame;
use crate::transport::hub::StreamHub;

const MAX_KEY_LEN: usize = 254;
const MAX_VALUE_LEN: usize = 1023;

pub struct ReplicatedKvStore {
    self_id: NodeId,
    map: Mutex<HashMap<String, String>>,
    kv_log: Arc<KvLog>,
    state_store: Arc<StateStore>,
    membership: Arc<Membership>,
    hub: Arc<StreamHub>,
}

fn validate_sizes(key: &str, value: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN || value.len() > MAX_VALUE_LEN {
        return Err(Error::Oversize);
    }
    Ok(())
}

impl ReplicatedKvStore {
    pub fn new(
        self_id: NodeId,
        kv_log: Arc<KvLog>,
        state_store: Arc<StateStore>,
        membership: Arc<Membership>,
        hub: Arc<StreamHub>,
    ) -> Result<Self> {
        let map = kv_log.load()?;
        Ok(Self { self_id, map: Mutex::new(map), kv_log, state_store, membership, hub })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    /// Snapshot of every key/value pair, used to build the `PROPAGATE_ADD`
    /// handshake burst's KV counterpart and for tests.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.lock().clone()
    }

    pub fn put(&self, key: &str, value: &str, role: Role, leader_id: NodeId) -> Result<()> {
        validate_sizes(key, value)?;
        if role == Role::Leader {
            self.apply_put_local(key, value)?;
            self.hub.broadcast(Frame::Put { key: key.to_string(), value: value.to_string() });
            Ok(())
        } else if leader_id != UNKNOWN_NODE_ID && self.hub.is_live(leader_id) {
            self.hub.send_any(leader_id, Frame::ForwardPut { key: key.to_string(), value: value.to_string() });
            Ok(())
        } else {
            Err(Error::NoLeader)
        }
    }

    pub fn delete(&self, key: &str, role: Role, leader_id: NodeId) -> Result<()> {
        if role == Role::Leader {
            self.apply_delete_local(key)?;
            self.hub.broadcast(Frame::Delete { key: key.to_string() });
            Ok(())
        } else if leader_id != UNKNOWN_NODE_ID && self.hub.is_live(leader_id) {
            self.hub.send_any(leader_id, Frame::ForwardDelete { key: key.to_string() });
            Ok(())
        } else {
            Err(Error::NoLeader)
        }
    }

    fn apply_put_local(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().insert(key.to_string(), value.to_string());
        self.kv_log.append(key, value)
    }

    fn apply_delete_local(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock();
        map.remove(key);
        self.kv_log.snapshot(&map)
    }

    fn adopt_leader(&self, term: u32, leader_id: NodeId) {
        let mut state = self.state_store.load_state();
        state.current_term = term;
        state.leader_id = leader_id;
        if let Err(e) = self.state_store.save_state(state) {
            log::warn!("failed to persist rale.state after LEADER frame: {e}");
        }
    }

    /// Applies one inbound stream frame and returns the frame to send back to
    /// the sender, if any (only `GET` produces a direct reply).
    ///
    /// `role` is the engine's role at the moment the frame arrived; callers
    /// snapshot it from [`crate::consensus::ConsensusEngine::role`] before
    /// calling this so the KV layer never needs its own view of consensus
    /// state.
    pub fn handle_frame(&self, frame: Frame, role: Role) -> Option<Frame> {
        match frame {
            Frame::Put { key, value } => {
                if let Err(e) = self.apply_put_local(&key, &value) {
                    log::warn!("failed to apply replicated PUT {key}: {e}");
                }
                None
            }
            Frame::ForwardPut { key, value } => {
                if role == Role::Leader {
                    if let Err(e) = self.put(&key, &value, role, self.self_id) {
                        log::debug!("forwarded PUT {key} rejected: {e}");
                    }
                }
                None
            }
            Frame::Delete { key } => {
                if let Err(e) = self.apply_delete_local(&key) {
                    log::warn!("failed to apply replicated DELETE {key}: {e}");
                }
                None
            }
            Frame::ForwardDelete { key } => {
                if role == Role::Leader {
                    if let Err(e) = self.delete(&key, role, self.self_id) {
                        log::debug!("forwarded DELETE {key} rejected: {e}");
                    }
                }
                None
            }
            Frame::Get { key } => match self.get(&key) {
                Some(value) => Some(Frame::Value { key, value }),
                None => Some(Frame::NotFound { key }),
            },
            Frame::Value { .. } | Frame::NotFound { .. } => {
                // Replies to a GET this node never issued over this session;
                // nothing to correlate them to, so they're dropped.
                None
            }
            Frame::PropagateAdd { id, name, ip, consensus_port, store_port } => {
                let peer = crate::membership::Peer::new(id, name, ip, consensus_port, store_port);
                match self.membership.add_peer(peer) {
                    Ok(()) | Err(Error::AlreadyExists(_)) => {}
                    Err(e) => log::warn!("failed to apply PROPAGATE_ADD {id}: {e}"),
                }
                None
            }
            Frame::PropagateRemove { id } => match self.membership.remove_peer(id) {
                Ok(()) | Err(Error::NotFound) => None,
                Err(e) => {
                    log::warn!("failed to apply PROPAGATE_REMOVE {id}: {e}");
                    None
                }
            },
            Frame::Leader { term, leader_id } => {
                self.adopt_leader(term, leader_id);
                None
            }
            Frame::LeaderElected { term, leader_id } => {
                self.adopt_leader(term, leader_id);
                self.hub.broadcast(Frame::Leader { term, leader_id });
                None
            }
            Frame::Hello(_) | Frame::KeepAlive => None,
        }
    }
}
