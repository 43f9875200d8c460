//! Tracks the live write-channel to each connected peer, in both
//! directions, so replication frames can fan out without a single coarse
//! lock across unrelated peers (spec.md §9's capability-trait cue, realized
//! here as a concurrent map rather than a trait since there is exactly one
//! production implementation of "how you reach a connected peer").

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::membership::NodeId;

use super::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Default)]
pub struct StreamHub {
    outbound: DashMap<NodeId, mpsc::UnboundedSender<Frame>>,
    inbound: DashMap<NodeId, mpsc::UnboundedSender<Frame>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, direction: Direction, id: NodeId, tx: mpsc::UnboundedSender<Frame>) {
        match direction {
            Direction::Outbound => self.outbound.insert(id, tx),
            Direction::Inbound => self.inbound.insert(id, tx),
        };
    }

    pub fn unregister(&self, direction: Direction, id: NodeId) {
        match direction {
            Direction::Outbound => self.outbound.remove(&id),
            Direction::Inbound => self.inbound.remove(&id),
        };
    }

    /// Sends on a specific direction's channel; `false` if that direction
    /// isn't currently live for `id`.
    pub fn send(&self, direction: Direction, id: NodeId, frame: Frame) -> bool {
        let map = match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        };
        match map.get(&id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Sends on whichever direction is live, preferring outbound; used by
    /// the KV store to forward to the leader (spec.md §4.7).
    pub fn send_any(&self, id: NodeId, frame: Frame) -> bool {
        if let Some(tx) = self.outbound.get(&id) {
            if tx.send(frame.clone()).is_ok() {
                return true;
            }
        }
        if let Some(tx) = self.inbound.get(&id) {
            return tx.send(frame).is_ok();
        }
        false
    }

    /// Fans a frame out to every live outbound and mapped inbound stream
    /// (spec.md §4.7's replication rule).
    pub fn broadcast(&self, frame: Frame) {
        for entry in self.outbound.iter() {
            let _ = entry.value().send(frame.clone());
        }
        for entry in self.inbound.iter() {
            let _ = entry.value().send(frame.clone());
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.outbound.contains_key(&id) || self.inbound.contains_key(&id)
    }

    pub fn live_peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.outbound.iter().map(|e| *e.key()).collect();
        for entry in self.inbound.iter() {
            if !ids.contains(entry.key()) {
                ids.push(*entry.key());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_both_directions() {
        let hub = StreamHub::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        hub.register(Direction::Outbound, 2, out_tx);
        hub.register(Direction::Inbound, 3, in_tx);

        hub.broadcast(Frame::KeepAlive);

        assert_eq!(out_rx.recv().await, Some(Frame::KeepAlive));
        assert_eq!(in_rx.recv().await, Some(Frame::KeepAlive));
    }

    #[test]
    fn send_any_prefers_outbound() {
        let hub = StreamHub::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        hub.register(Direction::Outbound, 2, out_tx);
        assert!(hub.send_any(2, Frame::KeepAlive));
        assert!(out_rx.try_recv().is_ok());
    }

    #[test]
    fn send_any_false_when_not_live() {
        let hub = StreamHub::new();
        assert!(!hub.send_any(99, Frame::KeepAlive));
    }
}
