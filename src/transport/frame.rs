//! Application frames exchanged over peer stream sessions: handshake,
//! keep-alive, membership propagation, KV replication/forwarding, and
//! leader announcements (spec.md §4.5).

use crate::membership::NodeId;

use super::MAX_FRAME_BYTES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Hello(NodeId),
    KeepAlive,
    Leader { term: u32, leader_id: NodeId },
    PropagateAdd {
        id: NodeId,
        name: String,
        ip: String,
        consensus_port: u16,
        store_port: u16,
    },
    PropagateRemove { id: NodeId },
    Put { key: String, value: String },
    ForwardPut { key: String, value: String },
    Delete { key: String },
    ForwardDelete { key: String },
    Get { key: String },
    Value { key: String, value: String },
    NotFound { key: String },
    LeaderElected { term: u32, leader_id: NodeId },
}

impl Frame {
    pub fn format(&self) -> String {
        match self {
            Frame::Hello(id) => format!("HELLO {id}"),
            Frame::KeepAlive => "KEEP_ALIVE".to_string(),
            Frame::Leader { term, leader_id } => format!("LEADER {term} {leader_id}"),
            Frame::PropagateAdd { id, name, ip, consensus_port, store_port } => {
                format!("PROPAGATE_ADD {id} {name} {ip} {consensus_port} {store_port}")
            }
            Frame::PropagateRemove { id } => format!("PROPAGATE_REMOVE {id}"),
            Frame::Put { key, value } => format!("PUT {key}={value}"),
            Frame::ForwardPut { key, value } => format!("FORWARD_PUT {key}={value}"),
            Frame::Delete { key } => format!("DELETE {key}"),
            Frame::ForwardDelete { key } => format!("FORWARD_DELETE {key}"),
            Frame::Get { key } => format!("GET {key}"),
            Frame::Value { key, value } => format!("VALUE {key}={value}"),
            Frame::NotFound { key } => format!("NOT_FOUND {key}"),
            Frame::LeaderElected { term, leader_id } => {
                format!("LEADER_ELECTED {term} {leader_id}")
            }
        }
    }

    /// Returns `None` for unknown frame kinds or malformed payloads; callers
    /// log and discard (mirrors `DatagramMessage::parse`).
    pub fn parse(line: &str) -> Option<Self> {
        if line.len() > MAX_FRAME_BYTES {
            return None;
        }
        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (line, ""),
        };
        match command {
            "HELLO" => Some(Frame::Hello(rest.parse().ok()?)),
            "KEEP_ALIVE" => Some(Frame::KeepAlive),
            "LEADER" => {
                let mut parts = rest.split(' ');
                let term = parts.next()?.parse().ok()?;
                let leader_id = parts.next()?.parse().ok()?;
                Some(Frame::Leader { term, leader_id })
            }
            "PROPAGATE_ADD" => {
                let mut parts = rest.split(' ');
                let id = parts.next()?.parse().ok()?;
                let name = parts.next()?.to_string();
                let ip = parts.next()?.to_string();
                let consensus_port = parts.next()?.parse().ok()?;
                let store_port = parts.next()?.parse().ok()?;
                Some(Frame::PropagateAdd { id, name, ip, consensus_port, store_port })
            }
            "PROPAGATE_REMOVE" => Some(Frame::PropagateRemove { id: rest.parse().ok()? }),
            "PUT" => {
                let (key, value) = rest.split_once('=')?;
                Some(Frame::Put { key: key.to_string(), value: value.to_string() })
            }
            "FORWARD_PUT" => {
                let (key, value) = rest.split_once('=')?;
                Some(Frame::ForwardPut { key: key.to_string(), value: value.to_string() })
            }
            "DELETE" => Some(Frame::Delete { key: rest.to_string() }),
            "FORWARD_DELETE" => Some(Frame::ForwardDelete { key: rest.to_string() }),
            "GET" => Some(Frame::Get { key: rest.to_string() }),
            "VALUE" => {
                let (key, value) = rest.split_once('=')?;
                Some(Frame::Value { key: key.to_string(), value: value.to_string() })
            }
            "NOT_FOUND" => Some(Frame::NotFound { key: rest.to_string() }),
            "LEADER_ELECTED" => {
                let mut parts = rest.split(' ');
                let term = parts.next()?.parse().ok()?;
                let leader_id = parts.next()?.parse().ok()?;
                Some(Frame::LeaderElected { term, leader_id })
            }
            _ => None,
        }
    }
}
