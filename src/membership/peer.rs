use std::time::Instant;

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleHint {
    Leader,
    Candidate,
    Offline,
}

impl std::fmt::Display for RoleHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleHint::Leader => write!(f, "LEADER"),
            RoleHint::Candidate => write!(f, "CANDIDATE"),
            RoleHint::Offline => write!(f, "OFFLINE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Inactive,
    Failed,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Active => write!(f, "ACTIVE"),
            Liveness::Inactive => write!(f, "INACTIVE"),
            Liveness::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single cluster member as recorded in the membership table.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub name: String,
    pub ip: String,
    pub consensus_port: u16,
    pub store_port: u16,
    pub priority: i32,
    pub role_hint: RoleHint,
    pub liveness: Liveness,
    pub term_seen: u32,
    pub last_index: u64,
    pub last_term: u32,
    pub last_heartbeat: Instant,
    pub is_voter: bool,
}

impl Peer {
    pub fn new(id: NodeId, name: String, ip: String, consensus_port: u16, store_port: u16) -> Self {
        Self {
            id,
            name,
            ip,
            consensus_port,
            store_port,
            priority: 0,
            role_hint: RoleHint::Offline,
            liveness: Liveness::Active,
            term_seen: 0,
            last_index: 0,
            last_term: 0,
            last_heartbeat: Instant::now(),
            is_voter: true,
        }
    }
}
