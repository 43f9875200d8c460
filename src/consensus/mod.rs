//! Term discipline, vote granting, and election/heartbeat scheduling
//! (spec.md §3, §4.4, §4.6).
//!
//! `ConsensusEngine` is the only thing allowed to mutate [`RoleState`]. It is
//! driven by two entry points: [`ConsensusEngine::tick`], called once per
//! driver-thread iteration, and [`ConsensusEngine::handle_datagram`], called
//! for each inbound `VOTE_*`/`HEARTBEAT*` message. Both return the list of
//! outbound datagrams the caller (`engine::Engine`) should hand to a
//! [`crate::transport::DatagramTransport`].

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;
use crate::membership::{Membership, NodeId};
use crate::persist::{PersistentState, StateStore};
use crate::transport::datagram::DatagramMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    /// Named by spec.md §3/§6 as a fourth `role()` value. Never assigned by
    /// this engine: every transition in §4.6 runs to completion inside a
    /// single driver-thread call (`tick`/`handle_datagram`), so there is no
    /// instant at which a caller could observe a role between Follower,
    /// Candidate, and Leader. Kept in the enum so `role()`'s signature
    /// matches the facade API exactly; see DESIGN.md.
    Transitioning,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Candidate => write!(f, "CANDIDATE"),
            Role::Leader => write!(f, "LEADER"),
            Role::Transitioning => write!(f, "TRANSITIONING"),
        }
    }
}

/// The in-memory consensus record (spec.md §3). `last_heartbeat` means "last
/// time we heard from the leader" while a Follower/Candidate, and "last time
/// we sent a heartbeat" while Leader.
#[derive(Debug, Clone)]
pub struct RoleState {
    pub current_term: u32,
    pub voted_for: NodeId,
    pub leader_id: NodeId,
    pub role: Role,
    pub last_log_index: u64,
    pub last_log_term: u32,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_heartbeat: Instant,
    pub election_deadline: Instant,
    pub votes_received: u32,
    pub election_active: bool,
}

impl RoleState {
    fn fresh(now: Instant) -> Self {
        Self {
            current_term: 0,
            voted_for: -1,
            leader_id: -1,
            role: Role::Follower,
            last_log_index: 0,
            last_log_term: 0,
            commit_index: 0,
            last_applied: 0,
            last_heartbeat: now,
            election_deadline: now,
            votes_received: 0,
            election_active: false,
        }
    }

    fn from_persistent(state: PersistentState, now: Instant) -> Self {
        Self {
            current_term: state.current_term,
            voted_for: state.voted_for,
            leader_id: state.leader_id,
            role: Role::Follower,
            last_log_index: state.last_log_index,
            last_log_term: state.last_log_term,
            commit_index: 0,
            last_applied: 0,
            last_heartbeat: now,
            election_deadline: now,
            votes_received: 0,
            election_active: false,
        }
    }

    fn to_persistent(&self) -> PersistentState {
        PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            leader_id: self.leader_id,
            last_log_index: self.last_log_index,
            last_log_term: self.last_log_term,
        }
    }
}

/// One datagram the caller should send after a `tick`/`handle_datagram` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundDatagram {
    pub to: SocketAddr,
    pub msg: DatagramMessage,
}

/// The outcome of driving the engine forward by one step.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub outbound: Vec<OutboundDatagram>,
    /// Set the one time this step caused `role` to become `Leader`; the
    /// caller uses this to trigger the `LEADER_ELECTED` stream broadcast and
    /// the `rale.state` write (already done here, but the caller also needs
    /// to know to notify the KV layer).
    pub became_leader: bool,
}

impl StepOutcome {
    fn push(&mut self, to: SocketAddr, msg: DatagramMessage) {
        self.outbound.push(OutboundDatagram { to, msg });
    }
}

pub struct ConsensusEngine {
    self_id: NodeId,
    membership: Arc<Membership>,
    state_store: Arc<StateStore>,
    clock: Clock,
    role: RoleState,
    /// Granters seen per term, always including self once a term's election
    /// has started; used for both the quorum count and grant dedup.
    granters: HashMap<u32, HashSet<NodeId>>,
    last_candidate_broadcast: Option<Instant>,
    last_heartbeat_sent: Option<Instant>,
}

impl ConsensusEngine {
    pub fn new(self_id: NodeId, membership: Arc<Membership>, state_store: Arc<StateStore>, mut clock: Clock) -> Self {
        let now = clock.now();
        let persisted = state_store.load_state();
        let role = if persisted == PersistentState::fresh() {
            RoleState::fresh(now)
        } else {
            RoleState::from_persistent(persisted, now)
        };
        let mut role = role;
        role.election_deadline = clock.next_election_deadline(now);
        Self {
            self_id,
            membership,
            state_store,
            clock,
            role,
            granters: HashMap::new(),
            last_candidate_broadcast: None,
            last_heartbeat_sent: None,
        }
    }

    pub fn role(&self) -> &RoleState {
        &self.role
    }

    fn persist(&self) {
        if let Err(e) = self.state_store.save_state(self.role.to_persistent()) {
            log::warn!("failed to persist rale.state: {e}");
        }
    }

    fn peer_addrs(&self) -> Vec<(NodeId, SocketAddr)> {
        self.membership
            .all()
            .iter()
            .filter_map(|p| {
                format!("{}:{}", p.ip, p.consensus_port)
                    .parse::<SocketAddr>()
                    .ok()
                    .map(|addr| (p.id, addr))
            })
            .collect()
    }

    fn quorum(&self) -> usize {
        self.membership.cluster_count() / 2 + 1
    }

    /// Demotes to Follower and adopts a higher term seen in any message
    /// (spec.md §3 invariant 2). Does not touch `leader_id`; the caller sets
    /// it if the triggering message carried one.
    fn step_down_for_term(&mut self, term: u32) {
        self.role.current_term = term;
        self.role.voted_for = -1;
        self.role.role = Role::Follower;
        self.role.election_active = false;
        self.role.votes_received = 0;
        self.granters.retain(|t, _| *t >= term);
        self.persist();
    }

    fn start_election(&mut self, now: Instant) -> StepOutcome {
        self.role.current_term += 1;
        self.role.voted_for = self.self_id;
        self.role.role = Role::Candidate;
        self.role.election_active = true;
        self.role.election_deadline = self.clock.next_election_deadline(now);
        self.role.last_heartbeat = now;
        let term = self.role.current_term;
        self.granters.insert(term, HashSet::from([self.self_id]));
        self.role.votes_received = 1;
        self.persist();
        self.last_candidate_broadcast = Some(now);

        // A single-node cluster (or any cluster where self alone already
        // meets quorum) has no peer left to grant a vote, so quorum must be
        // checked against the self-vote here rather than waiting for a
        // VoteGranted that will never arrive.
        if self.granters.get(&term).map(|g| g.len()).unwrap_or(0) >= self.quorum() {
            return self.become_leader(now);
        }

        let mut outcome = StepOutcome::default();
        for (_, addr) in self.peer_addrs() {
            outcome.push(addr, DatagramMessage::VoteRequest { candidate_id: self.self_id, term });
        }
        outcome
    }

    fn become_leader(&mut self, now: Instant) -> StepOutcome {
        self.role.role = Role::Leader;
        self.role.leader_id = self.self_id;
        self.role.election_active = false;
        self.role.last_heartbeat = now;
        self.persist();
        self.last_heartbeat_sent = Some(now);
        self.membership.set_role_hint(self.self_id, crate::membership::RoleHint::Leader);

        let mut outcome = self.send_heartbeats();
        outcome.became_leader = true;
        outcome
    }

    fn send_heartbeats(&self) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        for (_, addr) in self.peer_addrs() {
            outcome.push(addr, DatagramMessage::Heartbeat { leader_id: self.self_id, term: self.role.current_term });
        }
        outcome
    }

    /// Called once per driver iteration; advances elections and heartbeats
    /// purely on elapsed time (spec.md §4.6).
    pub fn tick(&mut self) -> StepOutcome {
        let now = self.clock.now();
        match self.role.role {
            Role::Follower => {
                if now >= self.role.election_deadline {
                    self.start_election(now)
                } else {
                    StepOutcome::default()
                }
            }
            Role::Candidate => {
                if now >= self.role.election_deadline {
                    self.start_election(now)
                } else {
                    let should_rebroadcast = self
                        .last_candidate_broadcast
                        .map(|t| now.duration_since(t) >= std::time::Duration::from_secs(1))
                        .unwrap_or(true);
                    if should_rebroadcast {
                        self.last_candidate_broadcast = Some(now);
                        let term = self.role.current_term;
                        let mut outcome = StepOutcome::default();
                        for (_, addr) in self.peer_addrs() {
                            outcome.push(addr, DatagramMessage::VoteRequest { candidate_id: self.self_id, term });
                        }
                        outcome
                    } else {
                        StepOutcome::default()
                    }
                }
            }
            Role::Leader => {
                let due = self
                    .last_heartbeat_sent
                    .map(|t| now.duration_since(t) >= self.clock.heartbeat_interval())
                    .unwrap_or(true);
                if due {
                    self.last_heartbeat_sent = Some(now);
                    self.role.last_heartbeat = now;
                    self.send_heartbeats()
                } else {
                    StepOutcome::default()
                }
            }
            Role::Transitioning => StepOutcome::default(),
        }
    }

    /// Processes one inbound `VOTE_*`/`HEARTBEAT*` datagram.
    pub fn handle_datagram(&mut self, msg: DatagramMessage, from: SocketAddr) -> StepOutcome {
        let now = self.clock.now();
        match msg {
            DatagramMessage::VoteRequest { candidate_id, term } => self.handle_vote_request(candidate_id, term, from),
            DatagramMessage::VoteGranted { voter_id, term } => self.handle_vote_granted(voter_id, term, now),
            DatagramMessage::VoteDenied { voter_id, term } => {
                if term > self.role.current_term {
                    self.step_down_for_term(term);
                }
                log::debug!("vote denied by {voter_id} for term {term}");
                StepOutcome::default()
            }
            DatagramMessage::Heartbeat { leader_id, term } => self.handle_heartbeat(leader_id, term, from, now),
            DatagramMessage::HeartbeatAck => StepOutcome::default(),
        }
    }

    fn handle_vote_request(&mut self, candidate_id: NodeId, term: u32, from: SocketAddr) -> StepOutcome {
        if term > self.role.current_term {
            self.step_down_for_term(term);
        }

        let mut outcome = StepOutcome::default();
        if term < self.role.current_term {
            outcome.push(from, DatagramMessage::VoteDenied { voter_id: self.self_id, term: self.role.current_term });
            return outcome;
        }

        let can_grant = self.role.role != Role::Leader
            && (self.role.voted_for == -1 || self.role.voted_for == candidate_id);
        if can_grant {
            self.role.voted_for = candidate_id;
            self.role.election_deadline = self.clock.next_election_deadline(self.clock.now());
            self.persist();
            outcome.push(from, DatagramMessage::VoteGranted { voter_id: self.self_id, term });
        } else {
            outcome.push(from, DatagramMessage::VoteDenied { voter_id: self.self_id, term });
        }
        outcome
    }

    fn handle_vote_granted(&mut self, voter_id: NodeId, term: u32, now: Instant) -> StepOutcome {
        if term > self.role.current_term {
            self.step_down_for_term(term);
            return StepOutcome::default();
        }
        if term < self.role.current_term || self.role.role != Role::Candidate {
            return StepOutcome::default();
        }
        let granters = self.granters.entry(term).or_insert_with(|| HashSet::from([self.self_id]));
        granters.insert(voter_id);
        self.role.votes_received = granters.len() as u32;

        if granters.len() >= self.quorum() {
            self.become_leader(now)
        } else {
            StepOutcome::default()
        }
    }

    fn handle_heartbeat(&mut self, leader_id: NodeId, term: u32, from: SocketAddr, now: Instant) -> StepOutcome {
        if term > self.role.current_term {
            self.step_down_for_term(term);
        }
        if term < self.role.current_term {
            return StepOutcome::default();
        }

        if self.role.role == Role::Leader {
            if leader_id != self.self_id && leader_id != self.role.leader_id {
                // Equal-term conflict: demote and adopt the sender's
                // leader_id (spec.md §4.6 tie-break). Fires only the first
                // time this conflicting id is observed — once adopted,
                // `leader_id == self.role.leader_id` and this branch is
                // simply skipped on later duplicate heartbeats.
                self.role.role = Role::Follower;
                self.role.leader_id = leader_id;
                self.role.last_heartbeat = now;
                self.role.election_deadline = self.clock.next_election_deadline(now);
                self.persist();
            }
        } else {
            self.role.role = Role::Follower;
            self.role.election_active = false;
            if self.role.leader_id != leader_id {
                self.role.leader_id = leader_id;
                self.persist();
            }
            self.role.last_heartbeat = now;
            self.role.election_deadline = self.clock.next_election_deadline(now);
        }

        let mut outcome = StepOutcome::default();
        outcome.push(from, DatagramMessage::HeartbeatAck);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Peer;
    use std::time::Duration;

    fn engine(self_id: NodeId) -> (ConsensusEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let membership = Arc::new(Membership::init());
        membership.set_self(self_id).unwrap();
        let state_store = Arc::new(StateStore::new(dir.path()));
        let clock = Clock::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap();
        (ConsensusEngine::new(self_id, membership, state_store, clock), dir)
    }

    #[test]
    fn vote_request_grants_once_per_term() {
        let (mut e, _dir) = engine(1);
        let from: SocketAddr = "127.0.0.1:9001".parse().unwrap();

        let out = e.handle_vote_request(2, 1, from);
        assert_eq!(out.outbound.len(), 1);
        assert_eq!(out.outbound[0].msg, DatagramMessage::VoteGranted { voter_id: 1, term: 1 });
        assert_eq!(e.role().voted_for, 2);

        // A second candidate in the same term is denied: P1.
        let out2 = e.handle_vote_request(3, 1, from);
        assert_eq!(out2.outbound[0].msg, DatagramMessage::VoteDenied { voter_id: 1, term: 1 });
    }

    #[test]
    fn higher_term_forces_demotion_and_vote_reset() {
        let (mut e, _dir) = engine(1);
        e.start_election(e.clock.now());
        assert_eq!(e.role().role, Role::Candidate);

        let from: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        e.handle_heartbeat(2, e.role().current_term + 5, from, e.clock.now());
        assert_eq!(e.role().role, Role::Follower);
        assert_eq!(e.role().voted_for, -1);
        assert_eq!(e.role().leader_id, 2);
    }

    #[test]
    fn single_node_cluster_becomes_leader_on_its_own_vote() {
        let (mut e, _dir) = engine(1);
        let now = e.clock.now();
        let outcome = e.start_election(now);
        assert!(outcome.outbound.is_empty(), "no peers to send VoteRequest to");
        assert!(outcome.became_leader);
        assert_eq!(e.role().role, Role::Leader);
        assert_eq!(e.role().leader_id, 1);
    }

    #[test]
    fn becomes_leader_once_quorum_of_votes_is_granted() {
        let (mut e, _dir) = engine(1);
        e.membership.add_peer(Peer::new(2, "n2".into(), "127.0.0.1".into(), 7001, 8001)).unwrap();
        e.membership.add_peer(Peer::new(3, "n3".into(), "127.0.0.1".into(), 7002, 8002)).unwrap();

        // Four-node cluster (self + 3 peers): quorum is 3, so one grant on
        // top of self's own vote is not yet enough.
        e.membership.add_peer(Peer::new(4, "n4".into(), "127.0.0.1".into(), 7003, 8003)).unwrap();
        let out = e.start_election(e.clock.now());
        assert_eq!(out.outbound.len(), 3);
        let term = e.role().current_term;

        let now = e.clock.now();
        let out = e.handle_vote_granted(2, term, now);
        assert!(!out.became_leader, "self + 1 grant is not yet quorum of 4");
        let out = e.handle_vote_granted(3, term, now);
        assert!(out.became_leader);
        assert_eq!(e.role().role, Role::Leader);
        assert_eq!(e.role().leader_id, 1);
    }

    #[test]
    fn equal_term_leader_conflict_demotes_and_adopts_sender() {
        let (mut e, _dir) = engine(5);
        e.become_leader(e.clock.now());
        let from: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        e.handle_heartbeat(2, e.role().current_term, from, e.clock.now());
        assert_eq!(e.role().role, Role::Follower);
        assert_eq!(e.role().leader_id, 2);
    }

    #[test]
    fn equal_term_leader_conflict_no_ops_once_adopted() {
        let (mut e, _dir) = engine(5);
        e.become_leader(e.clock.now());
        let from: SocketAddr = "127.0.0.1:9004".parse().unwrap();
        let term = e.role().current_term;
        e.handle_heartbeat(2, term, from, e.clock.now());
        assert_eq!(e.role().leader_id, 2);
        // Same conflicting id again: already adopted, nothing further to do.
        e.handle_heartbeat(2, term, from, e.clock.now());
        assert_eq!(e.role().role, Role::Follower);
        assert_eq!(e.role().leader_id, 2);
    }
}
