//! In-process multi-node election scenarios (spec.md §8, scenarios 1-3),
//! driven deterministically: nodes exchange datagrams over
//! [`rale::transport::datagram::ChannelDatagramTransport`] instead of real
//! UDP sockets. Election/heartbeat timeouts are configured small
//! (milliseconds) so the scenarios complete in well under a second without
//! relying on the production 5s/1s defaults.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rale::clock::Clock;
use rale::consensus::{ConsensusEngine, Role};
use rale::membership::{Membership, NodeId, Peer};
use rale::persist::StateStore;
use rale::transport::datagram::{ChannelDatagramTransport, DatagramMessage, DatagramTransport};

struct Node {
    id: NodeId,
    engine: ConsensusEngine,
    datagram: ChannelDatagramTransport,
    _dir: tempfile::TempDir,
}

const ELECTION_TIMEOUT: Duration = Duration::from_millis(40);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5);

/// Builds `n` nodes on successive loopback ports, each with the other
/// `n-1` as peers.
fn build_cluster(n: i32) -> Vec<Node> {
    let base_port = 23000u16;
    let addrs: Vec<SocketAddr> = (0..n)
        .map(|i| format!("127.0.0.1:{}", base_port + i as u16).parse().unwrap())
        .collect();
    let transports = ChannelDatagramTransport::network(&addrs);

    transports
        .into_iter()
        .enumerate()
        .map(|(idx, datagram)| {
            let id = idx as NodeId + 1;
            let dir = tempfile::tempdir().unwrap();
            let membership = Arc::new(Membership::init());
            membership.set_self(id).unwrap();
            for (peer_idx, addr) in addrs.iter().enumerate() {
                let peer_id = peer_idx as NodeId + 1;
                if peer_id == id {
                    continue;
                }
                membership
                    .add_peer(Peer::new(peer_id, format!("node-{peer_id}"), addr.ip().to_string(), addr.port(), addr.port()))
                    .unwrap();
            }
            let state_store = Arc::new(StateStore::new(dir.path()));
            let clock = Clock::new(ELECTION_TIMEOUT, HEARTBEAT_INTERVAL).unwrap();
            let engine = ConsensusEngine::new(id, membership, state_store, clock);
            Node { id, engine, datagram, _dir: dir }
        })
        .collect()
}

/// Runs one simulated round: each node ticks, sends what it produces, then
/// every node drains and processes its inbox. Returns the ids that became
/// leader this round.
fn run_round(nodes: &mut [Node]) -> Vec<NodeId> {
    let mut became_leader = Vec::new();
    for node in nodes.iter_mut() {
        let outcome = node.engine.tick();
        if outcome.became_leader {
            became_leader.push(node.id);
        }
        for action in outcome.outbound {
            node.datagram.send_to(action.to, action.msg);
        }
    }
    for node in nodes.iter_mut() {
        let inbox: Vec<(DatagramMessage, SocketAddr)> = node.datagram.poll();
        for (msg, from) in inbox {
            let outcome = node.engine.handle_datagram(msg, from);
            if outcome.became_leader {
                became_leader.push(node.id);
            }
            for action in outcome.outbound {
                node.datagram.send_to(action.to, action.msg);
            }
        }
    }
    became_leader
}

/// Runs rounds, sleeping slightly longer than the election timeout between
/// them, until some node reports becoming leader or `max_rounds` elapses.
fn run_until_leader(nodes: &mut [Node], max_rounds: usize) -> Vec<NodeId> {
    let mut leaders = Vec::new();
    for _ in 0..max_rounds {
        leaders.extend(run_round(nodes));
        if !leaders.is_empty() {
            break;
        }
        std::thread::sleep(ELECTION_TIMEOUT + Duration::from_millis(5));
    }
    leaders
}

#[test]
fn scenario_1_single_node_becomes_leader() {
    let mut nodes = build_cluster(1);
    let leaders = run_until_leader(&mut nodes, 10);
    assert_eq!(leaders, vec![1]);
    assert_eq!(nodes[0].engine.role().role, Role::Leader);
    assert_eq!(nodes[0].engine.role().leader_id, 1);
}

#[test]
fn scenario_2_three_node_cluster_elects_exactly_one_leader_p1() {
    let mut nodes = build_cluster(3);
    let mut leaders_seen = std::collections::HashSet::new();

    for _ in 0..20 {
        for id in run_round(&mut nodes) {
            leaders_seen.insert(id);
        }
        if !leaders_seen.is_empty() {
            break;
        }
        std::thread::sleep(ELECTION_TIMEOUT + Duration::from_millis(5));
    }

    // P1: at most one node becomes Leader for the term it won.
    assert_eq!(leaders_seen.len(), 1, "expected exactly one leader to emerge: {leaders_seen:?}");
    let leader_id = *leaders_seen.iter().next().unwrap();

    // Quiesce a few more rounds so followers observe the heartbeat and the
    // rest of the cluster converges on the same leader id.
    for _ in 0..10 {
        run_round(&mut nodes);
    }
    for node in &nodes {
        if node.id == leader_id {
            assert_eq!(node.engine.role().role, Role::Leader);
        } else {
            assert_eq!(node.engine.role().leader_id, leader_id);
        }
    }
}

#[test]
fn scenario_3_leader_crash_triggers_new_election_with_higher_term() {
    let mut nodes = build_cluster(3);
    let leaders = run_until_leader(&mut nodes, 40);
    assert_eq!(leaders.len(), 1);
    let old_leader_id = leaders[0];
    let old_term = nodes
        .iter()
        .find(|n| n.id == old_leader_id)
        .unwrap()
        .engine
        .role()
        .current_term;

    // "Crash" the leader: drop it from the simulated cluster entirely.
    nodes.retain(|n| n.id != old_leader_id);

    let mut new_leaders = std::collections::HashSet::new();
    for _ in 0..20 {
        for id in run_round(&mut nodes) {
            new_leaders.insert(id);
        }
        if !new_leaders.is_empty() {
            break;
        }
        std::thread::sleep(ELECTION_TIMEOUT + Duration::from_millis(5));
    }

    assert_eq!(new_leaders.len(), 1);
    let new_leader_id = *new_leaders.iter().next().unwrap();
    assert_ne!(new_leader_id, old_leader_id);
    let new_term = nodes
        .iter()
        .find(|n| n.id == new_leader_id)
        .unwrap()
        .engine
        .role()
        .current_term;
    assert!(new_term > old_term, "a new election must strictly increase the term");
}

#[test]
fn vote_request_below_current_term_is_denied_p2() {
    let dir = tempfile::tempdir().unwrap();
    let membership = Arc::new(Membership::init());
    membership.set_self(1).unwrap();
    let state_store = Arc::new(StateStore::new(dir.path()));
    let clock = Clock::new(ELECTION_TIMEOUT, HEARTBEAT_INTERVAL).unwrap();
    let mut engine = ConsensusEngine::new(1, membership, state_store, clock);

    let from: SocketAddr = "127.0.0.1:9100".parse().unwrap();
    let granted = engine.handle_datagram(DatagramMessage::VoteRequest { candidate_id: 2, term: 5 }, from);
    assert_eq!(granted.outbound[0].msg, DatagramMessage::VoteGranted { voter_id: 1, term: 5 });

    // voted_for is now 2 at term 5; a lower-term request from another
    // candidate is denied outright, never consulting voted_for.
    let denied = engine.handle_datagram(DatagramMessage::VoteRequest { candidate_id: 3, term: 1 }, from);
    assert_eq!(denied.outbound[0].msg, DatagramMessage::VoteDenied { voter_id: 1, term: 5 });
}
