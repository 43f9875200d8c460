//! `VOTE_REQUEST`/`VOTE_GRANTED`/`VOTE_DENIED`/`HEARTBEAT`/`HEARTBEAT_ACK` —
//! the bounded set of consensus messages exchanged over UDP (spec.md §4.4).

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::membership::NodeId;

use super::MAX_FRAME_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramMessage {
    VoteRequest { candidate_id: NodeId, term: u32 },
    VoteGranted { voter_id: NodeId, term: u32 },
    VoteDenied { voter_id: NodeId, term: u32 },
    Heartbeat { leader_id: NodeId, term: u32 },
    HeartbeatAck,
}

impl DatagramMessage {
    pub fn format(&self) -> String {
        match self {
            DatagramMessage::VoteRequest { candidate_id, term } => {
                format!("VOTE_REQUEST {candidate_id} {term}")
            }
            DatagramMessage::VoteGranted { voter_id, term } => {
                format!("VOTE_GRANTED {voter_id} {term}")
            }
            DatagramMessage::VoteDenied { voter_id, term } => {
                format!("VOTE_DENIED {voter_id} {term}")
            }
            DatagramMessage::Heartbeat { leader_id, term } => {
                format!("HEARTBEAT {leader_id} {term}")
            }
            DatagramMessage::HeartbeatAck => "HEARTBEAT_ACK".to_string(),
        }
    }

    /// Unknown or malformed lines are the caller's responsibility to log and
    /// discard (spec.md §4.4); this just returns `None` for them.
    pub fn parse(line: &str) -> Option<Self> {
        if line.len() > MAX_FRAME_BYTES {
            return None;
        }
        let mut tokens = line.split(' ');
        match tokens.next()? {
            "VOTE_REQUEST" => {
                let candidate_id = tokens.next()?.parse().ok()?;
                let term = tokens.next()?.parse().ok()?;
                Some(DatagramMessage::VoteRequest { candidate_id, term })
            }
            "VOTE_GRANTED" => {
                let voter_id = tokens.next()?.parse().ok()?;
                let term = tokens.next()?.parse().ok()?;
                Some(DatagramMessage::VoteGranted { voter_id, term })
            }
            "VOTE_DENIED" => {
                let voter_id = tokens.next()?.parse().ok()?;
                let term = tokens.next()?.parse().ok()?;
                Some(DatagramMessage::VoteDenied { voter_id, term })
            }
            "HEARTBEAT" => {
                let leader_id = tokens.next()?.parse().ok()?;
                let term = tokens.next()?.parse().ok()?;
                Some(DatagramMessage::Heartbeat { leader_id, term })
            }
            "HEARTBEAT_ACK" => Some(DatagramMessage::HeartbeatAck),
            _ => None,
        }
    }
}

/// Capability trait for connectionless delivery, so the consensus engine can
/// be driven by a real `UdpSocket` in production or an in-memory channel in
/// tests (spec.md §9).
pub trait DatagramTransport: Send + Sync {
    /// Fire-and-forget send; failures are logged and update nothing else.
    fn send_to(&self, addr: SocketAddr, msg: DatagramMessage);

    /// Drains zero or more pending datagrams without blocking.
    fn poll(&self) -> Vec<(DatagramMessage, SocketAddr)>;
}

pub struct UdpDatagramTransport {
    socket: UdpSocket,
}

impl UdpDatagramTransport {
    pub async fn bind(port: u16) -> crate::error::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| crate::error::Error::NetworkInit(e.to_string()))?;
        Ok(Self { socket })
    }
}

impl DatagramTransport for UdpDatagramTransport {
    fn send_to(&self, addr: SocketAddr, msg: DatagramMessage) {
        let line = msg.format();
        match self.socket.try_send_to(line.as_bytes(), addr) {
            Ok(_) => {}
            Err(e) => log::debug!("datagram send to {addr} failed: {e}"),
        }
    }

    fn poll(&self) -> Vec<(DatagramMessage, SocketAddr)> {
        let mut out = Vec::new();
        let mut buf = [0u8; MAX_FRAME_BYTES];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    let line = String::from_utf8_lossy(&buf[..n]);
                    match DatagramMessage::parse(line.trim_end()) {
                        Some(msg) => out.push((msg, from)),
                        None => log::debug!("discarding malformed datagram from {from}: {line:?}"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("datagram recv failed: {e}");
                    break;
                }
            }
        }
        out
    }
}

/// In-memory [`DatagramTransport`] double keyed by `SocketAddr`, so a test
/// can wire up several `ConsensusEngine`s and let them exchange datagrams
/// without binding real sockets (spec.md §9's capability-trait cue).
/// `send_to` looks up the destination's inbox by address and pushes
/// directly into it; there is no network to fail against, so sends never
/// drop a message the way a real socket occasionally would.
pub struct ChannelDatagramTransport {
    self_addr: SocketAddr,
    inboxes: std::sync::Arc<parking_lot::Mutex<std::collections::HashMap<SocketAddr, std::collections::VecDeque<(DatagramMessage, SocketAddr)>>>>,
}

impl ChannelDatagramTransport {
    /// Builds one transport per address, all sharing the same inbox table.
    pub fn network(addrs: &[SocketAddr]) -> Vec<Self> {
        let inboxes = std::sync::Arc::new(parking_lot::Mutex::new(
            addrs
                .iter()
                .map(|a| (*a, std::collections::VecDeque::new()))
                .collect::<std::collections::HashMap<_, _>>(),
        ));
        addrs
            .iter()
            .map(|a| Self { self_addr: *a, inboxes: inboxes.clone() })
            .collect()
    }
}

impl DatagramTransport for ChannelDatagramTransport {
    fn send_to(&self, addr: SocketAddr, msg: DatagramMessage) {
        if let Some(inbox) = self.inboxes.lock().get_mut(&addr) {
            inbox.push_back((msg, self.self_addr));
        }
    }

    fn poll(&self) -> Vec<(DatagramMessage, SocketAddr)> {
        match self.inboxes.lock().get_mut(&self.self_addr) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }
}
