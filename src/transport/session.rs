//! HELLO handshake, keep-alive, and backoff-with-reconnect for one peer's
//! outbound dial and inbound accept (spec.md §4.5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::error::{Error, Result};
use crate::mailbox::EngineEvent;
use crate::membership::{Membership, NodeId};
use crate::persist::StateStore;
use crate::shutdown::{ShutdownCoordinator, Token as ShutdownToken};

use super::frame::Frame;
use super::hub::{Direction, StreamHub};
use super::stream::{self, LineConnection};

/// `R * 2^floor(A/5)`, capped at `4R` (spec.md §4.5).
pub fn backoff_interval(attempt: u32, base: Duration) -> Duration {
    let exp = (attempt / 5).min(16);
    let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(base * 4).min(base * 4)
}

/// Shared handles every session task needs; cheap to clone via `Arc`.
pub struct SharedNet {
    pub self_id: NodeId,
    pub membership: Arc<Membership>,
    pub state_store: Arc<StateStore>,
    pub hub: Arc<StreamHub>,
    pub mailbox_tx: mpsc::UnboundedSender<EngineEvent>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
    pub base_retry: Duration,
}

fn handshake_snapshot_frames(net: &SharedNet) -> Vec<Frame> {
    net.membership
        .all()
        .into_iter()
        .map(|p| Frame::PropagateAdd {
            id: p.id,
            name: p.name,
            ip: p.ip,
            consensus_port: p.consensus_port,
            store_port: p.store_port,
        })
        .collect()
}

fn handshake_leader_frame(net: &SharedNet) -> Option<Frame> {
    let state = net.state_store.load_state();
    if state.leader_id != -1 {
        Some(Frame::Leader { term: state.current_term, leader_id: state.leader_id })
    } else {
        None
    }
}

/// Spawns the connect-with-backoff loop for one configured peer. Returns the
/// sender the rest of the engine uses to push outbound frames to it (already
/// registered with the hub) and the task handle so `finit` can join it.
pub fn spawn_outbound(
    peer_id: NodeId,
    net: Arc<SharedNet>,
) -> (mpsc::UnboundedSender<Frame>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    net.hub.register(Direction::Outbound, peer_id, tx.clone());
    let handle = tokio::spawn(run_outbound(peer_id, net, rx));
    (tx, handle)
}

async fn run_outbound(peer_id: NodeId, net: Arc<SharedNet>, mut outbound_rx: mpsc::UnboundedReceiver<Frame>) {
    let mut attempt: u32 = 0;
    loop {
        if net.shutdown.is_requested(ShutdownToken::Comm) {
            return;
        }
        let peer = match net.membership.get_by_id(peer_id) {
            Some(p) => p,
            None => return,
        };
        let addr: SocketAddr = match format!("{}:{}", peer.ip, peer.store_port).parse() {
            Ok(a) => a,
            Err(e) => {
                log::debug!("peer {peer_id} has unparseable address: {e}");
                tokio::time::sleep(backoff_interval(attempt, net.base_retry)).await;
                attempt += 1;
                continue;
            }
        };

        match stream::connect(addr).await {
            Ok(conn) => {
                attempt = 0;
                net.membership.mark_live(peer_id, true);
                let _ = net.mailbox_tx.send(EngineEvent::SessionUp { peer_id });
                if let Err(e) =
                    run_connected(peer_id, Direction::Outbound, conn, &net, Some(&mut outbound_rx)).await
                {
                    log::debug!("outbound session to {peer_id} ended: {e}");
                }
                net.membership.mark_live(peer_id, false);
                let _ = net.mailbox_tx.send(EngineEvent::SessionDown { peer_id });
            }
            Err(_) => {
                attempt += 1;
            }
        }

        if net.shutdown.is_requested(ShutdownToken::Comm) {
            return;
        }
        tokio::time::sleep(backoff_interval(attempt, net.base_retry)).await;
    }
}

/// Drives one already-connected line session until it errors, hits EOF, or
/// shutdown is requested. `outbound_rx` is the receiving half of the hub
/// channel the caller registered for this peer/direction before calling in;
/// both the outbound-dial and inbound-accept callers pass `Some` so frames
/// posted to either side of `StreamHub` (replication fan-out, forwards,
/// `GET` replies) actually reach the socket while the session is alive.
async fn run_connected(
    peer_id: NodeId,
    direction: Direction,
    conn: LineConnection,
    net: &Arc<SharedNet>,
    mut outbound_rx: Option<&mut mpsc::UnboundedReceiver<Frame>>,
) -> Result<()> {
    let LineConnection { mut reader, mut writer, .. } = conn;

    if direction == Direction::Outbound {
        writer
            .send(Frame::Hello(net.self_id).format())
            .await
            .map_err(|e| Error::SocketOp(e.to_string()))?;
        writer
            .send(Frame::KeepAlive.format())
            .await
            .map_err(|e| Error::SocketOp(e.to_string()))?;
        for frame in handshake_snapshot_frames(net) {
            writer.send(frame.format()).await.map_err(|e| Error::SocketOp(e.to_string()))?;
        }
        if let Some(frame) = handshake_leader_frame(net) {
            writer.send(frame.format()).await.map_err(|e| Error::SocketOp(e.to_string()))?;
        }
    }

    let mut keep_alive = tokio::time::interval(net.keep_alive_interval);
    keep_alive.tick().await;
    let mut shutdown_poll = tokio::time::interval(Duration::from_millis(50));
    let mut last_seen = Instant::now();

    loop {
        if net.shutdown.is_requested(ShutdownToken::Comm) {
            let _ = writer.close().await;
            return Ok(());
        }
        if last_seen.elapsed() > net.keep_alive_timeout {
            net.membership.mark_live(peer_id, false);
        }

        tokio::select! {
            _ = shutdown_poll.tick() => {}
            line = reader.next() => {
                match line {
                    Some(Ok(l)) => {
                        last_seen = Instant::now();
                        net.membership.mark_live(peer_id, true);
                        match Frame::parse(&l) {
                            Some(Frame::KeepAlive) => {}
                            Some(frame) => {
                                let _ = net.mailbox_tx.send(EngineEvent::FrameReceived {
                                    peer_id,
                                    direction,
                                    frame,
                                });
                            }
                            None => log::debug!("discarding malformed frame from {peer_id}: {l:?}"),
                        }
                    }
                    Some(Err(e)) => return Err(Error::SocketOp(e.to_string())),
                    None => return Ok(()),
                }
            }
            _ = keep_alive.tick() => {
                writer.send(Frame::KeepAlive.format()).await.map_err(|e| Error::SocketOp(e.to_string()))?;
            }
            maybe_frame = recv_outbound(&mut outbound_rx) => {
                match maybe_frame {
                    Some(frame) => {
                        writer.send(frame.format()).await.map_err(|e| Error::SocketOp(e.to_string()))?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Awaits the next frame the engine wants to push out. Both callers of
/// `run_connected` pass `Some`; the `None` arm only guards a session run
/// without a registered hub channel and pends forever rather than busy-loop.
async fn recv_outbound(rx: &mut Option<&mut mpsc::UnboundedReceiver<Frame>>) -> Option<Frame> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

/// Binds the configured store port and accepts inbound peer sessions,
/// dropping any socket that doesn't present `HELLO <id>` within 2s.
pub async fn run_accept_loop(listener: TcpListener, net: Arc<SharedNet>) {
    loop {
        if net.shutdown.is_requested(ShutdownToken::Comm) {
            return;
        }
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let net = net.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_inbound(stream, addr, net).await {
                                log::debug!("inbound session from {addr} ended: {e}");
                            }
                        });
                    }
                    Err(e) => log::debug!("accept failed: {e}"),
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
}

async fn handle_inbound(stream: TcpStream, addr: SocketAddr, net: Arc<SharedNet>) -> Result<()> {
    let conn = LineConnection::from_stream(stream)?;
    let LineConnection { mut reader, writer, .. } = conn;

    let first_line = tokio::time::timeout(Duration::from_secs(2), reader.next()).await;
    let peer_id = match first_line {
        Ok(Some(Ok(line))) => match Frame::parse(&line) {
            Some(Frame::Hello(id)) => id,
            _ => {
                log::debug!("first frame from {addr} was not HELLO, dropping");
                return Ok(());
            }
        },
        _ => {
            log::debug!("no HELLO from {addr} within 2s, dropping");
            return Ok(());
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    net.hub.register(Direction::Inbound, peer_id, tx);
    net.membership.mark_live(peer_id, true);
    let _ = net.mailbox_tx.send(EngineEvent::SessionUp { peer_id });

    let conn = LineConnection { reader, writer, peer_addr: addr };
    let result = run_connected(peer_id, Direction::Inbound, conn, &net, Some(&mut rx)).await;

    net.hub.unregister(Direction::Inbound, peer_id);
    net.membership.mark_live(peer_id, false);
    let _ = net.mailbox_tx.send(EngineEvent::SessionDown { peer_id });
    // Drain anything left in the channel so senders don't block forever.
    while rx.try_recv().is_ok() {}
    result
}
