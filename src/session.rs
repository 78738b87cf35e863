//! Session drivers: the event loops that connect the engines to a socket.
//!
//! # Architecture
//!
//! ```text
//!   run_sender                                ReceiveService::receive
//!  ┌──────────────────────────┐              ┌───────────────────────────┐
//!  │ GbnSender (+ timer)      │── DATA ─────▶│ Simulator (data loss)     │
//!  │                          │              │ GbnReceiver               │
//!  │ Simulator (ack loss)     │◀──── ACK ────│   └─▶ AsyncWrite output   │
//!  └──────────────────────────┘              └───────────────────────────┘
//! ```
//!
//! Each driver is one task running one `tokio::select!` loop, so events are
//! handled strictly one at a time and engine state is never shared.  The
//! sender multiplexes three event sources:
//!
//! 1. inbound datagrams (ACKs),
//! 2. expiry of the engine's retransmission deadline,
//! 3. the optional run limit (external abort).
//!
//! The datagram branch is polled first, so an ACK that has already arrived
//! is processed before a timeout that expires at the same moment; the
//! timeout branch re-checks the engine's deadline before retransmitting.
//!
//! Malformed datagrams are treated exactly like lost ones: logged and
//! discarded, with no ACK and no window update.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::{ConfigError, SessionConfig};
use crate::gbn_receiver::{Disposition, GbnReceiver, ReceiverStats};
use crate::gbn_sender::{GbnSender, SenderStats};
use crate::packet::{Datagram, Packet};
use crate::segmenter::Segmenter;
use crate::seq::SeqSpace;
use crate::simulator::{Simulator, SimulatorStats};
use crate::socket::{Socket, SocketError};

/// Stand-in deadline for a disabled run limit.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Errors that end a session early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    /// The caller-imposed run limit expired before the transfer completed.
    #[error("transfer not acknowledged within {0:?}")]
    RunLimitExceeded(Duration),
}

/// Outcome of a completed send.
#[derive(Debug, Clone)]
pub struct SenderReport {
    pub bytes: usize,
    pub packets: usize,
    pub elapsed: Duration,
    pub stats: SenderStats,
    pub channel: SimulatorStats,
}

/// Outcome of a completed receive.
#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub peer: SocketAddr,
    pub elapsed: Duration,
    pub stats: ReceiverStats,
    pub channel: SimulatorStats,
}

/// Transfer `data` to `peer` with Go-Back-N and return once the final
/// packet is acknowledged.
///
/// ACKs pass through `simulator` on arrival.  The only in-session failures
/// are socket errors and an exceeded `config.run_limit`.
pub async fn run_sender(
    socket: &Socket,
    peer: SocketAddr,
    data: impl Into<Arc<[u8]>>,
    config: &SessionConfig,
    simulator: &mut Simulator,
) -> Result<SenderReport, SessionError> {
    let segmenter = Segmenter::new(data, config.mss.max(1));
    let bytes = segmenter.source_len();
    let mut sender = GbnSender::new(segmenter, config)?;

    let started = Instant::now();
    let abort_at = tokio::time::Instant::now() + config.run_limit.unwrap_or(FAR_FUTURE);
    log::info!(
        "[gbn] sending {} bytes in {} packets to {} (N={}, MSS={}, RTO={:?})",
        bytes,
        sender.total_packets(),
        peer,
        config.window_size,
        config.mss,
        sender.rto()
    );

    loop {
        for pkt in sender.poll_transmit(Instant::now()) {
            socket.send_to(&Datagram::Data(pkt), peer).await?;
        }
        if sender.is_done() {
            break;
        }

        let deadline = sender
            .deadline()
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(|| tokio::time::Instant::now() + sender.rto());

        tokio::select! {
            biased;

            // ── Branch 1: incoming datagram ──────────────────────────────
            result = socket.recv_from() => match result {
                Ok((datagram @ Datagram::Ack(ack), addr)) if addr == peer => {
                    if simulator.maybe_drop(&datagram) {
                        sender.on_ack(ack.ack_seq, Instant::now());
                    }
                }
                Ok((_, addr)) => {
                    log::debug!("[gbn] ignoring unexpected datagram from {addr}");
                }
                Err(SocketError::Packet(e)) => {
                    log::debug!("[gbn] malformed datagram discarded: {e}");
                }
                Err(e) => return Err(e.into()),
            },

            // ── Branch 2: retransmission timeout ─────────────────────────
            _ = tokio::time::sleep_until(deadline) => {
                let now = Instant::now();
                if sender.is_timed_out(now) {
                    for pkt in sender.on_timeout(now) {
                        socket.send_to(&Datagram::Data(pkt), peer).await?;
                    }
                }
            }

            // ── Branch 3: external abort ─────────────────────────────────
            _ = tokio::time::sleep_until(abort_at), if config.run_limit.is_some() => {
                let limit = config.run_limit.unwrap_or(FAR_FUTURE);
                log::warn!("[gbn] run limit of {limit:?} reached at base={}", sender.base());
                return Err(SessionError::RunLimitExceeded(limit));
            }
        }
    }

    let elapsed = started.elapsed();
    let stats = sender.stats();
    log::info!(
        "[gbn] transfer complete in {:?}: {} packets, {} retransmitted, {} timeouts",
        elapsed,
        stats.packets_sent,
        stats.retransmissions,
        stats.timeouts
    );
    Ok(SenderReport {
        bytes,
        packets: sender.total_packets(),
        elapsed,
        stats,
        channel: simulator.stats(),
    })
}

/// Receive side of a session: owns the socket, the receiver engine and the
/// inbound loss simulator.
///
/// One service can take several consecutive transfers; each call to
/// [`receive`](Self::receive) starts from sequence number 0.
#[derive(Debug)]
pub struct ReceiveService {
    socket: Socket,
    receiver: GbnReceiver,
    simulator: Simulator,
    /// How long to keep re-ACKing after completion before returning.
    linger: Duration,
    /// First packet of the next transfer, seen while the previous one lingered.
    pending: Option<(Packet, SocketAddr)>,
}

impl ReceiveService {
    pub fn new(socket: Socket, space: SeqSpace, simulator: Simulator, linger: Duration) -> Self {
        Self {
            socket,
            receiver: GbnReceiver::new(space),
            simulator,
            linger,
            pending: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Accept one transfer and write its bytes to `output` in order.
    ///
    /// The first address to send a well-formed data packet owns the
    /// transfer; anything else from other addresses is ignored.  After the
    /// final packet is accepted and `output` flushed, the service keeps
    /// re-ACKing the owner's retransmissions until it has been quiet for
    /// the linger period, so a lost final ACK does not strand the sender.
    ///
    /// Lingering ends early when the next transfer starts: a seq 0 packet
    /// from another address, or a non-final seq 0 packet from the owner.
    /// That packet is kept and opens the next call to `receive`.
    pub async fn receive<W>(&mut self, output: &mut W) -> Result<ReceiverReport, SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        self.receiver.reset();
        let mut peer: Option<SocketAddr> = None;
        let mut started: Option<Instant> = None;
        let mut elapsed = Duration::ZERO;
        // Armed on completion; only the owner's datagrams push it back.
        let mut linger_until: Option<tokio::time::Instant> = None;

        loop {
            let result = match self.pending.take() {
                Some((packet, addr)) => Ok((Datagram::Data(packet), addr)),
                None => match self.recv_until(linger_until).await {
                    Some(r) => r,
                    None => break,
                },
            };

            let (datagram, addr) = match result {
                Ok(v) => v,
                Err(SocketError::Packet(e)) => {
                    log::debug!("[gbn] malformed datagram discarded: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Datagram::Data(packet) = &datagram else {
                log::debug!("[gbn] receiver ignoring ACK from {addr}");
                continue;
            };

            if self.receiver.is_complete() && starts_new_transfer(peer, addr, packet) {
                log::info!("[gbn] new transfer from {addr} detected; ending linger");
                self.pending = Some((packet.clone(), addr));
                break;
            }
            if *peer.get_or_insert(addr) != addr {
                log::debug!("[gbn] ignoring datagram from {addr} during transfer");
                continue;
            }
            if let Some(deadline) = linger_until.as_mut() {
                *deadline = tokio::time::Instant::now() + self.linger;
            }
            started.get_or_insert_with(Instant::now);
            if !self.simulator.maybe_drop(&datagram) {
                continue;
            }

            let was_complete = self.receiver.is_complete();
            let (disposition, ack) = self.receiver.on_packet(packet);
            self.socket.send_to(&Datagram::Ack(ack), addr).await?;

            if disposition == Disposition::Accepted {
                let bytes = self.receiver.take_output();
                output.write_all(&bytes).await?;
            }
            if !was_complete && self.receiver.is_complete() {
                output.flush().await?;
                elapsed = started.map_or(Duration::ZERO, |s| s.elapsed());
                linger_until = Some(tokio::time::Instant::now() + self.linger);
                log::info!(
                    "[gbn] received {} bytes from {} in {:?}",
                    self.receiver.stats().bytes_delivered,
                    addr,
                    elapsed
                );
            }
        }

        Ok(ReceiverReport {
            // The loop only breaks after completion, which implies a peer.
            peer: peer.unwrap_or(self.socket.local_addr),
            elapsed,
            stats: self.receiver.stats(),
            channel: self.simulator.stats(),
        })
    }

    /// Next datagram, or `None` once `deadline` passes first.
    async fn recv_until(
        &self,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<Result<(Datagram, SocketAddr), SocketError>> {
        let Some(deadline) = deadline else {
            return Some(self.socket.recv_from().await);
        };
        tokio::select! {
            biased;
            result = self.socket.recv_from() => Some(result),
            _ = tokio::time::sleep_until(deadline) => None,
        }
    }
}

/// Whether `packet` from `addr`, arriving after a completed transfer owned
/// by `peer`, opens a new transfer rather than repeating the old one.
///
/// A final seq 0 packet from the owner is a retransmission of a
/// single-packet transfer and is re-ACKed instead.
fn starts_new_transfer(peer: Option<SocketAddr>, addr: SocketAddr, packet: &Packet) -> bool {
    packet.seq == 0 && (peer != Some(addr) || !packet.is_final)
}
