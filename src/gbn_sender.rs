//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `N` in-flight packets
//! over the chunks produced by a [`Segmenter`].
//!
//! # Protocol contract
//!
//! - At most `window_size` packets may be in flight at once.
//! - Packets are numbered `0, 1, 2, …` modulo the [`SeqSpace`]; the last
//!   chunk carries `is_final`.
//! - ACKs are **cumulative**: `ack_seq = K` means the receiver has accepted
//!   every packet up to and including `K`.  Only ACKs inside
//!   `[base, next_seq)` move the window; anything else is stale and ignored.
//! - On timeout, **every** in-flight packet from `base` onwards is
//!   retransmitted in order (go back N) and the timer restarts.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  Time is passed in explicitly so the engine can be driven
//! from a real event loop or stepped deterministically in tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{ConfigError, SessionConfig};
use crate::packet::Packet;
use crate::segmenter::Segmenter;
use crate::seq::SeqSpace;
use crate::timer::RetransmitTimer;

/// A single in-flight packet occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct GbnEntry {
    pub packet: Packet,
    /// Total number of times this packet has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission (for RTT sampling).
    pub sent_at: Instant,
}

/// Counters describing one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// First transmissions; equals the chunk count once the transfer is done.
    pub packets_sent: u64,
    /// Packets re-sent because of a timeout.
    pub retransmissions: u64,
    pub timeouts: u64,
    /// ACKs that advanced the window.
    pub acks_received: u64,
    /// Duplicate or out-of-window ACKs.
    pub stale_acks: u64,
}

/// Go-Back-N send-side state for one transfer.
///
/// # Sequence-number layout
///
/// ```text
///    base               next_seq
///      │                    │
///  ────┼────────────────────┼──────────────────▶ seq space (mod SEQ_SPACE)
///      │ <── in flight ───▶ │ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct GbnSender {
    segmenter: Segmenter,
    space: SeqSpace,
    window_size: usize,

    /// Sequence number of the oldest unacked packet (left window edge).
    base: u32,
    /// Sequence number for the next new packet.
    next_seq: u32,
    /// Chunk index that `next_seq` refers to.
    next_index: usize,

    /// In-flight packets ordered by sequence number (front = `base`).
    window: VecDeque<GbnEntry>,
    timer: RetransmitTimer,
    stats: SenderStats,
}

impl GbnSender {
    /// Start a transfer of `segmenter`'s chunks under `config`.
    ///
    /// Fails on an invalid configuration; nothing is sent until
    /// [`poll_transmit`](Self::poll_transmit) is called.
    pub fn new(segmenter: Segmenter, config: &SessionConfig) -> Result<Self, ConfigError> {
        let space = config.validate()?;
        if segmenter.mss() != config.mss {
            log::warn!(
                "[gbn] segmenter mss {} differs from configured mss {}",
                segmenter.mss(),
                config.mss
            );
        }
        Ok(Self {
            segmenter,
            space,
            window_size: config.window_size,
            base: 0,
            next_seq: 0,
            next_index: 0,
            window: VecDeque::with_capacity(config.window_size),
            timer: RetransmitTimer::new(config.timer.clone()),
            stats: SenderStats::default(),
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn seq_space(&self) -> SeqSpace {
        self.space
    }

    /// Number of packets currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// `true` when at least one packet is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }

    /// `true` when the window has room and unsent chunks remain.
    pub fn can_send(&self) -> bool {
        self.window.len() < self.window_size && self.next_index < self.total_packets()
    }

    /// Number of packets in the whole transfer.
    pub fn total_packets(&self) -> usize {
        self.segmenter.chunk_count()
    }

    /// `true` once the final packet has been cumulatively acknowledged.
    pub fn is_done(&self) -> bool {
        self.next_index == self.total_packets() && self.window.is_empty()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// When the retransmission timer fires, or `None` while it is idle.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// `true` when the timer is running and has expired at `now`.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.timer.is_expired(now)
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.timer.rto()
    }

    /// Iterate over all in-flight packets from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &GbnEntry> {
        self.window.iter()
    }

    /// Admit as many new packets as the window allows.
    ///
    /// Returns the packets the caller must transmit, in sequence order.  The
    /// timer is armed if the window was empty before the first of them.
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.can_send() {
            let Some(chunk) = self.segmenter.chunk(self.next_index) else {
                break;
            };
            let packet = Packet {
                seq: self.next_seq,
                payload: chunk.to_vec(),
                is_final: self.next_index + 1 == self.total_packets(),
            };

            if self.window.is_empty() {
                self.timer.arm(now);
            }
            self.window.push_back(GbnEntry {
                packet: packet.clone(),
                tx_count: 1,
                sent_at: now,
            });
            self.next_seq = self.space.next(self.next_seq);
            self.next_index += 1;
            self.stats.packets_sent += 1;

            log::debug!(
                "[gbn] → DATA seq={} len={} final={} in_flight={}",
                packet.seq,
                packet.payload.len(),
                packet.is_final,
                self.window.len()
            );
            out.push(packet);
        }
        out
    }

    /// Process a cumulative ACK.
    ///
    /// Slides `base` to `ack_seq + 1` when `ack_seq` is inside the window and
    /// returns the number of newly acknowledged packets.  Returns `0` for a
    /// duplicate, stale or out-of-range ACK, which changes nothing.
    pub fn on_ack(&mut self, ack_seq: u32, now: Instant) -> usize {
        let offset = self.space.distance(self.base, ack_seq);
        if offset >= self.window.len() as u64 {
            self.stats.stale_acks += 1;
            log::debug!(
                "[gbn] ← ACK ack_seq={} ignored (window [{}, {}))",
                ack_seq,
                self.base,
                self.next_seq
            );
            return 0;
        }

        let acked = offset as usize + 1;
        let newest = self.window.drain(..acked).last();
        // Karn: only packets sent exactly once give an unambiguous RTT.
        if let Some(entry) = newest.filter(|e| e.tx_count == 1) {
            self.timer
                .record_rtt_sample(now.saturating_duration_since(entry.sent_at));
        }

        self.base = self.space.next(ack_seq);
        self.stats.acks_received += 1;

        if self.window.is_empty() {
            self.timer.cancel();
        } else {
            self.timer.restart(now);
        }
        log::debug!(
            "[gbn] ← ACK ack_seq={} slid={} in_flight={}",
            ack_seq,
            acked,
            self.window.len()
        );
        acked
    }

    /// Handle expiry of the retransmission timer.
    ///
    /// Returns every in-flight packet, oldest first, for retransmission and
    /// restarts the timer.  With nothing in flight the timer is simply
    /// cancelled.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<Packet> {
        if self.window.is_empty() {
            self.timer.cancel();
            return Vec::new();
        }

        log::info!("Timeout, sequence number = {}", self.base);
        self.stats.timeouts += 1;
        self.stats.retransmissions += self.window.len() as u64;
        self.timer.back_off();

        let mut out = Vec::with_capacity(self.window.len());
        for entry in self.window.iter_mut() {
            entry.tx_count += 1;
            entry.sent_at = now;
            out.push(entry.packet.clone());
        }
        self.timer.restart(now);
        out
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
