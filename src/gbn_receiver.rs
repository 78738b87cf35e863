//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N:
//!
//! - Only **in-order** packets are accepted (`seq == expect_seq`).
//! - Out-of-order or duplicate packets are **silently discarded**; nothing
//!   is buffered, so receiver state is a single cursor.
//! - Every packet, accepted or not, produces a **cumulative ACK** carrying
//!   the last sequence number accepted in order (`expect_seq - 1`).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (the caller sends the returned [`Ack`]).

use std::collections::VecDeque;

use crate::packet::{Ack, Packet};
use crate::seq::SeqSpace;

/// What [`GbnReceiver::on_packet`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// In order; payload appended to the output.
    Accepted,
    /// Out of order, duplicate, or after the stream completed.
    Discarded,
}

/// Counters describing one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub discarded: u64,
    pub bytes_delivered: u64,
}

/// Go-Back-N receive-side state for one transfer.
#[derive(Debug)]
pub struct GbnReceiver {
    space: SeqSpace,
    /// Sequence number of the next packet that will be accepted.
    expect_seq: u32,
    /// Set once the `is_final` packet has been accepted.
    complete: bool,
    /// In-order payload bytes not yet drained by the caller.
    app_buffer: VecDeque<u8>,
    stats: ReceiverStats,
}

impl GbnReceiver {
    pub fn new(space: SeqSpace) -> Self {
        Self {
            space,
            expect_seq: 0,
            complete: false,
            app_buffer: VecDeque::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn expect_seq(&self) -> u32 {
        self.expect_seq
    }

    /// `true` once the final packet has been accepted.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// The ACK the receiver currently sends: last seq accepted in order.
    pub fn cumulative_ack(&self) -> Ack {
        Ack {
            ack_seq: self.space.prev(self.expect_seq),
        }
    }

    /// Process one inbound packet and return the ACK to send back.
    pub fn on_packet(&mut self, packet: &Packet) -> (Disposition, Ack) {
        if self.complete || packet.seq != self.expect_seq {
            self.stats.discarded += 1;
            let ack = self.cumulative_ack();
            log::debug!(
                "[gbn] ← DATA seq={} discarded (expect {}); → ACK {}",
                packet.seq,
                self.expect_seq,
                ack.ack_seq
            );
            return (Disposition::Discarded, ack);
        }

        self.app_buffer.extend(packet.payload.iter().copied());
        self.expect_seq = self.space.next(self.expect_seq);
        self.stats.accepted += 1;
        self.stats.bytes_delivered += packet.payload.len() as u64;
        if packet.is_final {
            self.complete = true;
            log::info!("[gbn] final packet seq={} accepted; stream complete", packet.seq);
        }
        log::debug!(
            "[gbn] ← DATA seq={} len={} accepted; → ACK {}",
            packet.seq,
            packet.payload.len(),
            packet.seq
        );
        (Disposition::Accepted, Ack { ack_seq: packet.seq })
    }

    /// Number of delivered bytes waiting to be drained.
    pub fn buffered(&self) -> usize {
        self.app_buffer.len()
    }

    /// Copy up to `buf.len()` in-order bytes from the application buffer
    /// into `buf`.  Returns the number of bytes actually copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.app_buffer.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Drain every delivered byte.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.app_buffer.drain(..).collect()
    }

    /// Forget the current transfer and expect a new one starting at seq 0.
    ///
    /// Undrained output is discarded.
    pub fn reset(&mut self) {
        self.expect_seq = 0;
        self.complete = false;
        self.app_buffer.clear();
        self.stats = ReceiverStats::default();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
