//! Lossy-channel simulator.
//!
//! Real networks drop packets, but a loopback socket essentially never does.
//! To exercise the retransmission machinery, the receiving side of each hop
//! passes every inbound datagram through [`Simulator::maybe_drop`] and acts
//! on it only if it was "delivered".
//!
//! Loss is configured per direction: data packets arriving at the receiver
//! and ACKs arriving at the sender each have their own [`LossModel`].
//!
//! | Model        | Behaviour                                            |
//! |--------------|------------------------------------------------------|
//! | [`NoLoss`]   | Everything is delivered.                             |
//! | [`Bernoulli`]| Independent drop with probability `p`, seedable RNG. |
//! | [`Scripted`] | Replays an exact drop/deliver sequence (tests).      |

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{validate_probability, ConfigError};
use crate::packet::Datagram;

/// Decides, one datagram at a time, whether to drop it.
pub trait LossModel: Send + Sync {
    /// `true` to drop the next datagram.
    fn should_drop(&mut self) -> bool;
}

/// Perfectly reliable channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn should_drop(&mut self) -> bool {
        false
    }
}

/// Memoryless loss: each datagram is dropped independently with
/// probability `p`.
#[derive(Debug, Clone)]
pub struct Bernoulli<R = StdRng> {
    p: f64,
    rng: R,
}

impl Bernoulli<StdRng> {
    /// Loss with probability `p`, seeded from `seed` or from the OS when
    /// `seed` is `None`.
    pub fn new(p: f64, seed: Option<u64>) -> Result<Self, ConfigError> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(p, rng)
    }
}

impl<R: Rng> Bernoulli<R> {
    /// Loss with probability `p` drawing from a caller-supplied generator.
    pub fn with_rng(p: f64, rng: R) -> Result<Self, ConfigError> {
        Ok(Self {
            p: validate_probability(p)?,
            rng,
        })
    }

    pub fn probability(&self) -> f64 {
        self.p
    }
}

impl<R: Rng + Send + Sync> LossModel for Bernoulli<R> {
    fn should_drop(&mut self) -> bool {
        // random() is uniform in [0, 1); p = 0 never drops.
        self.p > 0.0 && self.rng.random::<f64>() < self.p
    }
}

/// Replays a fixed sequence of decisions (`true` = drop), then delivers
/// everything once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    decisions: VecDeque<bool>,
}

impl Scripted {
    pub fn new(decisions: impl IntoIterator<Item = bool>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
        }
    }

    /// Drop exactly the datagrams at the given zero-based arrival positions.
    pub fn drop_at(positions: &[usize]) -> Self {
        let len = positions.iter().max().map_or(0, |m| m + 1);
        Self::new((0..len).map(|i| positions.contains(&i)))
    }
}

impl LossModel for Scripted {
    fn should_drop(&mut self) -> bool {
        self.decisions.pop_front().unwrap_or(false)
    }
}

/// Per-direction drop probabilities plus an optional seed.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability a data packet is dropped on arrival at the receiver.
    pub data_loss: f64,
    /// Probability an ACK is dropped on arrival at the sender.
    pub ack_loss: f64,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

/// Counters kept by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub data_seen: u64,
    pub data_dropped: u64,
    pub acks_seen: u64,
    pub acks_dropped: u64,
}

/// Fault-injecting filter applied to inbound datagrams.
pub struct Simulator {
    data: Box<dyn LossModel>,
    ack: Box<dyn LossModel>,
    stats: SimulatorStats,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for Simulator {
    /// A pass-through simulator (no faults).
    fn default() -> Self {
        Self::new(NoLoss, NoLoss)
    }
}

impl Simulator {
    pub fn new(data: impl LossModel + 'static, ack: impl LossModel + 'static) -> Self {
        Self {
            data: Box::new(data),
            ack: Box::new(ack),
            stats: SimulatorStats::default(),
        }
    }

    /// Bernoulli loss in both directions.  The ACK generator is seeded from
    /// `seed + 1` so the two directions draw independent streams.
    pub fn from_config(config: &SimulatorConfig) -> Result<Self, ConfigError> {
        let data = Bernoulli::new(config.data_loss, config.seed)?;
        let ack = Bernoulli::new(config.ack_loss, config.seed.map(|s| s.wrapping_add(1)))?;
        Ok(Self::new(data, ack))
    }

    /// Pass `datagram` through the channel.  Returns `true` if it was
    /// delivered and `false` if the simulated channel dropped it.
    pub fn maybe_drop(&mut self, datagram: &Datagram) -> bool {
        match datagram {
            Datagram::Data(pkt) => {
                self.stats.data_seen += 1;
                if self.data.should_drop() {
                    self.stats.data_dropped += 1;
                    log::info!("Packet loss, sequence number = {}", pkt.seq);
                    return false;
                }
            }
            Datagram::Ack(ack) => {
                self.stats.acks_seen += 1;
                if self.ack.should_drop() {
                    self.stats.acks_dropped += 1;
                    log::debug!("[sim] dropped ACK ack_seq={}", ack.ack_seq);
                    return false;
                }
            }
        }
        true
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }
}
