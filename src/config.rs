//! Session parameters and their validation.
//!
//! Everything here is supplied from outside (CLI flags, the experiment
//! harness, tests).  Validation happens once, before any socket is touched;
//! a [`ConfigError`] is the only failure that may abort a run at startup.

use std::time::Duration;

use thiserror::Error;

use crate::seq::SeqSpace;
use crate::timer::TimerConfig;

/// Default window size N.
pub const DEFAULT_WINDOW: usize = 4;
/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: usize = 500;
/// Default retransmission timeout.
pub const DEFAULT_RTO: Duration = Duration::from_millis(200);
/// Default quiet period the receiver waits after completion.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(500);

/// Errors detected before any protocol activity begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("MSS must be at least 1 byte")]
    ZeroMss,
    #[error("MSS {mss} exceeds the 16-bit payload length field")]
    MssTooLarge { mss: usize },
    #[error("sequence space {modulus} must be at least window size + 1 ({window_size} + 1)")]
    SeqSpaceTooSmall { modulus: u64, window_size: usize },
    #[error("sequence space {modulus} does not fit the 32-bit sequence field")]
    SeqSpaceTooLarge { modulus: u64 },
    #[error("drop probability {0} is outside [0, 1)")]
    BadProbability(f64),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
}

/// Parameters of one sender session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window size N (maximum packets in flight).
    pub window_size: usize,
    /// Maximum payload bytes per packet.
    pub mss: usize,
    /// Size of the sequence-number space.  Must be at least `window_size + 1`.
    pub seq_space: u64,
    /// Retransmission timer policy.
    pub timer: TimerConfig,
    /// External abort: give up once the transfer has run this long.
    pub run_limit: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW,
            mss: DEFAULT_MSS,
            seq_space: crate::seq::MAX_MODULUS,
            timer: TimerConfig::default(),
            run_limit: None,
        }
    }
}

impl SessionConfig {
    /// Check every parameter and return the sequence space to use.
    pub fn validate(&self) -> Result<SeqSpace, ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.mss > usize::from(u16::MAX) {
            return Err(ConfigError::MssTooLarge { mss: self.mss });
        }
        self.timer.validate()?;
        SeqSpace::new(self.seq_space, self.window_size)
    }
}

/// Check that `p` is a usable per-datagram drop probability.
pub fn validate_probability(p: f64) -> Result<f64, ConfigError> {
    if (0.0..1.0).contains(&p) {
        Ok(p)
    } else {
        Err(ConfigError::BadProbability(p))
    }
}
