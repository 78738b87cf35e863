//! The sender's retransmission timer.
//!
//! Go-Back-N runs a single logical timer per sender, covering the oldest
//! unacknowledged packet.  [`RetransmitTimer`] is owned by
//! [`crate::gbn_sender::GbnSender`] and only that engine arms, restarts or
//! cancels it.  The timer never sleeps itself; it records a deadline and the
//! session driver waits on [`RetransmitTimer::deadline`].
//!
//! The timeout is fixed by default.  With [`TimerConfig::adaptive`] set, the
//! RTO follows Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! and doubles on each timeout up to [`TimerConfig::max_rto`].

use std::time::{Duration, Instant};

use crate::config::{ConfigError, DEFAULT_RTO};

/// Retransmission timeout policy.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// RTO used until (or unless) RTT samples are available.
    pub initial_rto: Duration,
    /// Floor for the adaptive RTO.
    pub min_rto: Duration,
    /// Ceiling for the adaptive RTO and its back-off.
    pub max_rto: Duration,
    /// Estimate the RTO from RTT samples and back off on timeout.
    pub adaptive: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: DEFAULT_RTO,
            min_rto: Duration::from_millis(10),
            max_rto: Duration::from_secs(60),
            adaptive: false,
        }
    }
}

impl TimerConfig {
    /// A fixed timeout of `rto`.
    pub fn fixed(rto: Duration) -> Self {
        Self {
            initial_rto: rto,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_rto.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Single retransmission timer with an explicit deadline.
#[derive(Debug)]
pub struct RetransmitTimer {
    config: TimerConfig,
    /// Timeout applied on the next arm/restart.
    current_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
    /// When the timer fires, or `None` while cancelled.
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        let rto = config.initial_rto;
        Self {
            config,
            current_rto: rto,
            srtt: None,
            rttvar: None,
            deadline: None,
        }
    }

    /// Start the timer if it is not already running.
    pub fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.current_rto);
        }
    }

    /// Start the timer afresh from `now`, discarding any previous deadline.
    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + self.current_rto);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` when the timer is running and its deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    ///
    /// Ignored unless the timer is adaptive.
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        if !self.config.adaptive {
            return;
        }
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
        self.reset();
    }

    /// Double the RTO after a timeout, capped at `max_rto`.
    ///
    /// A fixed timer keeps its configured timeout.
    pub fn back_off(&mut self) {
        if self.config.adaptive {
            self.current_rto = (self.current_rto * 2).min(self.config.max_rto);
        }
    }

    /// Recompute `current_rto` from the SRTT / RTTVAR estimates.
    ///
    /// Falls back to `initial_rto` before the first sample.
    pub fn reset(&mut self) {
        self.current_rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4)
                .clamp(self.config.min_rto, self.config.max_rto),
            _ => self.config.initial_rto,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn arm_does_not_extend_running_timer() {
        let mut t = RetransmitTimer::new(TimerConfig::fixed(ms(100)));
        let t0 = Instant::now();
        t.arm(t0);
        t.arm(t0 + ms(50));
        assert_eq!(t.deadline(), Some(t0 + ms(100)));
    }

    #[test]
    fn restart_replaces_deadline() {
        let mut t = RetransmitTimer::new(TimerConfig::fixed(ms(100)));
        let t0 = Instant::now();
        t.arm(t0);
        t.restart(t0 + ms(50));
        assert_eq!(t.deadline(), Some(t0 + ms(150)));
    }

    #[test]
    fn cancel_disarms() {
        let mut t = RetransmitTimer::new(TimerConfig::fixed(ms(100)));
        let t0 = Instant::now();
        t.arm(t0);
        t.cancel();
        assert!(!t.is_armed());
        assert!(!t.is_expired(t0 + ms(1000)));
    }

    #[test]
    fn expiry() {
        let mut t = RetransmitTimer::new(TimerConfig::fixed(ms(100)));
        let t0 = Instant::now();
        t.arm(t0);
        assert!(!t.is_expired(t0 + ms(99)));
        assert!(t.is_expired(t0 + ms(100)));
    }

    #[test]
    fn fixed_timer_ignores_samples_and_back_off() {
        let mut t = RetransmitTimer::new(TimerConfig::fixed(ms(100)));
        t.record_rtt_sample(ms(10));
        t.back_off();
        assert_eq!(t.rto(), ms(100));
    }

    #[test]
    fn adaptive_first_sample() {
        let mut t = RetransmitTimer::new(TimerConfig {
            adaptive: true,
            ..TimerConfig::fixed(ms(1000))
        });
        t.record_rtt_sample(ms(40));
        // SRTT = 40, RTTVAR = 20, RTO = 40 + 80
        assert_eq!(t.rto(), ms(120));
    }

    #[test]
    fn adaptive_back_off_is_capped() {
        let mut t = RetransmitTimer::new(TimerConfig {
            adaptive: true,
            max_rto: ms(300),
            ..TimerConfig::fixed(ms(100))
        });
        t.back_off();
        assert_eq!(t.rto(), ms(200));
        t.back_off();
        assert_eq!(t.rto(), ms(300));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        assert_eq!(
            TimerConfig::fixed(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout)
        );
    }
}
