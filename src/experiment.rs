//! Parameter sweeps: the experiment harness.
//!
//! A sweep varies one parameter (window size, MSS or drop probability)
//! while the other two stay fixed.  For every value and trial, a receiver
//! and a sender run in-process over loopback UDP.  The harness treats the
//! protocol as a black box: it starts both sides, waits for completion,
//! checks the output, and records wall-clock time.

use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{validate_probability, ConfigError, SessionConfig, DEFAULT_MSS};
use crate::seq::{SeqSpace, MAX_MODULUS};
use crate::session::{run_sender, ReceiveService, SessionError};
use crate::simulator::{Bernoulli, NoLoss, Simulator};
use crate::socket::Socket;
use crate::timer::TimerConfig;

/// Window sizes swept by default.
pub const DEFAULT_WINDOWS: &[usize] = &[1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024];

/// MSS values swept by default: 100 to 1000 bytes in steps of 100.
pub const DEFAULT_MSS_VALUES: &[usize] = &[100, 200, 300, 400, 500, 600, 700, 800, 900, 1000];

/// Drop probabilities swept by default: 0.01 to 0.10 in steps of 0.01.
pub const DEFAULT_LOSSES: &[f64] = &[0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09, 0.10];

/// Window size held fixed while MSS or loss is swept.
pub const FIXED_WINDOW: usize = 64;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid sweep: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("receiver task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{value} trial {trial}: received output differs from input")]
    OutputMismatch { value: SweepValue, trial: usize },
}

/// The parameter a sweep varies and the values it takes.
#[derive(Debug, Clone, PartialEq)]
pub enum Sweep {
    Window(Vec<usize>),
    Mss(Vec<usize>),
    Loss(Vec<f64>),
}

impl Sweep {
    /// CSV column holding the swept value.
    pub fn column(&self) -> &'static str {
        match self {
            Sweep::Window(_) => "window_size",
            Sweep::Mss(_) => "mss",
            Sweep::Loss(_) => "loss",
        }
    }

    pub fn values(&self) -> Vec<SweepValue> {
        match self {
            Sweep::Window(v) => v.iter().copied().map(SweepValue::Window).collect(),
            Sweep::Mss(v) => v.iter().copied().map(SweepValue::Mss).collect(),
            Sweep::Loss(v) => v.iter().copied().map(SweepValue::Loss).collect(),
        }
    }
}

/// One point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepValue {
    Window(usize),
    Mss(usize),
    Loss(f64),
}

impl SweepValue {
    /// Bits mixed into the per-trial seed.
    fn salt(self) -> u64 {
        match self {
            SweepValue::Window(n) | SweepValue::Mss(n) => n as u64,
            SweepValue::Loss(p) => p.to_bits(),
        }
    }
}

/// The bare value, as written to the CSV.
impl fmt::Display for SweepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepValue::Window(n) | SweepValue::Mss(n) => write!(f, "{n}"),
            SweepValue::Loss(p) => write!(f, "{p}"),
        }
    }
}

/// Parameters shared by every trial of a sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub sweep: Sweep,
    pub trials: usize,
    /// Window size when it is not the swept parameter.
    pub window_size: usize,
    /// MSS when it is not the swept parameter.
    pub mss: usize,
    /// Data-packet drop probability when it is not the swept parameter.
    pub loss: f64,
    pub timeout: Duration,
    /// Base seed; each trial derives its own seed from it.
    pub seed: Option<u64>,
    /// Per-trial run limit.
    pub run_limit: Option<Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep: Sweep::Window(DEFAULT_WINDOWS.to_vec()),
            trials: 5,
            window_size: FIXED_WINDOW,
            mss: DEFAULT_MSS,
            loss: 0.05,
            timeout: Duration::from_millis(100),
            seed: None,
            run_limit: None,
        }
    }
}

/// Concrete parameters of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialParams {
    pub window_size: usize,
    pub mss: usize,
    pub loss: f64,
}

impl SweepConfig {
    /// The fixed parameters with `value` substituted in.
    pub fn params(&self, value: SweepValue) -> TrialParams {
        let mut p = TrialParams {
            window_size: self.window_size,
            mss: self.mss,
            loss: self.loss,
        };
        match value {
            SweepValue::Window(n) => p.window_size = n,
            SweepValue::Mss(m) => p.mss = m,
            SweepValue::Loss(l) => p.loss = l,
        }
        p
    }

    fn session(&self, params: &TrialParams) -> SessionConfig {
        SessionConfig {
            window_size: params.window_size,
            mss: params.mss,
            seq_space: MAX_MODULUS,
            timer: TimerConfig::fixed(self.timeout),
            run_limit: self.run_limit,
        }
    }

    /// Check every point of the sweep without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in self.sweep.values() {
            let params = self.params(value);
            self.session(&params).validate()?;
            validate_probability(params.loss)?;
        }
        Ok(())
    }
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub value: SweepValue,
    pub trial: usize,
    pub seconds: f64,
    pub retransmissions: u64,
}

/// Run one transfer of `data` at sweep point `value` and return its timing.
/// `trial` is 1-based and only used for labelling and seeding.
pub async fn run_trial(
    data: Arc<[u8]>,
    value: SweepValue,
    trial: usize,
    config: &SweepConfig,
) -> Result<TrialResult, SweepError> {
    let params = config.params(value);
    let session = config.session(&params);
    let space: SeqSpace = session.validate()?;

    let loopback: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 0));
    let seed = config
        .seed
        .map(|s| s ^ value.salt().rotate_left(32) ^ trial as u64);
    let loss = Bernoulli::new(params.loss, seed)?;
    let rx_socket = Socket::bind(loopback).await.map_err(SessionError::from)?;
    let mut service = ReceiveService::new(
        rx_socket,
        space,
        Simulator::new(loss, NoLoss),
        config.timeout * 3,
    );
    let server_addr = service.local_addr();

    let receiver = tokio::spawn(async move {
        let mut out = Vec::new();
        service.receive(&mut out).await.map(|_| out)
    });

    let tx_socket = Socket::bind(loopback).await.map_err(SessionError::from)?;
    let report = match run_sender(
        &tx_socket,
        server_addr,
        Arc::clone(&data),
        &session,
        &mut Simulator::default(),
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            receiver.abort();
            return Err(e.into());
        }
    };

    let received = receiver.await??;
    if received.as_slice() != &data[..] {
        return Err(SweepError::OutputMismatch { value, trial });
    }

    Ok(TrialResult {
        value,
        trial,
        seconds: report.elapsed.as_secs_f64(),
        retransmissions: report.stats.retransmissions,
    })
}

/// Run every trial of the sweep in sequence, calling `on_result` after each.
///
/// The whole sweep is validated before the first trial starts.
pub async fn run_sweep(
    data: Arc<[u8]>,
    config: &SweepConfig,
    mut on_result: impl FnMut(&TrialResult),
) -> Result<Vec<TrialResult>, SweepError> {
    config.validate()?;

    let values = config.sweep.values();
    let mut results = Vec::with_capacity(values.len() * config.trials);
    for value in values {
        for trial in 1..=config.trials {
            let result = run_trial(Arc::clone(&data), value, trial, config).await?;
            on_result(&result);
            results.push(result);
        }
    }
    Ok(results)
}

/// Mean seconds per sweep value, in first-seen order.
pub fn averages(results: &[TrialResult]) -> Vec<(SweepValue, f64)> {
    let mut out: Vec<(SweepValue, f64, usize)> = Vec::new();
    for r in results {
        match out.iter_mut().find(|(v, _, _)| *v == r.value) {
            Some((_, sum, count)) => {
                *sum += r.seconds;
                *count += 1;
            }
            None => out.push((r.value, r.seconds, 1)),
        }
    }
    out.into_iter()
        .map(|(v, sum, count)| (v, sum / count as f64))
        .collect()
}

/// Write results as CSV with a `<column>,trial,seconds` header.
pub fn write_csv<W: Write>(mut w: W, column: &str, results: &[TrialResult]) -> std::io::Result<()> {
    writeln!(w, "{column},trial,seconds")?;
    for r in results {
        writeln!(w, "{},{},{:.6}", r.value, r.trial, r.seconds)?;
    }
    w.flush()
}
