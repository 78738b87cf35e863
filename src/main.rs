//! `gbn` command-line front end.
//!
//! Three subcommands: **send** a file, **recv** files, or **sweep** window
//! sizes over loopback.  This file only wires arguments, files and logging
//! to the library.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::BufWriter;

use gbn_arq::config::{
    validate_probability, SessionConfig, DEFAULT_LINGER, DEFAULT_MSS, DEFAULT_WINDOW,
};
use gbn_arq::experiment::{
    self, Sweep, SweepConfig, DEFAULT_LOSSES, DEFAULT_MSS_VALUES, DEFAULT_WINDOWS, FIXED_WINDOW,
};
use gbn_arq::seq::{SeqSpace, MAX_MODULUS};
use gbn_arq::session::{run_sender, ReceiveService};
use gbn_arq::simulator::{Bernoulli, NoLoss, Simulator};
use gbn_arq::socket::Socket;
use gbn_arq::timer::TimerConfig;

/// Go-Back-N ARQ file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a running receiver.
    Send(SendArgs),
    /// Receive one or more files, dropping data packets with probability p.
    Recv(RecvArgs),
    /// Sweep one parameter over loopback and record transfer times as CSV.
    Sweep(SweepArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Receiver address (e.g. 127.0.0.1:7735).
    #[arg(short, long)]
    server: SocketAddr,
    /// File to send.
    #[arg(short, long)]
    input: PathBuf,
    /// Local address to bind.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
    /// Window size N.
    #[arg(short = 'n', long, default_value_t = DEFAULT_WINDOW)]
    window: usize,
    /// Maximum segment size in bytes.
    #[arg(short, long, default_value_t = DEFAULT_MSS)]
    mss: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(short, long, default_value_t = 200)]
    timeout_ms: u64,
    /// Size of the sequence-number space (at least N + 1).
    #[arg(long, default_value_t = MAX_MODULUS)]
    seq_space: u64,
    /// Estimate the timeout from RTT samples and back off on loss.
    #[arg(long)]
    adaptive_rto: bool,
    /// Probability of dropping each arriving ACK.
    #[arg(long, default_value_t = 0.0)]
    ack_loss: f64,
    /// Seed for the ACK loss generator.
    #[arg(long)]
    seed: Option<u64>,
    /// Abort if the transfer is not complete after this many seconds.
    #[arg(long)]
    limit_secs: Option<u64>,
}

#[derive(Args)]
struct RecvArgs {
    /// Local address to bind.
    #[arg(short, long, default_value = "0.0.0.0:7735")]
    bind: SocketAddr,
    /// Output file; overwritten by each transfer.
    #[arg(short, long)]
    output: PathBuf,
    /// Probability of dropping each arriving data packet.
    #[arg(short = 'p', long, default_value_t = 0.0)]
    loss: f64,
    /// Size of the sequence-number space; must match the sender.
    #[arg(long, default_value_t = MAX_MODULUS)]
    seq_space: u64,
    /// Seed for the loss generator.
    #[arg(long)]
    seed: Option<u64>,
    /// Quiet period after completion before the receiver exits, in ms.
    #[arg(long, default_value_t = DEFAULT_LINGER.as_millis() as u64)]
    linger_ms: u64,
    /// Number of consecutive transfers to accept.
    #[arg(long, default_value_t = 1)]
    transfers: usize,
}

/// Parameter varied by `gbn sweep`.
#[derive(Clone, Copy, ValueEnum)]
enum Vary {
    Window,
    Mss,
    Loss,
}

#[derive(Args)]
struct SweepArgs {
    /// File to send in every trial.
    #[arg(short, long)]
    input: PathBuf,
    /// Parameter to vary; the other two stay at their fixed values.
    #[arg(long, value_enum, default_value_t = Vary::Window)]
    vary: Vary,
    /// Window sizes for `--vary window`.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_WINDOWS.to_vec())]
    windows: Vec<usize>,
    /// MSS values for `--vary mss`.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_MSS_VALUES.to_vec())]
    mss_values: Vec<usize>,
    /// Drop probabilities for `--vary loss`.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_LOSSES.to_vec())]
    losses: Vec<f64>,
    /// Trials per swept value.
    #[arg(long, default_value_t = 5)]
    trials: usize,
    /// Fixed window size.
    #[arg(short = 'n', long, default_value_t = FIXED_WINDOW)]
    window: usize,
    /// Fixed MSS.
    #[arg(short, long, default_value_t = DEFAULT_MSS)]
    mss: usize,
    /// Fixed data-packet drop probability.
    #[arg(short = 'p', long, default_value_t = 0.05)]
    loss: f64,
    #[arg(short, long, default_value_t = 100)]
    timeout_ms: u64,
    #[arg(long)]
    seed: Option<u64>,
    /// Per-trial limit in seconds.
    #[arg(long)]
    limit_secs: Option<u64>,
    /// CSV output path.
    #[arg(short, long, default_value = "results.csv")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default `info` level.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Send(args) => send(args).await,
        Mode::Recv(args) => recv(args).await,
        Mode::Sweep(args) => sweep(args).await,
    }
}

async fn send(args: SendArgs) -> Result<()> {
    let config = SessionConfig {
        window_size: args.window,
        mss: args.mss,
        seq_space: args.seq_space,
        timer: TimerConfig {
            adaptive: args.adaptive_rto,
            ..TimerConfig::fixed(Duration::from_millis(args.timeout_ms))
        },
        run_limit: args.limit_secs.map(Duration::from_secs),
    };
    config.validate().context("invalid session parameters")?;
    let ack_loss = Bernoulli::new(args.ack_loss, args.seed).context("invalid --ack-loss")?;

    let data = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let socket = Socket::bind(args.bind).await.context("binding sender socket")?;

    let report = run_sender(
        &socket,
        args.server,
        data,
        &config,
        &mut Simulator::new(NoLoss, ack_loss),
    )
    .await?;
    println!(
        "sent {} bytes in {} packets ({} retransmitted, {} timeouts) in {:.3}s",
        report.bytes,
        report.packets,
        report.stats.retransmissions,
        report.stats.timeouts,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn recv(args: RecvArgs) -> Result<()> {
    validate_probability(args.loss).context("invalid --loss")?;
    // Any window the sender may use must fit, so only the space is checked.
    let space = SeqSpace::new(args.seq_space, 1).context("invalid --seq-space")?;
    let socket = Socket::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    log::info!(
        "receiver listening on {} (p={}, output={})",
        socket.local_addr,
        args.loss,
        args.output.display()
    );

    let data_loss = Bernoulli::new(args.loss, args.seed)?;
    let mut service = ReceiveService::new(
        socket,
        space,
        Simulator::new(data_loss, NoLoss),
        Duration::from_millis(args.linger_ms),
    );

    for n in 1..=args.transfers {
        let file = tokio::fs::File::create(&args.output)
            .await
            .with_context(|| format!("creating {}", args.output.display()))?;
        let mut out = BufWriter::new(file);
        let report = service.receive(&mut out).await?;
        println!(
            "transfer {n}: {} bytes from {} in {:.3}s \
             ({} accepted, {} discarded, {} dropped by channel)",
            report.stats.bytes_delivered,
            report.peer,
            report.elapsed.as_secs_f64(),
            report.stats.accepted,
            report.stats.discarded,
            report.channel.data_dropped
        );
    }
    Ok(())
}

async fn sweep(args: SweepArgs) -> Result<()> {
    let config = SweepConfig {
        sweep: match args.vary {
            Vary::Window => Sweep::Window(args.windows),
            Vary::Mss => Sweep::Mss(args.mss_values),
            Vary::Loss => Sweep::Loss(args.losses),
        },
        trials: args.trials,
        window_size: args.window,
        mss: args.mss,
        loss: args.loss,
        timeout: Duration::from_millis(args.timeout_ms),
        seed: args.seed,
        run_limit: args.limit_secs.map(Duration::from_secs),
    };
    config.validate().context("invalid sweep parameters")?;
    let data: Arc<[u8]> = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?
        .into();

    let column = config.sweep.column();
    log::info!(
        "sweeping {} over {:?} with {} trials (N={}, MSS={}, p={})",
        column,
        config.sweep.values(),
        config.trials,
        config.window_size,
        config.mss,
        config.loss
    );

    let results = experiment::run_sweep(data, &config, |r| {
        println!(
            "{column}={} trial {}/{}: {:.3}s",
            r.value, r.trial, config.trials, r.seconds
        );
    })
    .await?;

    for (value, avg) in experiment::averages(&results) {
        println!("Average for {column}={value}: {avg:.3}s");
    }
    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    experiment::write_csv(std::io::BufWriter::new(file), column, &results)?;
    println!("Results written to {}", args.output.display());
    Ok(())
}
