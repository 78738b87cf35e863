//! End-to-end transfers over loopback UDP.
//!
//! Each test binds real `tokio::net::UdpSocket`s on 127.0.0.1, runs the
//! receive service in a background task and drives `run_sender` in the
//! test task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gbn_arq::{
    config::SessionConfig,
    experiment::{self, Sweep, SweepConfig, SweepValue},
    packet::{Ack, Datagram, Packet},
    session::{run_sender, ReceiveService, ReceiverReport, SenderReport, SessionError},
    seq::SeqSpace,
    simulator::{Bernoulli, NoLoss, Scripted, Simulator},
    socket::Socket,
    timer::TimerConfig,
};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LINGER: Duration = Duration::from_millis(150);
const DEADLINE: Duration = Duration::from_secs(20);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn config(window_size: usize, mss: usize) -> SessionConfig {
    SessionConfig {
        window_size,
        mss,
        timer: TimerConfig::fixed(Duration::from_millis(50)),
        ..SessionConfig::default()
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// Start a receive service for one transfer; resolves to the bytes written
/// and the report.
async fn spawn_receiver(
    simulator: Simulator,
) -> (SocketAddr, JoinHandle<Result<(Vec<u8>, ReceiverReport), SessionError>>) {
    let socket = Socket::bind(loopback()).await.expect("bind receiver");
    let mut service = ReceiveService::new(socket, SeqSpace::default(), simulator, LINGER);
    let addr = service.local_addr();
    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        let report = service.receive(&mut out).await?;
        Ok((out, report))
    });
    (addr, task)
}

/// `run_sender` over a lossless return path.
async fn send(
    socket: &Socket,
    server: SocketAddr,
    data: Vec<u8>,
    cfg: &SessionConfig,
) -> Result<SenderReport, SessionError> {
    run_sender(socket, server, data, cfg, &mut Simulator::default()).await
}

async fn join_receiver(
    task: JoinHandle<Result<(Vec<u8>, ReceiverReport), SessionError>>,
) -> (Vec<u8>, ReceiverReport) {
    tokio::time::timeout(DEADLINE, task)
        .await
        .expect("receiver timed out")
        .expect("receiver task panicked")
        .expect("receiver failed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_transfer_delivers_exact_bytes() {
    let data = payload(10_000);
    let (server, rx) = spawn_receiver(Simulator::default()).await;

    let socket = Socket::bind(loopback()).await.unwrap();
    let report = tokio::time::timeout(
        DEADLINE,
        run_sender(&socket, server, data.clone(), &config(8, 500), &mut Simulator::default()),
    )
    .await
    .expect("sender timed out")
    .expect("sender failed");

    assert_eq!(report.bytes, 10_000);
    assert_eq!(report.packets, 20);
    assert_eq!(report.stats.packets_sent, 20);

    let (out, rx_report) = join_receiver(rx).await;
    assert_eq!(out, data);
    assert_eq!(rx_report.peer, socket.local_addr);
    assert_eq!(rx_report.stats.bytes_delivered, 10_000);
    assert_eq!(rx_report.stats.accepted, 20);
}

#[tokio::test]
async fn dropped_data_packet_is_retransmitted() {
    let data = payload(1_700);
    let (server, rx) = spawn_receiver(Simulator::new(Scripted::drop_at(&[1]), NoLoss)).await;

    let socket = Socket::bind(loopback()).await.unwrap();
    let report = send(&socket, server, data.clone(), &config(4, 500))
        .await
        .expect("sender failed");

    assert_eq!(report.packets, 4);
    assert!(report.stats.timeouts >= 1);
    assert!(report.stats.retransmissions >= 3);

    let (out, rx_report) = join_receiver(rx).await;
    assert_eq!(out, data);
    assert_eq!(rx_report.channel.data_dropped, 1);
}

#[tokio::test]
async fn random_loss_both_directions_still_completes() {
    let data = payload(20_000);
    let (server, rx) = spawn_receiver(Simulator::new(
        Bernoulli::new(0.1, Some(11)).unwrap(),
        NoLoss,
    ))
    .await;

    let socket = Socket::bind(loopback()).await.unwrap();
    let mut ack_loss = Simulator::new(NoLoss, Bernoulli::new(0.1, Some(12)).unwrap());
    tokio::time::timeout(
        DEADLINE,
        run_sender(&socket, server, data.clone(), &config(16, 256), &mut ack_loss),
    )
    .await
    .expect("sender timed out")
    .expect("sender failed");

    let (out, _) = join_receiver(rx).await;
    assert_eq!(out, data);
}

#[tokio::test]
async fn empty_input_sends_single_final_packet() {
    let (server, rx) = spawn_receiver(Simulator::default()).await;

    let socket = Socket::bind(loopback()).await.unwrap();
    let report = send(&socket, server, Vec::new(), &config(4, 500))
        .await
        .expect("sender failed");
    assert_eq!(report.bytes, 0);
    assert_eq!(report.packets, 1);

    let (out, rx_report) = join_receiver(rx).await;
    assert!(out.is_empty());
    assert_eq!(rx_report.stats.accepted, 1);
}

#[tokio::test]
async fn malformed_datagrams_are_ignored() {
    let data = payload(2_000);
    let (server, rx) = spawn_receiver(Simulator::default()).await;

    let socket = Socket::bind(loopback()).await.unwrap();
    // Too short, then a header with a broken checksum.
    socket.send_raw(&[1, 2, 3], server).await.unwrap();
    socket
        .send_raw(&[0, 0, 0, 0, 0x55, 0x55, 0, 0, 1, 0xde, 0xad, b'x'], server)
        .await
        .unwrap();

    send(&socket, server, data.clone(), &config(4, 500))
        .await
        .expect("sender failed");

    let (out, _) = join_receiver(rx).await;
    assert_eq!(out, data);
}

#[tokio::test]
async fn silent_peer_hits_run_limit() {
    // Bound but never read: every packet disappears.
    let sink = Socket::bind(loopback()).await.unwrap();

    let socket = Socket::bind(loopback()).await.unwrap();
    let cfg = SessionConfig {
        run_limit: Some(Duration::from_millis(300)),
        ..config(4, 500)
    };
    let err = send(&socket, sink.local_addr, payload(5_000), &cfg)
        .await
        .expect_err("transfer cannot complete");
    assert!(matches!(err, SessionError::RunLimitExceeded(d) if d == Duration::from_millis(300)));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_sending() {
    let socket = Socket::bind(loopback()).await.unwrap();
    let cfg = SessionConfig {
        window_size: 8,
        seq_space: 8,
        ..config(8, 500)
    };
    let err = send(&socket, socket.local_addr, payload(10), &cfg)
        .await
        .expect_err("seq space too small");
    assert!(matches!(err, SessionError::Config(_)));
}

/// Receive service running `n` transfers back to back; resolves to each
/// transfer's output.
fn spawn_multi_receiver(
    socket: Socket,
    n: usize,
) -> JoinHandle<Result<Vec<Vec<u8>>, SessionError>> {
    let mut service =
        ReceiveService::new(socket, SeqSpace::default(), Simulator::default(), LINGER);
    tokio::spawn(async move {
        let mut outputs = Vec::new();
        for _ in 0..n {
            let mut out = Vec::new();
            service.receive(&mut out).await?;
            outputs.push(out);
        }
        Ok(outputs)
    })
}

#[tokio::test]
async fn stray_ack_does_not_claim_the_transfer() {
    let data = payload(2_000);
    let (server, rx) = spawn_receiver(Simulator::default()).await;

    let stray = Socket::bind(loopback()).await.unwrap();
    stray
        .send_to(&Datagram::Ack(Ack { ack_seq: 0 }), server)
        .await
        .unwrap();

    let socket = Socket::bind(loopback()).await.unwrap();
    let cfg = SessionConfig {
        run_limit: Some(Duration::from_secs(5)),
        ..config(4, 500)
    };
    send(&socket, server, data.clone(), &cfg)
        .await
        .expect("sender failed");

    let (out, rx_report) = join_receiver(rx).await;
    assert_eq!(out, data);
    assert_eq!(rx_report.peer, socket.local_addr);
}

#[tokio::test]
async fn back_to_back_transfers_from_new_addresses() {
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = socket.local_addr;
    let rx = spawn_multi_receiver(socket, 2);

    let a = payload(3_000);
    let b: Vec<u8> = payload(1_234).into_iter().rev().collect();
    let cfg = SessionConfig {
        run_limit: Some(Duration::from_secs(5)),
        ..config(4, 500)
    };

    // The second sender starts while the receiver still lingers on the first.
    let tx1 = Socket::bind(loopback()).await.unwrap();
    send(&tx1, server, a.clone(), &cfg).await.unwrap();
    let tx2 = Socket::bind(loopback()).await.unwrap();
    send(&tx2, server, b.clone(), &SessionConfig { mss: 100, ..cfg })
        .await
        .unwrap();

    let outputs = tokio::time::timeout(DEADLINE, rx)
        .await
        .expect("receiver timed out")
        .unwrap()
        .unwrap();
    assert_eq!(outputs, vec![a, b]);
}

#[tokio::test]
async fn second_transfer_from_same_port() {
    let socket = Socket::bind(loopback()).await.unwrap();
    let server = socket.local_addr;
    let rx = spawn_multi_receiver(socket, 2);

    let a = payload(2_500);
    let b: Vec<u8> = payload(1_800).into_iter().map(|x| x ^ 0x5a).collect();
    let cfg = SessionConfig {
        run_limit: Some(Duration::from_secs(5)),
        ..config(4, 500)
    };

    let tx = Socket::bind(loopback()).await.unwrap();
    send(&tx, server, a.clone(), &cfg).await.unwrap();
    let second = send(&tx, server, b.clone(), &cfg).await.unwrap();
    // Every ACK the second sender saw belonged to the second transfer.
    assert_eq!(second.stats.stale_acks, 0);
    assert_eq!(second.stats.acks_received, 4);

    let outputs = tokio::time::timeout(DEADLINE, rx)
        .await
        .expect("receiver timed out")
        .unwrap()
        .unwrap();
    assert_eq!(outputs, vec![a, b]);
}

#[tokio::test]
async fn foreign_traffic_does_not_extend_linger() {
    let data = payload(1_000);
    let (server, rx) = spawn_receiver(Simulator::default()).await;

    let socket = Socket::bind(loopback()).await.unwrap();
    send(&socket, server, data.clone(), &config(4, 500))
        .await
        .unwrap();

    // Out-of-order data from another address, faster than the linger period.
    let noise = tokio::spawn(async move {
        let other = Socket::bind(loopback()).await.unwrap();
        let packet = Packet {
            seq: 7,
            payload: b"noise".to_vec(),
            is_final: false,
        };
        loop {
            let _ = other.send_to(&Datagram::Data(packet.clone()), server).await;
            tokio::time::sleep(LINGER / 5).await;
        }
    });

    let joined = tokio::time::timeout(LINGER * 6, rx).await;
    noise.abort();
    let (out, _) = joined
        .expect("linger never ended")
        .expect("receiver task panicked")
        .expect("receiver failed");
    assert_eq!(out, data);
}

#[tokio::test]
async fn sweep_each_parameter() {
    let data: Arc<[u8]> = payload(8_000).into();
    let sweeps = [
        Sweep::Window(vec![1, 8]),
        Sweep::Mss(vec![200, 1000]),
        Sweep::Loss(vec![0.0, 0.1]),
    ];

    for sweep in sweeps {
        let expected = sweep.values();
        let cfg = SweepConfig {
            sweep,
            trials: 1,
            window_size: 8,
            mss: 500,
            loss: 0.05,
            timeout: Duration::from_millis(30),
            seed: Some(3),
            run_limit: Some(DEADLINE),
        };

        let mut seen = 0;
        let results = experiment::run_sweep(Arc::clone(&data), &cfg, |_| seen += 1)
            .await
            .unwrap();
        assert_eq!(seen, 2);
        let values: Vec<SweepValue> = results.iter().map(|r| r.value).collect();
        assert_eq!(values, expected);
        assert!(results.iter().all(|r| r.seconds > 0.0 && r.trial == 1));

        let mut csv = Vec::new();
        experiment::write_csv(&mut csv, cfg.sweep.column(), &results).unwrap();
        let csv = String::from_utf8(csv).unwrap();
        assert!(csv.starts_with(&format!("{},trial,seconds\n", cfg.sweep.column())));
        assert_eq!(csv.lines().count(), 3);
    }
}
