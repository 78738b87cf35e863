//! `gbn-arq` — Go-Back-N reliable file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐  chunks   ┌───────────┐  DATA   ┌───────────┐  DATA  ┌─────────────┐
//!  │ Segmenter │──────────▶│ GbnSender │────────▶│ Simulator │───────▶│ GbnReceiver │
//!  └───────────┘           │  + timer  │         │  (loss)   │        └──────┬──────┘
//!                          └─────▲─────┘         └───────────┘               │
//!                                │             cumulative ACK                │
//!                                └───────────────────────────────────────────┘
//!  ┌───────────────────────────────────────────────────────────────────────────────┐
//!  │ session — tokio event loops feeding datagrams and timer expiry to the engines │
//!  └───────────────────────────────────────────────────────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       — wire format (serialise / deserialise)
//! - [`seq`]          — modular sequence-number arithmetic
//! - [`segmenter`]    — split the source into MSS-sized chunks
//! - [`gbn_sender`]   — GBN outbound window state machine
//! - [`gbn_receiver`] — GBN inbound cumulative-ACK state machine
//! - [`timer`]        — the sender's retransmission timer and RTO policy
//! - [`simulator`]    — lossy-channel simulator with injectable randomness
//! - [`config`]       — session parameters and validation
//! - [`socket`]       — async UDP socket abstraction
//! - [`session`]      — sender / receiver event loops
//! - [`experiment`]   — window-size sweep harness

pub mod config;
pub mod experiment;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod segmenter;
pub mod seq;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod timer;
