//! On-the-wire layout of data packets and cumulative ACKs.
//!
//! A [`Datagram`] is either a [`Packet`] (sender to receiver) or an [`Ack`]
//! (receiver to sender).  [`Datagram::encode`] and [`Datagram::decode`] are
//! pure byte transformations; sockets live in [`crate::socket`].
//!
//! # Header
//!
//! Eleven bytes, big-endian, followed by the payload:
//!
//! ```text
//!  offset  size  field
//!  ------  ----  ------------------------------------------------
//!       0     4  seq        data: packet seq / ack: cumulative ack_seq
//!       4     2  kind       0x5555 DATA, 0xAAAA ACK
//!       6     1  flags      bit 0 = FINAL (last packet of the stream)
//!       7     2  len        payload length in bytes (0 for ACKs)
//!       9     2  checksum   RFC 1071 sum over header + payload
//!      11   len  payload
//! ```
//!
//! A datagram whose length, checksum or kind does not check out is
//! rejected with a [`PacketError`]; callers treat that as a lost packet.

use thiserror::Error;

/// Values of the `kind` header field.
pub mod kind {
    /// Data packet (sender → receiver).
    pub const DATA: u16 = 0x5555;
    /// Cumulative acknowledgement (receiver → sender).
    pub const ACK: u16 = 0xAAAA;
}

/// Bits of the `flags` header field.
pub mod flags {
    /// Last packet of the stream.
    pub const FINAL: u8 = 0b0000_0001;
}

/// Size of the fixed header preceding the payload.
pub const HEADER_LEN: usize = 11;

const OFF_SEQ: usize = 0;
const OFF_KIND: usize = 4;
const OFF_FLAGS: usize = 6;
const OFF_PAYLOAD_LEN: usize = 7;
const OFF_CHECKSUM: usize = 9;

/// A data packet.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number in `[0, SEQ_SPACE)`.
    pub seq: u32,
    /// Up to MSS bytes of the source stream.
    pub payload: Vec<u8>,
    /// Set on the last packet of the transfer only.
    pub is_final: bool,
}

/// A cumulative acknowledgement: every packet up to and including `ack_seq`
/// arrived in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub ack_seq: u32,
}

/// Anything that travels over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Data(Packet),
    Ack(Ack),
}

impl From<Packet> for Datagram {
    fn from(p: Packet) -> Self {
        Datagram::Data(p)
    }
}

impl From<Ack> for Datagram {
    fn from(a: Ack) -> Self {
        Datagram::Ack(a)
    }
}

/// Why a datagram could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// `len` disagrees with the number of bytes after the header.
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("checksum verification failed")]
    ChecksumFailed,
    /// `kind` field is neither DATA nor ACK.
    #[error("unknown datagram kind {0:#06x}")]
    UnknownKind(u16),
    /// An acknowledgement carried payload bytes.
    #[error("acknowledgement carries a payload")]
    AckWithPayload,
    /// Payload longer than the 16-bit length field can describe.
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}

impl Datagram {
    /// Serialise this datagram into a newly allocated byte vector.
    ///
    /// The length and checksum fields are computed here.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let (seq, kind_field, flag_bits, payload): (u32, u16, u8, &[u8]) = match self {
            Datagram::Data(p) => (
                p.seq,
                kind::DATA,
                if p.is_final { flags::FINAL } else { 0 },
                p.payload.as_slice(),
            ),
            Datagram::Ack(a) => (a.ack_seq, kind::ACK, 0, &[][..]),
        };
        let len_field =
            u16::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;

        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&seq.to_be_bytes());
        buf[OFF_KIND..OFF_KIND + 2].copy_from_slice(&kind_field.to_be_bytes());
        buf[OFF_FLAGS] = flag_bits;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2].copy_from_slice(&len_field.to_be_bytes());
        // Checksum field stays zero while computing the checksum.
        buf[HEADER_LEN..].copy_from_slice(payload);

        let sum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&sum.to_be_bytes());
        Ok(buf)
    }

    /// Parse one received datagram.  `buf` must hold exactly one datagram:
    /// trailing or missing bytes are a [`PacketError::LengthMismatch`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let Some(header) = buf.get(..HEADER_LEN) else {
            return Err(PacketError::BufferTooShort);
        };

        let be16 = |off: usize| u16::from_be_bytes([header[off], header[off + 1]]);
        let seq = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind_field = be16(OFF_KIND);
        let flag_bits = header[OFF_FLAGS];
        let len_field = be16(OFF_PAYLOAD_LEN);
        let received_sum = be16(OFF_CHECKSUM);

        if buf.len() - HEADER_LEN != usize::from(len_field) {
            return Err(PacketError::LengthMismatch);
        }

        let mut zeroed = buf.to_vec();
        zeroed[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        if internet_checksum(&zeroed) != received_sum {
            return Err(PacketError::ChecksumFailed);
        }

        match kind_field {
            kind::DATA => Ok(Datagram::Data(Packet {
                seq,
                payload: buf[HEADER_LEN..].to_vec(),
                is_final: flag_bits & flags::FINAL != 0,
            })),
            kind::ACK if len_field == 0 => Ok(Datagram::Ack(Ack { ack_seq: seq })),
            kind::ACK => Err(PacketError::AckWithPayload),
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

/// RFC 1071 one's-complement sum of `data` as big-endian 16-bit words.
/// The checksum field itself must be zero in `data`.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        acc += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = words.remainder() {
        acc += u32::from(*last) << 8;
    }
    while acc > 0xffff {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}
