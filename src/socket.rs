//! UDP transport for [`Datagram`]s.
//!
//! [`Socket`] owns a `tokio::net::UdpSocket` and does the encode/decode on
//! the way in and out.  No retransmission or ordering happens here.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Datagram, PacketError, HEADER_LEN};

/// Receive buffer size: header plus the largest payload `len` can describe.
const RECV_BUF: usize = HEADER_LEN + u16::MAX as usize;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding failed, or a received datagram was malformed.
    #[error("bad datagram: {0}")]
    Packet(#[from] PacketError),
}

/// One bound UDP endpoint.  Every method takes `&self`.
#[derive(Debug)]
pub struct Socket {
    /// Resolved bound address; holds the OS-assigned port when binding to 0.
    pub local_addr: SocketAddr,
    udp: UdpSocket,
}

impl Socket {
    pub async fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let udp = UdpSocket::bind(addr).await?;
        Ok(Self {
            local_addr: udp.local_addr()?,
            udp,
        })
    }

    pub async fn send_to(&self, datagram: &Datagram, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = datagram.encode()?;
        self.udp.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Wait for the next datagram.
    ///
    /// A datagram that fails to decode comes back as
    /// [`SocketError::Packet`] and the socket stays usable.
    pub async fn recv_from(&self) -> Result<(Datagram, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUF];
        let (len, from) = self.udp.recv_from(&mut buf).await?;
        Ok((Datagram::decode(&buf[..len])?, from))
    }

    /// Send bytes as-is, bypassing the codec.
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.udp.send_to(bytes, dest).await?;
        Ok(())
    }
}
