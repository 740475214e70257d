//! Datagram transport abstraction.
//!
//! [`Transport`] is the only seam between the protocol engine and the
//! network: send one datagram, or wait a bounded time for the next one.
//! [`Socket`] implements it over `tokio::net::UdpSocket`; the
//! [`crate::simulator::Simulator`] wraps any transport to inject loss.
//!
//! This layer moves raw bytes; encoding lives in [`crate::codec`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::codec::MAX_DATAGRAM;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// `true` for errors a receive loop may treat like a timeout.
    ///
    /// ICMP port-unreachable surfaces as `ConnectionRefused` (Linux) or
    /// `ConnectionReset` (Windows) on the next receive.
    pub fn is_transient(&self) -> bool {
        let Self::Io(e) = self;
        matches!(
            e.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
        )
    }
}

/// Connectionless, unordered, lossy datagram I/O.
///
/// Methods take `&self`; implementations needing mutable state use interior
/// mutability and must not hold locks across an `.await`.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn local_addr(&self) -> SocketAddr;

    /// Send `datagram` as a single datagram to `dest`.
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError>;

    /// Wait up to `wait` for the next datagram.
    ///
    /// Returns `Ok(None)` when the wait expires.
    async fn recv_from(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError>;
}

/// A UDP socket speaking SIMP-sized datagrams.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    async fn recv_from(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(wait, self.inner.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                buf.truncate(n);
                Ok(Some((buf, addr)))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Ok(None),
        }
    }
}
