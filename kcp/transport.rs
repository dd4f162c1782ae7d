//! Datagram transport layer for the poller
//!
//! The [`Datagram`] trait is the single channel a [`KcpPoller`] owns: one
//! async readiness wait plus non-blocking send and receive. Enable the
//! `tokio` feature (on by default) for the built-in [`UdpTransport`] over a
//! connected `tokio::net::UdpSocket`.
//!
//! [`KcpPoller`]: crate::poll::KcpPoller

use kcp_core::Output;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::io;
use std::sync::Arc;

/// Marker trait for address types reported by [`Datagram`] implementations.
pub trait Addr: Clone + Send + Sync + Debug + Display + 'static {}

impl<T: Clone + Send + Sync + Debug + Display + 'static> Addr for T {}

/// Connected, message-oriented channel to a single peer.
///
/// Only [`Datagram::readable`] may wait; `try_recv` and `try_send` return
/// `WouldBlock` instead of blocking.
pub trait Datagram: Send + Sync + 'static {
    /// The address type used to identify endpoints.
    type Addr: Addr;

    /// Resolve once a datagram can be received.
    ///
    /// May wake spuriously; the following `try_recv` then reports
    /// `WouldBlock`.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send + '_;

    /// Receive one datagram into `buf`, returning its length.
    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one datagram to the peer, returning the number of bytes written.
    fn try_send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Return the local address this transport is bound to.
    fn local_addr(&self) -> io::Result<Self::Addr>;

    /// Return the address of the connected peer.
    fn peer_addr(&self) -> io::Result<Self::Addr>;
}

/// Engine [`Output`] that sends every packet on a shared transport.
///
/// Sends never wait: a full socket buffer surfaces as a `WouldBlock`
/// transmit failure and the engine retransmits on its own schedule.
pub struct TransportOutput<T: Datagram> {
    transport: Arc<T>,
}

impl<T: Datagram> TransportOutput<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T: Datagram> Output for TransportOutput<T> {
    fn transmit(&mut self, packet: &[u8]) -> io::Result<()> {
        let sent = self.transport.try_send(packet)?;
        if sent < packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: {sent} of {} bytes", packet.len()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UdpTransport: default implementation backed by tokio::net::UdpSocket
// ---------------------------------------------------------------------------

#[cfg(feature = "tokio")]
mod udp {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::{ToSocketAddrs, UdpSocket};

    /// Default [`Datagram`] implementation wrapping a connected
    /// `tokio::net::UdpSocket`.
    #[derive(Debug)]
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        /// Bind a new UDP socket to `local` and connect it to `peer`.
        pub async fn connect(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> io::Result<Self> {
            let socket = UdpSocket::bind(local).await?;
            socket.connect(peer).await?;
            Ok(Self { socket })
        }

        /// Wrap an existing socket. It must already be connected.
        pub fn new(socket: UdpSocket) -> Self {
            Self { socket }
        }

        pub fn socket(&self) -> &UdpSocket {
            &self.socket
        }
    }

    impl Datagram for UdpTransport {
        type Addr = SocketAddr;

        async fn readable(&self) -> io::Result<()> {
            self.socket.readable().await
        }

        fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.socket.try_recv(buf)
        }

        fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
            self.socket.try_send(buf)
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            self.socket.peer_addr()
        }
    }
}

#[cfg(feature = "tokio")]
pub use udp::UdpTransport;
