//! The established peer-to-peer datagram channel.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// A connected UDP channel to the chosen peer.
///
/// The connection owns the socket the connectivity phase probed with.
/// Receives are filtered: only datagrams whose source matches the chosen
/// remote are returned, everything else is silently discarded. Sends go to
/// the remote with no framing.
///
/// There is no implicit keepalive; NAT bindings stay open only as long as
/// traffic flows.
#[derive(Debug)]
pub struct Connection {
    sock: UdpSocket,
    local: SocketAddr,
    remote: SocketAddr,
    read_limit: Option<Duration>,
    write_limit: Option<Duration>,
}

impl Connection {
    pub(crate) fn new(sock: UdpSocket, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            sock,
            local,
            remote,
            read_limit: None,
            write_limit: None,
        }
    }

    /// Receive the next datagram from the peer into `buf`, returning its
    /// length. Datagrams from any other source are dropped without being
    /// observed by the caller.
    ///
    /// # Errors
    ///
    /// Returns the socket's error, or [`io::ErrorKind::TimedOut`] once the
    /// read deadline elapses.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = self.read_limit.map(|limit| Instant::now() + limit);
        loop {
            let (n, from) = match deadline {
                Some(at) => timeout_at(at, self.sock.recv_from(buf))
                    .await
                    .map_err(|_| deadline_elapsed())??,
                None => self.sock.recv_from(buf).await?,
            };
            if from.to_string() == self.remote.to_string() {
                return Ok(n);
            }
            trace!(%from, "discarding datagram from unrelated source");
        }
    }

    /// Send one datagram to the peer, returning the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Returns the socket's error, or [`io::ErrorKind::TimedOut`] once the
    /// write deadline elapses.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self.write_limit {
            Some(limit) => timeout_at(Instant::now() + limit, self.sock.send_to(buf, self.remote))
                .await
                .map_err(|_| deadline_elapsed())?,
            None => self.sock.send_to(buf, self.remote).await,
        }
    }

    /// Our address as the peer observed it (the reflexive address carried
    /// in the peer's success response).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// The chosen peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Limit how long a single [`recv`](Self::recv) may wait. `None`
    /// removes the limit.
    pub fn set_read_timeout(&mut self, limit: Option<Duration>) {
        self.read_limit = limit;
    }

    /// Limit how long a single [`send`](Self::send) may wait. `None`
    /// removes the limit.
    pub fn set_write_timeout(&mut self, limit: Option<Duration>) {
        self.write_limit = limit;
    }

    /// Set both directions at once.
    pub fn set_deadline(&mut self, limit: Option<Duration>) {
        self.read_limit = limit;
        self.write_limit = limit;
    }

    /// Close the channel, releasing the socket.
    pub fn close(self) {}

    /// Give up the filtering wrapper and hand back the raw socket, still
    /// bound to the 5-tuple's local end.
    #[must_use]
    pub fn into_socket(self) -> UdpSocket {
        self.sock
    }
}

fn deadline_elapsed() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline elapsed")
}
