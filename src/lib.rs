//! # pinhole
//!
//! Peer-to-peer UDP NAT traversal with STUN connectivity checks.
//!
//! Two endpoints that can already exchange a few bytes out of band (an SSH
//! pipe, a chat channel, a rendezvous server) use this crate to open a
//! direct UDP channel between them, punching through the NATs on either
//! side:
//!
//! 1. **Gather**: enumerate host addresses and ask a STUN server how the
//!    public internet sees us.
//! 2. **Exchange**: trade candidate lists through the caller-supplied
//!    exchange function.
//! 3. **Probe**: send authenticated-by-fingerprint Binding requests to
//!    every peer candidate from one shared socket, answering theirs.
//! 4. **Decide & confirm**: the initiator nominates the highest-priority
//!    path that proved bidirectional, the responder acknowledges, and both
//!    sides hand back a [`Connection`] bound to that 5-tuple.
//!
//! One side must call with `initiator = true`, the other with `false`.
//!
//! ```no_run
//! use std::io;
//!
//! # async fn demo() -> Result<(), pinhole::Error> {
//! // carry the blob to the peer over any signalling channel and
//! // return theirs; both sides block here until the swap completes
//! let exchange = |blob: &[u8]| -> io::Result<Vec<u8>> {
//!     let _ = blob;
//!     unimplemented!("send blob out of band, return the peer's")
//! };
//!
//! let conn = pinhole::connect(exchange, true).await?;
//! conn.send(b"hello through the NAT").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod connection;
mod engine;
pub mod error;
mod gather;
pub mod stun;

pub use candidate::Candidate;
pub use config::{Config, DEFAULT_STUN_SERVER};
pub use connection::Connection;
pub use error::Error;

use std::io;
use std::sync::OnceLock;

use rand::RngCore;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::warn;

/// Establish a connection to the peer with the default [`Config`].
///
/// The exchange function receives our serialized candidate list and must
/// return the peer's; it is called exactly once and may block until the
/// peer's blob arrives. Exactly one of the two sides must pass
/// `initiator = true`.
///
/// # Errors
///
/// See [`Error`]. The socket is closed on every failure path.
pub async fn connect<E>(exchange: E, initiator: bool) -> Result<Connection, Error>
where
    E: FnOnce(&[u8]) -> io::Result<Vec<u8>>,
{
    connect_with_config(exchange, initiator, Config::default()).await
}

/// Establish a connection to the peer with an explicit [`Config`].
///
/// Binds the shared UDP socket, gathers host and reflexive candidates,
/// trades candidate lists through `exchange`, and runs the connectivity
/// engine until a path is confirmed or a terminal error occurs. On success
/// the returned [`Connection`] owns the socket.
///
/// # Errors
///
/// See [`Error`]. The socket is closed on every failure path.
pub async fn connect_with_config<E>(
    exchange: E,
    initiator: bool,
    cfg: Config,
) -> Result<Connection, Error>
where
    E: FnOnce(&[u8]) -> io::Result<Vec<u8>>,
{
    let sock = bind_socket(&cfg)?;
    let local = gather::gather_candidates(&sock, &cfg).await?;
    engine::run(sock, local, exchange, initiator, cfg).await
}

/// Bind the shared socket, applying the TOS marking if requested.
fn bind_socket(cfg: &Config) -> Result<UdpSocket, Error> {
    let domain = if cfg.bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if cfg.tos > 0 {
        if let Err(err) = sock.set_tos(cfg.tos) {
            warn!(tos = cfg.tos, %err, "could not set IP TOS, continuing without it");
        }
    }
    sock.set_nonblocking(true)?;
    sock.bind(&cfg.bind_addr.into())?;
    Ok(UdpSocket::from_std(sock.into())?)
}

/// Per-process tiebreaker carried in the ICE role attributes of every
/// probe this process sends.
pub(crate) fn role_tiebreaker() -> [u8; 8] {
    static TIEBREAKER: OnceLock<[u8; 8]> = OnceLock::new();
    *TIEBREAKER.get_or_init(|| {
        let mut tiebreaker = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut tiebreaker);
        tiebreaker
    })
}
