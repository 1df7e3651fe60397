//! Host and reflexive candidate gathering.
//!
//! Host candidates come from the socket's bound address, or from the
//! interface table when the socket is bound to the unspecified address.
//! One Binding request to the configured STUN server contributes the
//! reflexive candidate; that query failing is never fatal.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::candidate::{self, Candidate};
use crate::config::Config;
use crate::error::Error;
use crate::role_tiebreaker;
use crate::stun::{Class, Message, MessageBuilder, Method};

/// Overall deadline for the reflexive-address query.
const STUN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gather the local candidate list for the engine to advertise.
///
/// # Errors
///
/// Fails with [`Error::LoopbackNotSupported`] for a loopback-bound socket
/// and [`Error::Socket`] for OS failures. An unreachable STUN server is
/// logged and the reflexive candidate omitted.
pub(crate) async fn gather_candidates(
    sock: &UdpSocket,
    cfg: &Config,
) -> Result<Vec<Candidate>, Error> {
    let local = sock.local_addr()?;
    let mut found = host_candidates(local, cfg)?;

    if let Some(server) = cfg.stun_server.as_deref() {
        match query_reflexive(sock, server).await {
            Ok(addr) if is_blacklisted(&addr.ip(), cfg) => {
                debug!(%addr, "reflexive address blacklisted");
            }
            Ok(addr) => found.push(Candidate { addr, prio: 0 }),
            Err(err) => {
                warn!(server, %err, "reflexive address query failed, continuing without it");
            }
        }
    }

    let mut found = candidate::prune_duplicates(found);
    candidate::assign_priorities(&mut found);
    debug!(count = found.len(), "gathered local candidates");
    Ok(found)
}

/// Host candidates for the bound address: the interface table when bound
/// to the unspecified address, the single bound address otherwise. Every
/// discovered address must be global unicast and outside the blacklist.
fn host_candidates(local: SocketAddr, cfg: &Config) -> Result<Vec<Candidate>, Error> {
    let mut found = Vec::new();

    if local.ip().is_loopback() {
        return Err(Error::LoopbackNotSupported);
    } else if local.ip().is_unspecified() {
        for iface in netdev::get_interfaces() {
            if !cfg.use_interfaces.is_empty()
                && !cfg.use_interfaces.iter().any(|name| *name == iface.name)
            {
                continue;
            }
            let v4 = iface.ipv4.iter().map(|net| IpAddr::V4(net.addr()));
            let v6 = iface.ipv6.iter().map(|net| IpAddr::V6(net.addr()));
            for ip in v4.chain(v6) {
                if !is_global_unicast(&ip) {
                    continue;
                }
                if is_blacklisted(&ip, cfg) {
                    debug!(%ip, iface = %iface.name, "host address blacklisted");
                    continue;
                }
                found.push(Candidate {
                    addr: SocketAddr::new(ip, local.port()),
                    prio: 0,
                });
            }
        }
    } else if !is_global_unicast(&local.ip()) {
        debug!(addr = %local, "bound address is not global unicast");
    } else if is_blacklisted(&local.ip(), cfg) {
        debug!(addr = %local, "bound address blacklisted");
    } else {
        found.push(Candidate {
            addr: local,
            prio: 0,
        });
    }

    Ok(found)
}

#[derive(Debug, Error)]
enum StunQueryError {
    #[error("could not resolve server address")]
    Unresolvable,
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response from server")]
    Timeout,
    #[error("server response carried no usable address")]
    BadResponse,
}

/// One Binding request to the STUN server; the XOR-MAPPED-ADDRESS in its
/// response is our address as the public internet sees it.
async fn query_reflexive(
    sock: &UdpSocket,
    server: &str,
) -> Result<SocketAddr, StunQueryError> {
    let server_addr = lookup_host(server)
        .await
        .map_err(|_| StunQueryError::Unresolvable)?
        .next()
        .ok_or(StunQueryError::Unresolvable)?;

    let mut tid = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut tid);
    let request = MessageBuilder::new(Class::Request, Method::Binding, tid)
        .ice_controlling(role_tiebreaker())
        .build();
    sock.send_to(&request, server_addr).await?;

    let mut buf = [0u8; 1024];
    let (n, _from) = timeout(STUN_TIMEOUT, sock.recv_from(&mut buf))
        .await
        .map_err(|_| StunQueryError::Timeout)??;

    let response =
        Message::parse(&buf[..n], None).map_err(|_| StunQueryError::BadResponse)?;
    if response.class != Class::Success || response.tid != tid {
        return Err(StunQueryError::BadResponse);
    }
    response.addr.ok_or(StunQueryError::BadResponse)
}

/// Global unicast: anything that is not unspecified, loopback, link-local
/// or multicast. Private-range addresses qualify.
fn is_global_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_unspecified() || v6.is_loopback() || v6.is_multicast() || link_local)
        }
    }
}

fn is_blacklisted(ip: &IpAddr, cfg: &Config) -> bool {
    cfg.blacklist_addresses.iter().any(|net| net.contains(ip))
}
