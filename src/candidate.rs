//! Endpoint candidates and their signalling encoding.
//!
//! A candidate is one possible UDP endpoint for the local side: a host
//! address discovered from the socket or the interface table, or the
//! reflexive address a STUN server reported. Candidate lists travel to the
//! peer as a JSON blob over whatever signalling channel the caller provides.

use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// One possible UDP endpoint, with its selection priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// The candidate transport address.
    pub addr: SocketAddr,
    /// Selection priority; larger wins. Only the ordering is meaningful,
    /// and only among candidates from one gathering pass.
    pub prio: i64,
}

/// Candidates are the same endpoint when IP and port match; priority is
/// not part of identity.
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.addr.ip() == other.addr.ip() && self.addr.port() == other.addr.port()
    }
}

impl Eq for Candidate {}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} {}", self.prio, self.addr)
    }
}

/// Serialize a candidate list into the signalling blob.
///
/// # Errors
///
/// Returns a `serde_json` error if serialization fails.
pub fn encode_list(candidates: &[Candidate]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(candidates)
}

/// Deserialize a peer's signalling blob into its candidate list.
///
/// # Errors
///
/// Returns a `serde_json` error for anything that is not a list this crate
/// could have produced.
pub fn decode_list(blob: &[u8]) -> serde_json::Result<Vec<Candidate>> {
    serde_json::from_slice(blob)
}

/// Private-range prefixes that outrank public addresses.
fn lan_nets() -> &'static [IpNet] {
    static LAN_NETS: OnceLock<Vec<IpNet>> = OnceLock::new();
    LAN_NETS.get_or_init(|| {
        ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fc00::/7"]
            .iter()
            .map(|net| net.parse().expect("literal prefix"))
            .collect()
    })
}

/// Drop candidates that repeat an earlier (IP, port) endpoint.
pub(crate) fn prune_duplicates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.iter().any(|seen| *seen == candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// Assign priorities in enumeration order.
///
/// LAN addresses get bit 32 so they outrank anything public; `index << 16`
/// uniquifies every entry while leaving the low bits clear. The result is a
/// pure function of the list order.
pub(crate) fn assign_priorities(candidates: &mut [Candidate]) {
    for (index, candidate) in candidates.iter_mut().enumerate() {
        if lan_nets().iter().any(|net| net.contains(&candidate.addr.ip())) {
            candidate.prio |= 1 << 32;
        }
        candidate.prio += (index as i64) << 16;
    }
}
