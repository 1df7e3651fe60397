//! Connection establishment knobs.

use std::net::SocketAddr;
use std::time::Duration;

use ipnet::IpNet;

/// STUN server queried for the reflexive address unless overridden.
pub const DEFAULT_STUN_SERVER: &str = "stun.l.google.com:19302";

/// Configuration for [`connect_with_config`](crate::connect_with_config).
#[derive(Debug, Clone)]
pub struct Config {
    /// Retransmit interval for each candidate probe.
    pub probe_timeout: Duration,

    /// How long the initiator collects reachability proofs before it picks
    /// a winner.
    pub decision_time: Duration,

    /// Hard cap on the whole connectivity phase.
    pub peer_deadline: Duration,

    /// Local address the shared UDP socket binds to. Binding the
    /// unspecified address enumerates all interfaces during gathering.
    pub bind_addr: SocketAddr,

    /// STUN server queried once for the reflexive address. `None` skips the
    /// query; a failed query is logged and the reflexive candidate omitted.
    pub stun_server: Option<String>,

    /// Interface-name whitelist for host candidates. Empty admits all
    /// interfaces.
    pub use_interfaces: Vec<String>,

    /// Prefixes excluded from host candidates and from the reflexive
    /// address learned during gathering.
    pub blacklist_addresses: Vec<IpNet>,

    /// Emit a per-iteration trace of the engine's attempts table.
    pub verbose: bool,

    /// IP TOS value applied to the socket when non-zero. Failure to apply
    /// it is logged and ignored.
    pub tos: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            decision_time: Duration::from_secs(2),
            peer_deadline: Duration::from_secs(5),
            bind_addr: "0.0.0.0:0".parse().expect("literal bind address"),
            stun_server: Some(DEFAULT_STUN_SERVER.to_string()),
            use_interfaces: Vec::new(),
            blacklist_addresses: Vec::new(),
            verbose: false,
            tos: 0,
        }
    }
}
