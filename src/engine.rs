//! Connectivity engine: probe, respond, decide, confirm.
//!
//! One cooperative loop over one shared socket. Each iteration retransmits
//! every due probe, waits for a single datagram until the earliest probe
//! timer, and dispatches it. The initiator additionally runs the decision
//! once `decision_time` has passed, nominating the best verified path with
//! a USE-CANDIDATE probe; the responder learns the nomination by observing
//! that probe. All state lives in a flat attempts table, one entry per peer
//! candidate; lookups are linear scans, which beats any map at the tens of
//! candidates a real gathering pass produces.
//!
//! Malformed or unexpected datagrams are never fatal here. They become "no
//! progress on this iteration"; terminal errors are concentrated at the
//! deadlines and at a nomination of an unverified path.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::candidate::{self, Candidate};
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::role_tiebreaker;
use crate::stun::{Class, Message, MessageBuilder, Method};

/// Receive buffer size; connectivity probes are far smaller.
const RECV_BUF: usize = 1500;

/// Exchange candidate lists over the caller's signalling channel and drive
/// the probe loop to a connection or a terminal error.
pub(crate) async fn run<E>(
    sock: UdpSocket,
    local: Vec<Candidate>,
    exchange: E,
    initiator: bool,
    cfg: Config,
) -> Result<Connection, Error>
where
    E: FnOnce(&[u8]) -> io::Result<Vec<u8>>,
{
    let blob = candidate::encode_list(&local).map_err(|err| Error::Exchange(err.to_string()))?;
    let peer_blob = exchange(&blob).map_err(|err| Error::Exchange(err.to_string()))?;
    let peers =
        candidate::decode_list(&peer_blob).map_err(|err| Error::Exchange(err.to_string()))?;
    debug!(initiator, count = peers.len(), "received peer candidates");

    Engine::new(sock, peers, initiator, cfg, StdRng::from_entropy())
        .drive()
        .await
}

/// Per-peer-candidate probe state.
#[derive(Debug)]
struct Attempt {
    peer: Candidate,
    /// Transaction id of the probe in flight. Refreshed on every
    /// retransmit, so stale responses fail the tid match and are dropped.
    tid: [u8; 12],
    /// When the next probe goes out; equivalently, when the current one is
    /// considered lost.
    deadline: Instant,
    /// A success response arrived from this peer address.
    success: bool,
    /// Nominated for the connection. Initiator only, at most one attempt.
    chosen: bool,
    /// Our address as this peer sees it, from its success response.
    local_addr: Option<SocketAddr>,
}

struct Engine {
    sock: UdpSocket,
    initiator: bool,
    attempts: Vec<Attempt>,
    cfg: Config,
    rng: StdRng,
}

impl Engine {
    fn new(
        sock: UdpSocket,
        peers: Vec<Candidate>,
        initiator: bool,
        cfg: Config,
        rng: StdRng,
    ) -> Self {
        let now = Instant::now();
        let attempts = peers
            .into_iter()
            .map(|peer| Attempt {
                peer,
                tid: [0u8; 12],
                deadline: now,
                success: false,
                chosen: false,
                local_addr: None,
            })
            .collect();
        Self {
            sock,
            initiator,
            attempts,
            cfg,
            rng,
        }
    }

    async fn drive(mut self) -> Result<Connection, Error> {
        let start = Instant::now();
        let mut decision = self.initiator.then(|| start + self.cfg.decision_time);
        let hard_deadline = start + self.cfg.peer_deadline;

        loop {
            let now = Instant::now();
            if let Some(at) = decision {
                if now >= at {
                    decision = None;
                    self.decide()?;
                }
            }
            if now >= hard_deadline {
                return Err(if self.attempts.iter().any(|a| a.chosen) {
                    Error::ConfirmationLost
                } else {
                    Error::NoFeasiblePath
                });
            }
            if self.cfg.verbose {
                self.trace_attempts();
            }

            let next = self.transmit().await?;
            let read_deadline = next.unwrap_or(hard_deadline);
            if let Some(index) = self.read_one(read_deadline).await? {
                return self.establish(index);
            }
        }
    }

    /// Send every due probe and return the earliest probe timer, which
    /// bounds the next receive.
    async fn transmit(&mut self) -> Result<Option<Instant>, Error> {
        let now = Instant::now();
        let mut next: Option<Instant> = None;
        for attempt in &mut self.attempts {
            if attempt.deadline <= now {
                self.rng.fill_bytes(&mut attempt.tid);
                let mut probe = MessageBuilder::new(Class::Request, Method::Binding, attempt.tid);
                probe = if self.initiator {
                    probe.ice_controlling(role_tiebreaker())
                } else {
                    probe.ice_controlled(role_tiebreaker())
                };
                if attempt.chosen {
                    probe = probe.use_candidate();
                }
                self.sock.send_to(&probe.build(), attempt.peer.addr).await?;
                attempt.deadline = now + self.cfg.probe_timeout;
                trace!(peer = %attempt.peer.addr, nominating = attempt.chosen, "probe sent");
            }
            next = Some(match next {
                Some(earliest) if earliest <= attempt.deadline => earliest,
                _ => attempt.deadline,
            });
        }
        Ok(next)
    }

    /// Wait for one datagram until `deadline` and dispatch it. Returns the
    /// index of the established attempt, if this datagram completed the
    /// handshake. A quiet interval is not an error.
    async fn read_one(&mut self, deadline: Instant) -> Result<Option<usize>, Error> {
        let mut buf = [0u8; RECV_BUF];
        let wait = deadline.saturating_duration_since(Instant::now());
        let (n, from) = match timeout(wait, self.sock.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Ok(None),
        };

        let msg = match Message::parse(&buf[..n], None) {
            Ok(msg) => msg,
            Err(err) => {
                trace!(%from, %err, "dropping undecodable datagram");
                return Ok(None);
            }
        };

        match msg.class {
            Class::Request => self.on_request(&msg, from).await,
            Class::Success => Ok(self.on_success(&msg, from)),
            _ => Ok(None),
        }
    }

    /// Answer a peer probe, and complete the handshake if it nominates a
    /// path we verified ourselves.
    async fn on_request(&mut self, msg: &Message, from: SocketAddr) -> Result<Option<usize>, Error> {
        let response = MessageBuilder::new(Class::Success, Method::Binding, msg.tid)
            .xor_mapped_address(from)
            .build();
        self.sock.send_to(&response, from).await?;

        if !msg.use_candidate {
            return Ok(None);
        }
        match self
            .attempts
            .iter()
            .position(|a| same_address(a.peer.addr, from))
        {
            Some(index) if self.attempts[index].success => {
                debug!(peer = %from, "peer nominated a verified path");
                Ok(Some(index))
            }
            _ => Err(Error::BadUseCandidate),
        }
    }

    /// Match a success response to its in-flight probe.
    fn on_success(&mut self, msg: &Message, from: SocketAddr) -> Option<usize> {
        let index = self.attempts.iter().position(|a| a.tid == msg.tid)?;
        let attempt = &mut self.attempts[index];
        if !same_address(attempt.peer.addr, from) {
            trace!(%from, expected = %attempt.peer.addr, "success response from unexpected source");
            return None;
        }
        if attempt.chosen {
            // the nomination round-trip just completed
            return Some(index);
        }
        attempt.success = true;
        attempt.local_addr = msg.addr;
        // The probe timer is left alone; the path stays verified and any
        // nomination reprobe is rate limited by probe_timeout.
        trace!(peer = %attempt.peer.addr, reflexive = ?msg.addr, "path verified");
        None
    }

    /// Nominate the highest-priority verified attempt, ties broken by
    /// first-seen order. Zeroing its timer makes the next transmit pass
    /// send the USE-CANDIDATE probe immediately.
    fn decide(&mut self) -> Result<(), Error> {
        let mut winner: Option<usize> = None;
        for (index, attempt) in self.attempts.iter().enumerate() {
            if !attempt.success {
                continue;
            }
            match winner {
                Some(best) if self.attempts[best].peer.prio >= attempt.peer.prio => {}
                _ => winner = Some(index),
            }
        }
        let Some(index) = winner else {
            return Err(Error::NoFeasiblePath);
        };
        self.attempts[index].chosen = true;
        self.attempts[index].deadline = Instant::now();
        debug!(
            peer = %self.attempts[index].peer.addr,
            prio = self.attempts[index].peer.prio,
            "path nominated"
        );
        Ok(())
    }

    /// Hand the socket off to the connection bound to the chosen 5-tuple.
    fn establish(self, index: usize) -> Result<Connection, Error> {
        let attempt = &self.attempts[index];
        let local = match attempt.local_addr {
            Some(addr) => addr,
            None => self.sock.local_addr()?,
        };
        debug!(local = %local, remote = %attempt.peer.addr, "connection established");
        Ok(Connection::new(self.sock, local, attempt.peer.addr))
    }

    fn trace_attempts(&self) {
        for (index, attempt) in self.attempts.iter().enumerate() {
            debug!(
                index,
                peer = %attempt.peer.addr,
                success = attempt.success,
                chosen = attempt.chosen,
                "attempt state"
            );
        }
    }
}

/// Canonical textual comparison sidesteps IPv6 scope-id mismatches between
/// a candidate parsed from the signalling blob and an address the OS
/// reported.
fn same_address(a: SocketAddr, b: SocketAddr) -> bool {
    a == b || a.to_string() == b.to_string()
}
