//! Terminal errors for connection establishment.

use thiserror::Error;

/// Errors that abort connection establishment.
///
/// Malformed or unexpected datagrams never surface here: the engine drops
/// them and carries on. Every variant below is terminal, and the shared UDP
/// socket is closed before the error reaches the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// OS-level socket failure (bind, read or write).
    #[error("socket failure: {0}")]
    Socket(#[from] std::io::Error),

    /// Gathering was started on a loopback-bound socket.
    #[error("connecting over loopback not supported")]
    LoopbackNotSupported,

    /// The exchange function failed or returned an unparseable candidate blob.
    #[error("candidate exchange failed: {0}")]
    Exchange(String),

    /// The peer nominated a path this side never verified.
    #[error("peer nominated an unverified path")]
    BadUseCandidate,

    /// No candidate pair produced a reachability proof in time.
    #[error("no feasible path to peer")]
    NoFeasiblePath,

    /// A path was nominated but the confirmation round-trip never finished.
    #[error("path nomination not confirmed before deadline")]
    ConfirmationLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        assert_eq!(
            Error::LoopbackNotSupported.to_string(),
            "connecting over loopback not supported"
        );
        assert_eq!(Error::NoFeasiblePath.to_string(), "no feasible path to peer");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "bind");
        let err: Error = io.into();
        assert!(matches!(err, Error::Socket(_)));
    }
}
