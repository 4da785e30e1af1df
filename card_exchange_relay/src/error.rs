// Error types for the relay crate.
//
// Only startup failures (`Bind`, `AddressDiscovery`) are fatal to the server.
// Per-session faults never surface as `RelayError` from the main loop: a bad
// payload is a `ProtocolError` that gets logged and dropped, and a failed
// read or write evicts the session (see `session.rs`). The `Io`/`Protocol`
// variants exist for `RelayClient` and the session send path.

use std::net::SocketAddr;

use card_exchange_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listener could not be bound at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// No non-loopback IPv4 address could be found for this host.
    #[error("could not determine a primary IPv4 address: {0}")]
    AddressDiscovery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
