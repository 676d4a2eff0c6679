//! Error types for chutney-traffic.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type for traffic operations.
pub type Result<T> = std::result::Result<T, TrafficError>;

/// Verification failures. Every one of them fails the round, and every one
/// is retryable by the attempt loop.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// The network has nothing to send traffic from.
    #[error("unable to verify network: no client nodes available")]
    NoClients,

    /// The network has nowhere to send traffic to.
    #[error("unable to verify network: no exit or onion service nodes available")]
    NoTargets,

    /// The configured listen address is not an IP address.
    #[error("invalid listen address {addr:?}")]
    InvalidAddress { addr: String },

    /// An onion service has not written its hostname yet.
    #[error("onion service {nick} has no hostname")]
    NoOnionHostname { nick: String },

    /// The echo listener could not be set up.
    #[error("could not listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The client's SOCKS port refused the TCP connection.
    #[error("{stream}: could not reach proxy {proxy}: {source}")]
    ProxyConnect {
        stream: String,
        proxy: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The proxy answered the SOCKS request with something other than
    /// "granted".
    #[error("{stream}: proxy handshake failed (0x{code:02x})")]
    ProxyRefused { stream: String, code: u8 },

    /// Reading or writing the stream failed mid-transfer.
    #[error("{stream}: transfer failed after {received} bytes: {source}")]
    Transfer {
        stream: String,
        received: u64,
        #[source]
        source: std::io::Error,
    },

    /// The echoed data did not match what was sent.
    #[error("{stream}: received data differs from sent data at byte {offset}")]
    Mismatch { stream: String, offset: u64 },

    /// The stream went silent.
    #[error("{stream}: no completion within {after:?}")]
    StreamTimeout { stream: String, after: Duration },

    /// Every try within the verification budget failed.
    #[error("verification failed {tries} time(s) within {budget:?}; last failure: {last}")]
    BudgetExhausted {
        tries: u32,
        budget: Duration,
        #[source]
        last: Box<TrafficError>,
    },
}
