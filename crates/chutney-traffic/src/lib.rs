//! Chutney Traffic
//!
//! Proves a converged network carries data end to end.
//!
//! # Streams
//!
//! Each traffic client opens streams through its own SOCKS port. With an exit
//! in the network the streams go to a local [`EchoListener`]; onion services
//! forward port [`HS_PORT`] to the same listener. Every stream sends the
//! [`Payload`] and checks that exactly the same bytes come back.
//!
//! # Rounds
//!
//! All streams of a round run concurrently and one failed stream fails the
//! round. Throughput is reported for the slowest stream and for the network
//! as a whole, once enough data moved to make the figures meaningful.
//!
//! # Budget
//!
//! [`verify_with_budget`] retries failed runs with a pause in between until
//! the verification budget is spent.

mod echo;
mod engine;
mod error;
mod payload;
mod plan;
mod socks;
mod verify;

pub use echo::{EchoListener, LISTEN_PORT};
pub use engine::{
    RoundReport, StreamReport, Throughput, TrafficEngine, DEFAULT_STREAM_TIMEOUT, MIN_REPORT_BYTES,
    MIN_REPORT_ELAPSED,
};
pub use error::{Result, TrafficError};
pub use payload::{Payload, MAX_RANDOM_CHUNK};
pub use plan::{StreamSpec, Target, TrafficPlan, EXIT_PATH_NODES, HS_PORT, ONION_PATH_NODES};
pub use socks::{connect as socks_connect, connect_request as socks_request};
pub use verify::{verify_with_budget, RETRY_PAUSE};
