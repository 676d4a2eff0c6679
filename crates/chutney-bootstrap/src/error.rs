//! Error types for chutney-bootstrap.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use chutney_topology::NodeId;

use crate::relationship::Unmet;

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A node that had not finished bootstrapping when the wait gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lagging {
    pub nick: String,
    pub percent: Option<u8>,
    pub message: String,
}

/// Failures of the bootstrap wait. Both timeout and crash are retryable by
/// the attempt loop; they are kept distinct so reports can tell them apart.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The network did not converge within the wait budget.
    #[error(
        "network did not converge within {waited:?}: {} node(s) not bootstrapped, {} unmet relationship(s)",
        lagging.len(),
        unmet.len()
    )]
    BootstrapTimeout {
        waited: Duration,
        lagging: Vec<Lagging>,
        unmet: Vec<Unmet>,
    },

    /// A node's daemon exited while we were waiting for it.
    #[error("{nick} exited during bootstrap at {percent:?}% ({status})")]
    NodeCrashed {
        node: NodeId,
        nick: String,
        percent: Option<u8>,
        status: String,
    },

    /// An artifact could not be read for a reason other than absence.
    #[error("could not read {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking read task panicked or was cancelled.
    #[error("artifact reader failed: {0}")]
    Reader(String),
}
