//! Error types for the chutney orchestrator.

use std::path::PathBuf;
use thiserror::Error;

use chutney_bootstrap::MonitorError;
use chutney_supervisor::ProcessError;
use chutney_template::RenderError;
use chutney_topology::TopologyError;
use chutney_traffic::TrafficError;

/// Result type for orchestration.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a network this host cannot run.
pub const EXIT_UNSUPPORTED: i32 = 77;

/// An environment variable with a value of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{var}={value:?} is not {expected}")]
pub struct ConfigError {
    pub var: String,
    pub expected: &'static str,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    #[error("bootstrap error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("verification failure: {0}")]
    Traffic(#[from] TrafficError),

    /// Key generation or fingerprint discovery failed for a node.
    #[error("identity of {nick}: {reason}")]
    Identity { nick: String, reason: String },

    /// The host lacks something the network needs.
    #[error("network not supported on this host: {}", reasons.join("; "))]
    Unsupported { reasons: Vec<String> },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usage: {0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn identity(nick: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Identity {
            nick: nick.into(),
            reason: reason.into(),
        }
    }

    /// Whether a fresh attempt could succeed where this one failed.
    ///
    /// Description, template and configuration mistakes repeat identically,
    /// so only runtime failures of the network itself are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Process(_) => true,
            Error::Traffic(e) => !matches!(
                e,
                TrafficError::NoClients | TrafficError::NoTargets | TrafficError::InvalidAddress { .. }
            ),
            Error::Monitor(e) => matches!(
                e,
                MonitorError::BootstrapTimeout { .. } | MonitorError::NodeCrashed { .. }
            ),
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Unsupported { .. } => EXIT_UNSUPPORTED,
            _ => 1,
        }
    }
}
