//! Error types for chutney-supervisor.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::ExitStatus;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Process lifecycle failures. Fatal for the current attempt.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The daemon binary could not be executed.
    #[error("could not launch {nick} ({program}): {source}")]
    Spawn {
        nick: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The daemon exited right after launch.
    #[error("{nick} exited during launch ({status})")]
    LaunchFailed { nick: String, status: ExitStatus },

    /// A signal could not be delivered.
    #[error("could not signal {nick} (pid {pid}): {reason}")]
    Signal {
        nick: String,
        pid: u32,
        reason: String,
    },

    /// The process survived every stop signal.
    #[error("{nick} (pid {pid}) is still running after all stop signals")]
    StopTimeout { nick: String, pid: u32 },

    /// Pid or lock file handling failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessError::Io {
            path: path.into(),
            source,
        }
    }
}
