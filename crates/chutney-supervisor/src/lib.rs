//! Chutney Process Supervisor
//!
//! Starts, stops, signals and reports on the daemons of a test network.
//!
//! # Ordering
//!
//! [`Supervisor::start_all`] launches nodes in ascending launch phase. All
//! nodes of a phase start concurrently, and a phase is a hard barrier: the
//! next one begins only after every start call of the current phase returned.
//!
//! # Stopping
//!
//! [`Supervisor::stop`] is idempotent. A running daemon gets SIGINT, a second
//! SIGINT, then SIGKILL, each followed by a bounded wait. Once the process is
//! gone its pid file is renamed to `pid.old` and a stale lock file removed.
//!
//! # Backends
//!
//! All OS interaction goes through [`ProcessBackend`]. [`LocalBackend`]
//! spawns real processes with tokio and signals them with nix.

mod backend;
mod error;
mod local;
mod pidfile;
mod supervisor;

pub use backend::{ExitStatus, LaunchSpec, Liveness, ProcessBackend, SignalKind};
pub use error::{ProcessError, Result};
pub use local::LocalBackend;
pub use pidfile::{read_pid, write_pid};
pub use supervisor::{NodeStatus, ProcessHandle, StopOutcome, StopPolicy, Supervisor};
