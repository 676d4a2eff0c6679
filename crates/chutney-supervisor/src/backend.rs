//! The seam between the supervisor and the operating system.

use std::fmt;
use std::path::PathBuf;

use chutney_topology::{NetworkSettings, Node, NodeId, NodeLayout};

use crate::error::Result;

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Reload configuration (SIGHUP).
    Reload,
    /// Graceful shutdown (SIGINT).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Forced termination (SIGKILL).
    Kill,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signaled(i32),
    /// Not our child, or it was reaped elsewhere.
    Unknown,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(sig) => write!(f, "killed by signal {sig}"),
            ExitStatus::Unknown => write!(f, "exit status unknown"),
        }
    }
}

/// What a backend knows about a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// One of our children that has exited.
    Exited(ExitStatus),
    /// No such process.
    Gone,
}

/// Everything needed to launch and track one node's daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub node: NodeId,
    pub nick: String,
    pub launch_phase: u32,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub pid_file: PathBuf,
    pub old_pid_file: PathBuf,
    pub lock_file: PathBuf,
    /// Captured stdout and stderr.
    pub output_log: PathBuf,
}

impl LaunchSpec {
    /// Launch parameters for a rendered node. The daemon runs in the
    /// foreground so the pid we record is the daemon's own.
    pub fn for_node(node: &Node, settings: &NetworkSettings) -> Self {
        let layout = NodeLayout::new(settings, node);
        let program = node.binary.clone().unwrap_or_else(|| settings.daemon.clone());
        Self {
            node: node.id,
            nick: node.nick(),
            launch_phase: node.launch_phase,
            program,
            args: vec![
                "-f".to_string(),
                layout.torrc().display().to_string(),
                "--RunAsDaemon".to_string(),
                "0".to_string(),
            ],
            pid_file: layout.pid_file(),
            old_pid_file: layout.old_pid_file(),
            lock_file: layout.lock_file(),
            output_log: layout.stdout_log(),
            dir: layout.dir,
        }
    }
}

/// Process operations. The local implementation talks to the OS; tests use a
/// fake to observe ordering and idempotence.
pub trait ProcessBackend: Send + Sync {
    /// Start the process and return its pid.
    fn launch(&self, spec: &LaunchSpec) -> Result<u32>;

    fn signal(&self, spec: &LaunchSpec, pid: u32, kind: SignalKind) -> Result<()>;

    fn probe(&self, pid: u32) -> Liveness;
}
