//! Phase-ordered start, escalating stop, status and signalling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use chutney_topology::{NodeId, Timing};

use crate::backend::{ExitStatus, LaunchSpec, Liveness, ProcessBackend, SignalKind};
use crate::error::{ProcessError, Result};
use crate::pidfile;

/// Observed state of a node's daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    NotStarted,
    Running(u32),
    Exited(ExitStatus),
}

/// A process the supervisor launched or adopted from a pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: SystemTime,
    pub last_exit: Option<ExitStatus>,
}

/// How hard and how long to try when stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPolicy {
    /// Signals sent in order until the process is gone.
    pub signals: Vec<SignalKind>,
    /// Wait after each signal.
    pub grace: Duration,
    /// Liveness poll interval while waiting.
    pub poll: Duration,
    /// Pause after launch before checking the process survived it.
    pub launch_check: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            signals: vec![SignalKind::Interrupt, SignalKind::Interrupt, SignalKind::Kill],
            grace: Duration::from_secs(15),
            poll: Duration::from_secs(1),
            launch_check: Duration::from_millis(100),
        }
    }
}

impl StopPolicy {
    pub fn from_timing(timing: &Timing) -> Self {
        Self {
            grace: timing.stop_grace,
            poll: timing.poll_interval,
            ..Self::default()
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The process went away after `signals` signals.
    Stopped { pid: u32, signals: usize },
}

type Record = Arc<Mutex<Option<ProcessHandle>>>;

/// Sole owner of pid files and stop signals for a network.
pub struct Supervisor {
    backend: Arc<dyn ProcessBackend>,
    policy: StopPolicy,
    records: Mutex<HashMap<NodeId, Record>>,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn ProcessBackend>, policy: StopPolicy) -> Self {
        Self {
            backend,
            policy,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &StopPolicy {
        &self.policy
    }

    async fn record(&self, id: NodeId) -> Record {
        self.records.lock().await.entry(id).or_default().clone()
    }

    fn observe(&self, spec: &LaunchSpec, handle: &mut Option<ProcessHandle>) -> Result<NodeStatus> {
        if let Some(h) = handle.as_mut() {
            if let Some(exit) = h.last_exit {
                return Ok(NodeStatus::Exited(exit));
            }
            return Ok(match self.backend.probe(h.pid) {
                Liveness::Alive => NodeStatus::Running(h.pid),
                Liveness::Exited(status) => {
                    h.last_exit = Some(status);
                    NodeStatus::Exited(status)
                }
                Liveness::Gone => {
                    h.last_exit = Some(ExitStatus::Unknown);
                    NodeStatus::Exited(ExitStatus::Unknown)
                }
            });
        }

        let Some(pid) = pidfile::read_pid(&spec.pid_file)? else {
            return Ok(NodeStatus::NotStarted);
        };
        Ok(match self.backend.probe(pid) {
            Liveness::Alive => {
                debug!(nick = %spec.nick, pid, "adopting running process from pid file");
                *handle = Some(ProcessHandle {
                    pid,
                    started_at: SystemTime::now(),
                    last_exit: None,
                });
                NodeStatus::Running(pid)
            }
            Liveness::Exited(status) => NodeStatus::Exited(status),
            Liveness::Gone => NodeStatus::Exited(ExitStatus::Unknown),
        })
    }

    pub async fn status(&self, spec: &LaunchSpec) -> Result<NodeStatus> {
        let record = self.record(spec.node).await;
        let mut handle = record.lock().await;
        self.observe(spec, &mut handle)
    }

    /// Handle of the node's current or last process.
    pub async fn handle(&self, spec: &LaunchSpec) -> Option<ProcessHandle> {
        self.record(spec.node).await.lock().await.clone()
    }

    /// Start a node unless it is already running. Returns its pid.
    pub async fn start(&self, spec: &LaunchSpec) -> Result<u32> {
        let record = self.record(spec.node).await;
        let mut handle = record.lock().await;
        if let NodeStatus::Running(pid) = self.observe(spec, &mut handle)? {
            info!(nick = %spec.nick, pid, "already running");
            return Ok(pid);
        }

        let pid = self.backend.launch(spec)?;
        pidfile::write_pid(&spec.pid_file, pid)?;
        *handle = Some(ProcessHandle {
            pid,
            started_at: SystemTime::now(),
            last_exit: None,
        });

        sleep(self.policy.launch_check).await;
        let status = match self.backend.probe(pid) {
            Liveness::Alive => {
                info!(nick = %spec.nick, pid, "started");
                return Ok(pid);
            }
            Liveness::Exited(status) => status,
            Liveness::Gone => ExitStatus::Unknown,
        };
        if let Some(h) = handle.as_mut() {
            h.last_exit = Some(status);
        }
        Err(ProcessError::LaunchFailed {
            nick: spec.nick.clone(),
            status,
        })
    }

    /// Start nodes in ascending launch phase. Nodes within a phase start
    /// concurrently; the next phase begins only after every start call of
    /// the current one has returned. Stops at the first phase with a failure.
    pub async fn start_all(&self, specs: &[LaunchSpec]) -> Result<()> {
        let mut phases: BTreeMap<u32, Vec<&LaunchSpec>> = BTreeMap::new();
        for spec in specs {
            phases.entry(spec.launch_phase).or_default().push(spec);
        }

        for (phase, members) in phases {
            info!(phase, nodes = members.len(), "starting launch phase");
            let results = join_all(members.iter().map(|spec| self.start(spec))).await;
            if let Some(err) = results.into_iter().find_map(|r| r.err()) {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn wait_gone(&self, spec: &LaunchSpec, handle: &mut Option<ProcessHandle>) -> Result<bool> {
        let deadline = Instant::now() + self.policy.grace;
        loop {
            if !matches!(self.observe(spec, handle)?, NodeStatus::Running(_)) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.policy.poll).await;
        }
    }

    /// Stop a node, escalating through the policy's signals.
    ///
    /// Stopping a node that is not running succeeds. A node that was never
    /// started is left entirely untouched.
    pub async fn stop(&self, spec: &LaunchSpec) -> Result<StopOutcome> {
        let record = self.record(spec.node).await;
        let mut handle = record.lock().await;
        let pid = match self.observe(spec, &mut handle)? {
            NodeStatus::Running(pid) => pid,
            NodeStatus::NotStarted => {
                debug!(nick = %spec.nick, "not running");
                return Ok(StopOutcome::NotRunning);
            }
            NodeStatus::Exited(status) => {
                debug!(nick = %spec.nick, %status, "already exited");
                pidfile::retire(spec)?;
                return Ok(StopOutcome::NotRunning);
            }
        };

        for (sent, kind) in self.policy.signals.iter().enumerate() {
            debug!(nick = %spec.nick, pid, signal = ?kind, "sending stop signal");
            self.backend.signal(spec, pid, *kind)?;
            if self.wait_gone(spec, &mut handle).await? {
                pidfile::retire(spec)?;
                info!(nick = %spec.nick, pid, "stopped");
                return Ok(StopOutcome::Stopped {
                    pid,
                    signals: sent + 1,
                });
            }
            warn!(nick = %spec.nick, pid, signal = ?kind, "still running after stop signal");
        }

        Err(ProcessError::StopTimeout {
            nick: spec.nick.clone(),
            pid,
        })
    }

    /// Stop every node concurrently. Reports the first failure after all
    /// stop calls have returned.
    pub async fn stop_all(&self, specs: &[LaunchSpec]) -> Result<Vec<StopOutcome>> {
        let results = join_all(specs.iter().map(|spec| self.stop(spec))).await;
        results.into_iter().collect()
    }

    /// Send `kind` to a running node. Returns whether it was running.
    pub async fn signal(&self, spec: &LaunchSpec, kind: SignalKind) -> Result<bool> {
        let record = self.record(spec.node).await;
        let mut handle = record.lock().await;
        match self.observe(spec, &mut handle)? {
            NodeStatus::Running(pid) => {
                debug!(nick = %spec.nick, pid, signal = ?kind, "signalling");
                self.backend.signal(spec, pid, kind)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
