//! The bootstrap wait: poll, evaluate, report, give up.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use chutney_topology::{Node, NodeId, Topology, VOTING_INTERVAL_SECS};

use crate::artifact::{ArtifactSource, NodeSnapshot};
use crate::error::{Lagging, MonitorError, Result};
use crate::progress::BootstrapProgress;
use crate::relationship::{MembershipTable, Observation, RelationshipSet, Unmet};

/// Extra settle time after convergence for networks with bridges.
const BRIDGE_SETTLE: Duration = Duration::from_secs(10);

/// Local bootstrap state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Unknown,
    Bootstrapping(u8),
    Bootstrapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub node: NodeId,
    pub nick: String,
    pub phase: NodePhase,
    pub progress: BootstrapProgress,
    /// A hidden service at 100% whose descriptor is not yet published.
    pub onion_pending: bool,
}

/// Everything derived from one poll. Rebuilt from scratch each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceState {
    pub nodes: Vec<NodeState>,
    pub unmet: Vec<Unmet>,
}

impl ConvergenceState {
    pub fn is_converged(&self) -> bool {
        self.unmet.is_empty() && self.nodes.iter().all(|n| n.phase == NodePhase::Bootstrapped)
    }

    pub fn lagging(&self) -> Vec<Lagging> {
        self.nodes
            .iter()
            .filter(|n| n.phase != NodePhase::Bootstrapped)
            .map(|n| Lagging {
                nick: n.nick.clone(),
                percent: n.progress.percent,
                message: if n.onion_pending {
                    "onion service descriptor not yet published".to_string()
                } else {
                    n.progress.message.clone().unwrap_or_else(|| "no bootstrap messages yet".to_string())
                },
            })
            .collect()
    }
}

/// Tells the monitor which nodes have died.
pub trait LivenessProbe: Send + Sync {
    /// Nodes among `nodes` whose process has exited, with a description of
    /// how.
    fn exited<'a>(&'a self, nodes: &'a [Node]) -> BoxFuture<'a, Vec<(NodeId, String)>>;
}

/// Budgets and cadence of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll: Duration,
    pub report: Duration,
    /// Extra wait after convergence.
    pub settle: Duration,
    /// Minimum time from the start of the wait to success.
    pub min_start: Duration,
}

impl WaitOptions {
    /// Budgets from the topology's settings. Onion services need a voting
    /// interval plus ten seconds to settle; bridges need ten seconds.
    pub fn for_topology(topology: &Topology) -> Self {
        let timing = &topology.settings().timing;
        let settle = if topology.has_hidden_services() {
            Duration::from_secs(VOTING_INTERVAL_SECS + 10)
        } else if topology.has_bridges() {
            BRIDGE_SETTLE
        } else {
            Duration::ZERO
        };
        Self {
            timeout: timing.bootstrap_timeout,
            poll: timing.poll_interval,
            report: timing.report_interval,
            settle,
            min_start: timing.min_start,
        }
    }

    /// Daemons older than 0.4 publish directory documents late, so give the
    /// network at least another voting interval after convergence.
    pub fn with_legacy_daemon(mut self, legacy: bool) -> Self {
        if legacy {
            self.settle = self.settle.max(Duration::from_secs(VOTING_INTERVAL_SECS));
        }
        self
    }
}

/// Convergence state machine over a topology.
pub struct BootstrapMonitor {
    topology: Arc<Topology>,
    active: BTreeSet<NodeId>,
    relationships: RelationshipSet,
    progress: BTreeMap<NodeId, BootstrapProgress>,
    published: BTreeSet<NodeId>,
}

impl BootstrapMonitor {
    /// Monitor every node up to the configured launch phase.
    pub fn new(topology: Arc<Topology>) -> Self {
        let limit = topology.settings().launch_phase.unwrap_or(u32::MAX);
        let active = topology
            .nodes()
            .iter()
            .filter(|n| n.launch_phase <= limit)
            .map(|n| n.id)
            .collect();
        Self {
            topology,
            active,
            relationships: RelationshipSet::baseline(),
            progress: BTreeMap::new(),
            published: BTreeSet::new(),
        }
    }

    pub fn with_relationships(mut self, relationships: RelationshipSet) -> Self {
        self.relationships = relationships;
        self
    }

    fn active_nodes(&self) -> Vec<Node> {
        self.topology
            .nodes()
            .iter()
            .filter(|n| self.active.contains(&n.id))
            .cloned()
            .collect()
    }

    /// Fold in one tick's snapshots and evaluate convergence.
    pub fn observe(&mut self, snapshots: &[NodeSnapshot]) -> ConvergenceState {
        for snap in snapshots {
            self.progress.entry(snap.node).or_default().merge(&snap.progress);
            if snap.onion_published.is_some() {
                self.published.insert(snap.node);
            }
        }

        let nodes = self
            .active_nodes()
            .into_iter()
            .map(|node| {
                let progress = self.progress.get(&node.id).cloned().unwrap_or_default();
                let onion_pending = node.roles.hidden_service
                    && progress.is_complete()
                    && !self.published.contains(&node.id);
                let phase = match progress.percent {
                    None => NodePhase::Unknown,
                    Some(100) if !onion_pending => NodePhase::Bootstrapped,
                    Some(p) => NodePhase::Bootstrapping(p),
                };
                NodeState {
                    node: node.id,
                    nick: node.nick(),
                    phase,
                    progress,
                    onion_pending,
                }
            })
            .collect();

        let table = MembershipTable::build(snapshots);
        let obs = Observation {
            topology: &self.topology,
            active: &self.active,
            table: &table,
        };
        ConvergenceState {
            nodes,
            unmet: self.relationships.unmet(&obs),
        }
    }

    async fn read_all(&self, source: &Arc<dyn ArtifactSource>) -> Result<Vec<NodeSnapshot>> {
        let reads = self.active_nodes().into_iter().map(|node| {
            let source = Arc::clone(source);
            tokio::task::spawn_blocking(move || source.read(&node))
        });
        join_all(reads)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(read) => read,
                Err(e) => Err(MonitorError::Reader(e.to_string())),
            })
            .collect()
    }

    fn report(&self, state: &ConvergenceState, elapsed: Duration) {
        let done = state.nodes.len() - state.lagging().len();
        info!(
            elapsed = elapsed.as_secs(),
            bootstrapped = done,
            nodes = state.nodes.len(),
            unmet = state.unmet.len(),
            "waiting for bootstrap"
        );
        for n in &state.nodes {
            debug!(
                nick = %n.nick,
                percent = ?n.progress.percent,
                keyword = ?n.progress.keyword,
                message = ?n.progress.message,
                "node status"
            );
        }
    }

    fn diagnose(&self, state: &ConvergenceState) {
        for lag in state.lagging() {
            warn!(nick = %lag.nick, percent = ?lag.percent, message = %lag.message, "node not bootstrapped");
        }
        for unmet in &state.unmet {
            warn!(
                relationship = unmet.relationship,
                subject = %unmet.subject,
                observer = %unmet.observer,
                status = %unmet.status,
                "relationship unmet"
            );
        }
    }

    /// Poll until the network converges, a node dies, or the budget runs out.
    ///
    /// Giving up only ends the wait; every process is left running.
    pub async fn wait(
        &mut self,
        source: Arc<dyn ArtifactSource>,
        probe: &dyn LivenessProbe,
        opts: &WaitOptions,
    ) -> Result<ConvergenceState> {
        let began = Instant::now();
        let deadline = began + opts.timeout;
        let mut next_report = began + opts.report;
        let nodes = self.active_nodes();
        info!(nodes = nodes.len(), timeout = opts.timeout.as_secs(), "waiting for network to bootstrap");

        loop {
            let snapshots = self.read_all(&source).await?;

            if let Some((id, status)) = probe.exited(&nodes).await.into_iter().next() {
                let nick = self
                    .topology
                    .node(id)
                    .map(|n| n.nick())
                    .unwrap_or_else(|| id.to_string());
                let percent = snapshots
                    .iter()
                    .find(|s| s.node == id)
                    .and_then(|s| s.progress.percent)
                    .or_else(|| self.progress.get(&id).and_then(|p| p.percent));
                warn!(%nick, ?percent, %status, "node exited during bootstrap");
                return Err(MonitorError::NodeCrashed {
                    node: id,
                    nick,
                    percent,
                    status,
                });
            }

            let state = self.observe(&snapshots);
            let now = Instant::now();
            if state.is_converged() {
                let elapsed = now - began;
                info!(elapsed = elapsed.as_secs(), "network converged");
                let settle = opts.settle.max(opts.min_start.saturating_sub(elapsed));
                if !settle.is_zero() {
                    info!(seconds = settle.as_secs(), "letting the network settle");
                    sleep(settle).await;
                }
                return Ok(state);
            }

            if now >= next_report {
                self.report(&state, now - began);
                next_report += opts.report;
            }

            if now >= deadline {
                self.diagnose(&state);
                return Err(MonitorError::BootstrapTimeout {
                    waited: now - began,
                    lagging: state.lagging(),
                    unmet: state.unmet,
                });
            }

            sleep(opts.poll).await;
        }
    }
}
