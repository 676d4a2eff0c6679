//! One test network: its topology plus the supervisor running it.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use chutney_bootstrap::{
    ArtifactSource, BootstrapMonitor, ConvergenceState, FsArtifactSource, LivenessProbe, WaitOptions,
};
use chutney_supervisor::{
    LaunchSpec, LocalBackend, NodeStatus, ProcessBackend, SignalKind, StopOutcome, StopPolicy, Supervisor,
};
use chutney_template::{create_nodes_dir, RenderedConfig, Renderer};
use chutney_topology::{NetworkSettings, Node, NodeId, Topology};
use chutney_traffic::{verify_with_budget, RoundReport, TrafficEngine};

use crate::config::RunOptions;
use crate::error::{Error, Result};
use crate::{host, identity, tools};

/// Running count reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub running: usize,
    pub expected: usize,
}

impl NetworkStatus {
    pub fn all_running(&self) -> bool {
        self.running == self.expected
    }
}

/// Distinct phases used by the nodes, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phases {
    pub config: Vec<u32>,
    pub launch: Vec<u32>,
}

pub struct Network {
    topology: Arc<Topology>,
    supervisor: Supervisor,
}

impl Network {
    /// A network run by local daemon processes.
    pub fn new(topology: Topology) -> Self {
        Self::with_backend(topology, Arc::new(LocalBackend::new()))
    }

    pub fn with_backend(topology: Topology, backend: Arc<dyn ProcessBackend>) -> Self {
        let policy = StopPolicy::from_timing(&topology.settings().timing);
        Self {
            topology: Arc::new(topology),
            supervisor: Supervisor::new(backend, policy),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn settings(&self) -> &NetworkSettings {
        self.topology.settings()
    }

    /// Launch specs of the nodes in the selected launch phase.
    fn specs(&self) -> Vec<LaunchSpec> {
        self.topology
            .selected()
            .into_iter()
            .map(|node| LaunchSpec::for_node(node, self.settings()))
            .collect()
    }

    /// Fail with [`Error::Unsupported`] if this host cannot run the network.
    pub async fn supported(&self) -> Result<()> {
        host::check_supported(&self.topology).await
    }

    pub fn phases(&self) -> Phases {
        let launch: Vec<u32> = self.topology.phases().into_keys().collect();
        Phases {
            config: launch.clone(),
            launch,
        }
    }

    /// Render every node's config into a fresh nodes directory.
    ///
    /// All templates are checked before anything is written. Identities are
    /// generated next, since the authority and bridge lines every node needs
    /// depend on them.
    pub async fn configure(&self) -> Result<Vec<RenderedConfig>> {
        let settings = self.settings();
        let mut renderer = Renderer::new(settings.template_path.clone());
        if let Some(filter) = tools::option_filter(&settings.daemon).await {
            renderer = renderer.with_filter(filter);
        }
        for node in self.topology.nodes() {
            renderer.check(node, settings)?;
        }

        let nodes_dir = create_nodes_dir(&settings.data_root, SystemTime::now())?;
        info!(dir = %nodes_dir.display(), nodes = self.topology.len(), "configuring network");

        let identities = identity::discover(&self.topology, &renderer).await?;
        let lines = identity::network_lines(&self.topology, &renderer, &identities)?;
        renderer.set_network_var("authorities", lines.authorities);
        renderer.set_network_var("bridges", lines.bridges);

        let rendered = self
            .topology
            .nodes()
            .iter()
            .map(|node| renderer.render(node, settings))
            .collect::<chutney_template::Result<Vec<_>>>()?;
        info!(configs = rendered.len(), "network configured");
        Ok(rendered)
    }

    /// Start the selected nodes, phase by phase.
    pub async fn start(&self) -> Result<()> {
        let specs = self.specs();
        info!(nodes = specs.len(), "starting nodes");
        self.supervisor.start_all(&specs).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<Vec<StopOutcome>> {
        let specs = self.specs();
        info!(nodes = specs.len(), "stopping nodes");
        Ok(self.supervisor.stop_all(&specs).await?)
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Report each selected node and count the running ones.
    pub async fn status(&self) -> Result<NetworkStatus> {
        let specs = self.specs();
        let mut running = 0;
        for spec in &specs {
            match self.supervisor.status(spec).await? {
                NodeStatus::Running(pid) => {
                    running += 1;
                    info!(nick = %spec.nick, pid, "running");
                }
                NodeStatus::Exited(status) => info!(nick = %spec.nick, %status, "exited"),
                NodeStatus::NotStarted => info!(nick = %spec.nick, "stopped"),
            }
        }
        Ok(NetworkStatus {
            running,
            expected: specs.len(),
        })
    }

    /// Ask running nodes to reload their configuration. Returns how many
    /// were signalled.
    pub async fn hup(&self) -> Result<usize> {
        let mut signalled = 0;
        for spec in &self.specs() {
            if self.supervisor.signal(spec, SignalKind::Reload).await? {
                info!(nick = %spec.nick, "sent SIGHUP");
                signalled += 1;
            } else {
                info!(nick = %spec.nick, "not running");
            }
        }
        Ok(signalled)
    }

    /// Wait until the network converges. Gives up after the bootstrap budget
    /// or as soon as a node dies, leaving every process running.
    pub async fn wait_for_bootstrap(&self) -> Result<ConvergenceState> {
        let source: Arc<dyn ArtifactSource> = Arc::new(FsArtifactSource::new(self.settings().clone()));
        self.wait_with_source(source).await
    }

    /// [`Network::wait_for_bootstrap`] over an arbitrary artifact source.
    pub async fn wait_with_source(&self, source: Arc<dyn ArtifactSource>) -> Result<ConvergenceState> {
        let mut monitor = BootstrapMonitor::new(self.topology.clone());
        let probe = SupervisorProbe {
            supervisor: &self.supervisor,
            settings: self.settings(),
        };
        let legacy = tools::daemon_version(&self.settings().daemon)
            .await
            .is_some_and(|v| tools::is_legacy_version(&v));
        if legacy {
            info!("daemon predates 0.4, settling for an extra voting interval");
        }
        let opts = WaitOptions::for_topology(&self.topology).with_legacy_daemon(legacy);
        Ok(monitor.wait(source, &probe, &opts).await?)
    }

    /// Onion addresses published by the hidden-service nodes so far.
    pub fn onion_hostnames(&self) -> Result<BTreeMap<NodeId, String>> {
        let mut onions = BTreeMap::new();
        for node in self.topology.nodes().iter().filter(|n| n.roles.hidden_service) {
            let path = self.topology.layout(node).onion_hostname();
            match fs::read_to_string(&path) {
                Ok(text) => {
                    onions.insert(node.id, text.trim().to_string());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(nick = %node.nick(), path = %path.display(), "no onion hostname yet");
                }
                Err(e) => return Err(Error::io(path, e)),
            }
        }
        Ok(onions)
    }

    /// Send traffic through the network, retrying failed runs until the
    /// verification budget is spent.
    pub async fn verify(&self) -> Result<RoundReport> {
        let onions = self.onion_hostnames()?;
        let engine = TrafficEngine::for_topology(&self.topology, &onions)?;
        let timing = &self.settings().timing;
        let report = verify_with_budget(timing.verify_timeout, timing.verify_retry_pause, |try_no| {
            debug!(try_no, streams = engine.plan().streams.len(), "traffic run");
            engine.run()
        })
        .await?;
        Ok(report)
    }

    /// Configure, start, wait, verify, idle and stop.
    ///
    /// Whatever stage fails, daemons are stopped before returning unless the
    /// network is meant to be left running; node directories stay on disk.
    pub async fn test_network(&self, run: RunOptions) -> Result<()> {
        self.configure().await?;
        let outcome = self.run_started(run).await;
        let leave_running = !run.stop || self.settings().timing.leave_running;
        if leave_running {
            info!("leaving network running");
        } else if let Err(e) = self.stop().await {
            warn!(error = %e, "stopping network failed");
            return outcome.and(Err(e));
        }
        outcome
    }

    async fn run_started(&self, run: RunOptions) -> Result<()> {
        self.start().await?;
        if !run.wait {
            return Ok(());
        }
        self.wait_for_bootstrap().await?;
        if run.verify {
            let report = self.verify().await?;
            info!(streams = report.streams.len(), "verification succeeded");
        }
        let idle = self.settings().timing.stop_idle;
        if !idle.is_zero() {
            info!(secs = idle.as_secs(), "idling before shutdown");
            sleep(idle).await;
        }
        Ok(())
    }
}

/// Reports nodes whose daemon the supervisor saw exit.
struct SupervisorProbe<'s> {
    supervisor: &'s Supervisor,
    settings: &'s NetworkSettings,
}

impl LivenessProbe for SupervisorProbe<'_> {
    fn exited<'a>(&'a self, nodes: &'a [Node]) -> BoxFuture<'a, Vec<(NodeId, String)>> {
        async move {
            let mut exited = Vec::new();
            for node in nodes {
                let spec = LaunchSpec::for_node(node, self.settings);
                match self.supervisor.status(&spec).await {
                    Ok(NodeStatus::Exited(status)) => exited.push((node.id, status.to_string())),
                    Ok(_) => {}
                    Err(e) => warn!(nick = %spec.nick, error = %e, "cannot check node"),
                }
            }
            exited
        }
        .boxed()
    }
}
