//! End-to-end behaviour of the orchestrator against fake daemons.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chutney::{run_attempts, Error, Network, Settings};
use chutney_bootstrap::{ArtifactSource, MonitorError, NodeSnapshot};
use chutney_supervisor::{ExitStatus, LaunchSpec, Liveness, ProcessBackend, SignalKind, StopOutcome};
use chutney_topology::{expand, NetworkDescription, NetworkSettings, Node, RoleTemplate, Topology};
use chutney_traffic::TrafficError;

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    alive: HashMap<u32, bool>,
    pids: HashMap<String, u32>,
    signals: Vec<(String, SignalKind)>,
}

/// Daemons that live until told otherwise.
#[derive(Default)]
struct FakeDaemons {
    state: Mutex<FakeState>,
}

impl FakeDaemons {
    fn crash(&self, nick: &str) {
        let mut s = self.state.lock().unwrap();
        let pid = s.pids[nick];
        s.alive.insert(pid, false);
    }

    fn launched(&self) -> usize {
        self.state.lock().unwrap().pids.len()
    }

    fn signals(&self, kind: SignalKind) -> usize {
        let s = self.state.lock().unwrap();
        s.signals.iter().filter(|(_, k)| *k == kind).count()
    }
}

impl ProcessBackend for FakeDaemons {
    fn launch(&self, spec: &LaunchSpec) -> chutney_supervisor::Result<u32> {
        let mut s = self.state.lock().unwrap();
        s.next_pid += 1;
        let pid = 4000 + s.next_pid;
        s.alive.insert(pid, true);
        s.pids.insert(spec.nick.clone(), pid);
        Ok(pid)
    }

    fn signal(&self, spec: &LaunchSpec, pid: u32, kind: SignalKind) -> chutney_supervisor::Result<()> {
        let mut s = self.state.lock().unwrap();
        s.signals.push((spec.nick.clone(), kind));
        if kind != SignalKind::Reload {
            s.alive.insert(pid, false);
        }
        Ok(())
    }

    fn probe(&self, pid: u32) -> Liveness {
        match self.state.lock().unwrap().alive.get(&pid) {
            Some(true) => Liveness::Alive,
            Some(false) => Liveness::Exited(ExitStatus::Code(1)),
            None => Liveness::Gone,
        }
    }
}

/// Nothing ever shows up on disk.
struct Silent;

impl ArtifactSource for Silent {
    fn read(&self, node: &Node) -> chutney_bootstrap::Result<NodeSnapshot> {
        Ok(NodeSnapshot::empty(node.id))
    }
}

/// Three authorities, one exit, one client, with node dirs in place.
fn basic_network(root: &std::path::Path) -> Topology {
    let settings = NetworkSettings {
        data_root: root.to_path_buf(),
        ..Default::default()
    };
    let desc = NetworkDescription::new(vec![
        RoleTemplate::authority("a", 3),
        RoleTemplate::exit("r", 1),
        RoleTemplate::client("c", 1),
    ]);
    let topology = expand(&desc, settings).unwrap();
    for node in topology.nodes() {
        std::fs::create_dir_all(topology.layout(node).dir).unwrap();
    }
    topology
}

fn verification_failure() -> Error {
    Error::from(TrafficError::BudgetExhausted {
        tries: 12,
        budget: Duration::from_secs(60),
        last: Box::new(TrafficError::StreamTimeout {
            stream: "test004c->exit#0".to_string(),
            after: Duration::from_secs(10),
        }),
    })
}

#[tokio::test(start_paused = true)]
async fn two_allowed_failures_give_three_attempts() {
    let attempts = AtomicU32::new(0);
    let result = run_attempts(2, |n| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 3 {
                Err(verification_failure())
            } else {
                Ok(n)
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn spent_budget_returns_the_last_failure() {
    let attempts = AtomicU32::new(0);
    let result: chutney::Result<()> = run_attempts(1, |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(verification_failure()) }
    })
    .await;
    assert!(matches!(result, Err(Error::Traffic(TrafficError::BudgetExhausted { .. }))));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn unsupported_and_fatal_errors_are_not_retried() {
    let attempts = AtomicU32::new(0);
    let result: chutney::Result<()> = run_attempts(5, |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async {
            Err(Error::Unsupported {
                reasons: vec!["IPv6 is required but not available".into()],
            })
        }
    })
    .await;
    assert_eq!(result.unwrap_err().exit_code(), 77);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    attempts.store(0, Ordering::SeqCst);
    let result: chutney::Result<()> = run_attempts(5, |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(Error::from(chutney_topology::TopologyError::NoAuthorities)) }
    })
    .await;
    assert_eq!(result.unwrap_err().exit_code(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_host_skips_before_any_daemon_starts() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::from_vars([
        ("CHUTNEY_DATA_DIR", dir.path().display().to_string()),
        ("CHUTNEY_TOR", "/nonexistent/chutney/tor".to_string()),
        ("CHUTNEY_ALLOW_FAILURES", "3".to_string()),
    ])
    .unwrap();
    let desc = NetworkDescription::new(vec![RoleTemplate::authority("a", 3), RoleTemplate::client("c", 1)]);
    let daemons = Arc::new(FakeDaemons::default());

    let err = tokio_test::assert_err!(chutney::test_network(&desc, &settings, daemons.clone()).await);
    assert_eq!(err.exit_code(), chutney::EXIT_UNSUPPORTED);
    assert_eq!(daemons.launched(), 0);
    assert!(!dir.path().join("nodes").exists());
}

#[tokio::test(start_paused = true)]
async fn start_status_hup_stop() {
    let dir = tempfile::tempdir().unwrap();
    let daemons = Arc::new(FakeDaemons::default());
    let network = Network::with_backend(basic_network(dir.path()), daemons.clone());

    let status = network.status().await.unwrap();
    assert_eq!((status.running, status.expected), (0, 5));

    tokio_test::assert_ok!(network.start().await);
    assert!(network.status().await.unwrap().all_running());
    assert_eq!(daemons.launched(), 5);

    assert_eq!(network.hup().await.unwrap(), 5);
    assert_eq!(daemons.signals(SignalKind::Reload), 5);
    assert!(network.status().await.unwrap().all_running());

    let outcomes = network.stop().await.unwrap();
    assert!(outcomes.iter().all(|o| matches!(o, StopOutcome::Stopped { signals: 1, .. })));
    assert_eq!(network.status().await.unwrap().running, 0);

    let again = network.stop().await.unwrap();
    assert!(again.iter().all(|o| *o == StopOutcome::NotRunning));
    assert_eq!(daemons.signals(SignalKind::Interrupt), 5);
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let daemons = Arc::new(FakeDaemons::default());
    let network = Network::with_backend(basic_network(dir.path()), daemons.clone());

    let outcomes = network.stop().await.unwrap();
    assert_eq!(outcomes, vec![StopOutcome::NotRunning; 5]);
    assert!(daemons.state.lock().unwrap().signals.is_empty());
    let leftovers: Vec<PathBuf> = std::fs::read_dir(dir.path().join("nodes").join("000a"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn crash_during_bootstrap_is_reported_with_its_node() {
    let dir = tempfile::tempdir().unwrap();
    let daemons = Arc::new(FakeDaemons::default());
    let network = Network::with_backend(basic_network(dir.path()), daemons.clone());

    network.start().await.unwrap();
    daemons.crash("test003r");

    match network.wait_with_source(Arc::new(Silent)).await {
        Err(Error::Monitor(MonitorError::NodeCrashed { nick, status, .. })) => {
            assert_eq!(nick, "test003r");
            assert_eq!(status, "exit code 1");
        }
        other => panic!("unexpected {other:?}"),
    }
    // Giving up leaves the rest of the network running.
    assert_eq!(network.status().await.unwrap().running, 4);
}

#[test]
fn phases_are_listed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let settings = NetworkSettings {
        data_root: dir.path().to_path_buf(),
        ..Default::default()
    };
    let desc = NetworkDescription::new(vec![
        RoleTemplate::authority("a", 3),
        RoleTemplate::client("c", 1).with_phase(3),
        RoleTemplate::exit("r", 1).with_phase(2),
    ]);
    let network = Network::with_backend(expand(&desc, settings).unwrap(), Arc::new(FakeDaemons::default()));
    assert_eq!(network.phases().launch, vec![1, 2, 3]);
}
