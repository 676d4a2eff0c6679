//! Global settings shared by every node of a network.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::NODES_DIR;

/// Base ports. A node's port is `base + id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBases {
    pub or_port: u16,
    pub dir_port: u16,
    pub control_port: u16,
    pub socks_port: u16,
    pub extor_port: u16,
    pub pt_port: u16,
}

impl PortBases {
    /// Most nodes whose derived ports stay below the next base and inside
    /// the port range.
    pub fn capacity(&self) -> usize {
        let mut bases = [
            self.or_port,
            self.dir_port,
            self.control_port,
            self.socks_port,
            self.extor_port,
            self.pt_port,
        ];
        bases.sort_unstable();
        let top = usize::from(u16::MAX - bases[bases.len() - 1]) + 1;
        bases
            .windows(2)
            .map(|w| usize::from(w[1] - w[0]))
            .fold(top, usize::min)
    }
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            or_port: 5000,
            dir_port: 7000,
            control_port: 8000,
            socks_port: 9000,
            extor_port: 9500,
            pt_port: 9900,
        }
    }
}

/// Time budgets and poll cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Total wait for bootstrap convergence.
    pub bootstrap_timeout: Duration,
    /// Total budget for traffic verification, retries included.
    pub verify_timeout: Duration,
    /// Idle time between a successful verify and shutdown.
    pub stop_idle: Duration,
    /// Minimum time between the start of the wait and its success.
    pub min_start: Duration,
    /// Monitor poll interval.
    pub poll_interval: Duration,
    /// Interval between status reports during the wait.
    pub report_interval: Duration,
    /// Wait after each stop signal before escalating.
    pub stop_grace: Duration,
    /// Pause between verification tries.
    pub verify_retry_pause: Duration,
    /// A negative time budget was configured: leave the network running and
    /// do not link daemons to the controlling process.
    pub leave_running: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            bootstrap_timeout: Duration::from_secs(60),
            verify_timeout: Duration::from_secs(60),
            stop_idle: Duration::ZERO,
            min_start: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
            report_interval: Duration::from_secs(10),
            stop_grace: Duration::from_secs(15),
            verify_retry_pause: Duration::from_secs(5),
            leave_running: false,
        }
    }
}

/// Traffic round parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSettings {
    pub rounds: u32,
    /// Simultaneous connections per client per round.
    pub connections: u32,
    /// Payload size in bytes, per connection.
    pub data_bytes: u64,
    /// Every client connects to each onion service, not just one.
    pub hs_multi_client: bool,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            rounds: 1,
            connections: 1,
            data_bytes: 10 * 1024,
            hs_multi_client: false,
        }
    }
}

/// Where the daemons resolve exit DNS queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsMode {
    /// Leave the daemon's own default in place.
    DaemonDefault,
    /// Use a specific resolver configuration file.
    File(PathBuf),
    /// No resolution at all.
    Disabled,
}

impl DnsMode {
    /// Resolver file to configure, or `None` for the daemon default.
    pub fn resolv_conf(&self) -> Option<PathBuf> {
        match self {
            DnsMode::DaemonDefault => None,
            DnsMode::File(path) if path.exists() => Some(path.clone()),
            DnsMode::File(_) | DnsMode::Disabled => Some(PathBuf::from("/dev/null")),
        }
    }
}

impl Default for DnsMode {
    fn default() -> Self {
        DnsMode::File(PathBuf::from("/etc/resolv.conf"))
    }
}

/// Network-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Root directory for all per-node state.
    pub data_root: PathBuf,
    /// Directories searched for templates, in order.
    pub template_path: Vec<PathBuf>,
    /// Default daemon binary.
    pub daemon: PathBuf,
    /// Authority certificate generator.
    pub gencert: PathBuf,
    pub listen_v4: String,
    pub listen_v6: Option<String>,
    pub ports: PortBases,
    pub timing: Timing,
    pub traffic: TrafficSettings,
    pub dns: DnsMode,
    pub sandbox: bool,
    /// Retries the attempt loop may spend.
    pub allowed_failures: u32,
    /// Process the daemons exit with. `None` leaves them unlinked.
    pub controlling_pid: Option<u32>,
    /// Only act on nodes in this phase.
    pub launch_phase: Option<u32>,
    /// Template overrides supplied through the environment.
    pub env_vars: BTreeMap<String, String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("net"),
            template_path: vec![PathBuf::from("torrc_templates")],
            daemon: PathBuf::from("tor"),
            gencert: PathBuf::from("tor-gencert"),
            listen_v4: "127.0.0.1".to_string(),
            listen_v6: None,
            ports: PortBases::default(),
            timing: Timing::default(),
            traffic: TrafficSettings::default(),
            dns: DnsMode::default(),
            sandbox: cfg!(target_os = "linux"),
            allowed_failures: 0,
            controlling_pid: None,
            launch_phase: None,
            env_vars: BTreeMap::new(),
        }
    }
}

impl NetworkSettings {
    /// Directory (or symlink) holding the per-node directories.
    pub fn nodes_dir(&self) -> PathBuf {
        self.data_root.join(NODES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_modes() {
        assert_eq!(DnsMode::DaemonDefault.resolv_conf(), None);
        assert_eq!(
            DnsMode::Disabled.resolv_conf(),
            Some(PathBuf::from("/dev/null"))
        );
        assert_eq!(
            DnsMode::File(PathBuf::from("/nonexistent/resolv.conf")).resolv_conf(),
            Some(PathBuf::from("/dev/null"))
        );
    }

    #[test]
    fn port_capacity_is_the_smallest_gap() {
        assert_eq!(PortBases::default().capacity(), 400);
        let high = PortBases {
            pt_port: 65530,
            ..Default::default()
        };
        assert_eq!(high.capacity(), 6);
        let shared = PortBases {
            socks_port: 8000,
            ..Default::default()
        };
        assert_eq!(shared.capacity(), 0);
    }

    #[test]
    fn nodes_dir_under_root() {
        let settings = NetworkSettings {
            data_root: PathBuf::from("/tmp/net"),
            ..Default::default()
        };
        assert_eq!(settings.nodes_dir(), PathBuf::from("/tmp/net/nodes"));
    }
}
