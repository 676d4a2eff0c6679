//! Can this host run a given network at all?

use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use chutney_topology::Topology;

use crate::error::{Error, Result};
use crate::tools;

const IPV6_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether a TCP connection over the IPv6 loopback works.
pub fn ipv6_supported() -> bool {
    let attempt = || -> std::io::Result<()> {
        let listener = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
        listener.bind(&SocketAddr::from((Ipv6Addr::LOCALHOST, 0)).into())?;
        listener.listen(128)?;
        let addr = listener.local_addr()?;
        let client = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
        client.connect_timeout(&addr, IPV6_CONNECT_TIMEOUT)
    };
    match attempt() {
        Ok(()) => true,
        Err(e) => {
            info!(error = %e, "IPv6 loopback unavailable");
            false
        }
    }
}

/// Collect every reason the network cannot run here. An empty list means
/// it is supported; otherwise the error maps to the "skipped" exit code.
pub async fn check_supported(topology: &Topology) -> Result<()> {
    let settings = topology.settings();
    let mut reasons = Vec::new();

    if topology.needs_ipv6() && !ipv6_supported() {
        reasons.push("IPv6 is required but not available".to_string());
    }

    let daemon_of = |binary: Option<&Path>| binary.unwrap_or(settings.daemon.as_path()).to_path_buf();
    let daemons: BTreeSet<_> = topology.nodes().iter().map(|n| daemon_of(n.binary.as_deref())).collect();
    for daemon in &daemons {
        if !tools::binary_exists(daemon, "--version").await {
            reasons.push(format!("no binary found for {}", daemon.display()));
        }
    }

    let authority_daemons: BTreeSet<_> = topology
        .nodes()
        .iter()
        .filter(|n| n.roles.authority)
        .map(|n| daemon_of(n.binary.as_deref()))
        .collect();
    for daemon in &authority_daemons {
        if !tools::has_module(daemon, "dirauth").await {
            reasons.push(format!("no dirauth support in {}", daemon.display()));
        }
    }
    if !authority_daemons.is_empty() && !tools::binary_exists(&settings.gencert, "--help").await {
        reasons.push(format!("no binary found for {}", settings.gencert.display()));
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        for reason in &reasons {
            warn!(%reason, "network not supported");
        }
        Err(Error::Unsupported { reasons })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chutney_topology::{expand, NetworkDescription, NetworkSettings, RoleTemplate};
    use std::path::PathBuf;

    #[tokio::test]
    async fn missing_binaries_make_the_network_unsupported() {
        let settings = NetworkSettings {
            daemon: PathBuf::from("/nonexistent/tor"),
            gencert: PathBuf::from("/nonexistent/tor-gencert"),
            ..Default::default()
        };
        let desc = NetworkDescription::new(vec![RoleTemplate::authority("a", 3), RoleTemplate::client("c", 1)]);
        let topology = expand(&desc, settings).unwrap();

        let err = check_supported(&topology).await.unwrap_err();
        assert_eq!(err.exit_code(), 77);
        match err {
            Error::Unsupported { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].contains("/nonexistent/tor"));
                assert!(reasons[1].contains("tor-gencert"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
