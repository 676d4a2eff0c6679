//! Which streams a round opens: client to exit, client to onion service.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use chutney_topology::{Node, NodeId, Topology};

use crate::echo::LISTEN_PORT;
use crate::error::{Result, TrafficError};

/// Virtual port onion services map to the echo listener.
pub const HS_PORT: u16 = 5858;

/// Daemons a client-to-exit stream passes through, the client included.
pub const EXIT_PATH_NODES: u64 = 4;
/// Daemons a client-to-onion-service stream passes through.
pub const ONION_PATH_NODES: u64 = 8;

/// Where a stream asks its proxy to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The echo listener, reached through any exit.
    Exit { host: String, port: u16 },
    /// An onion service that forwards to the echo listener.
    Onion { service: NodeId, hostname: String, port: u16 },
}

impl Target {
    pub fn host(&self) -> &str {
        match self {
            Target::Exit { host, .. } => host,
            Target::Onion { hostname, .. } => hostname,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Target::Exit { port, .. } | Target::Onion { port, .. } => *port,
        }
    }

    pub fn path_nodes(&self) -> u64 {
        match self {
            Target::Exit { .. } => EXIT_PATH_NODES,
            Target::Onion { .. } => ONION_PATH_NODES,
        }
    }
}

/// One stream of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub client: NodeId,
    /// The client's SOCKS port.
    pub proxy: SocketAddr,
    pub target: Target,
}

/// All streams of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficPlan {
    pub listen: SocketAddr,
    pub streams: Vec<StreamSpec>,
}

impl TrafficPlan {
    /// Every traffic client opens `connections` streams to the echo listener
    /// if the network has an exit. Onion services are reached by the first
    /// client only, or by every client with `hs_multi_client`.
    ///
    /// `onions` maps each onion service node to its hostname.
    pub fn build(topology: &Topology, onions: &BTreeMap<NodeId, String>) -> Result<Self> {
        let settings = topology.settings();
        let ip: IpAddr = settings
            .listen_v4
            .parse()
            .map_err(|_| TrafficError::InvalidAddress {
                addr: settings.listen_v4.clone(),
            })?;
        let listen = SocketAddr::new(ip, LISTEN_PORT);

        let clients: Vec<&Node> = topology
            .nodes()
            .iter()
            .filter(|n| n.roles.is_traffic_client())
            .collect();
        let has_exit = topology.nodes().iter().any(|n| n.roles.exit);
        let services: Vec<&Node> = topology
            .nodes()
            .iter()
            .filter(|n| n.roles.hidden_service)
            .collect();

        if clients.is_empty() {
            return Err(TrafficError::NoClients);
        }
        if !has_exit && services.is_empty() {
            return Err(TrafficError::NoTargets);
        }

        let connections = settings.traffic.connections.max(1);
        let proxy = |n: &Node| SocketAddr::new(ip, n.port(settings.ports.socks_port));
        let mut streams = Vec::new();

        if has_exit {
            for client in &clients {
                for k in 0..connections {
                    streams.push(StreamSpec {
                        name: format!("{}->exit#{k}", client.nick()),
                        client: client.id,
                        proxy: proxy(client),
                        target: Target::Exit {
                            host: ip.to_string(),
                            port: LISTEN_PORT,
                        },
                    });
                }
            }
        }

        let onion_clients = if settings.traffic.hs_multi_client {
            &clients[..]
        } else {
            &clients[..1]
        };
        for service in &services {
            let hostname = onions
                .get(&service.id)
                .ok_or_else(|| TrafficError::NoOnionHostname {
                    nick: service.nick(),
                })?;
            for client in onion_clients {
                for k in 0..connections {
                    streams.push(StreamSpec {
                        name: format!("{}->{}#{k}", client.nick(), service.nick()),
                        client: client.id,
                        proxy: proxy(client),
                        target: Target::Onion {
                            service: service.id,
                            hostname: hostname.clone(),
                            port: HS_PORT,
                        },
                    });
                }
            }
        }

        Ok(Self { listen, streams })
    }

    /// Daemons traversed summed over all streams, a lower bound on the data
    /// the network relays per payload byte.
    pub fn path_nodes(&self) -> u64 {
        self.streams.iter().map(|s| s.target.path_nodes()).sum()
    }
}
