//! Concrete node records produced by expansion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::NICK_PREFIX;

/// Global node number. Total order over the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Role flags of a node. Flags are not mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roles {
    pub authority: bool,
    pub bridge_authority: bool,
    pub relay: bool,
    pub exit: bool,
    pub bridge: bool,
    pub bridge_client: bool,
    pub client: bool,
    pub hidden_service: bool,
}

impl Roles {
    /// Fill in the flags implied by other flags.
    ///
    /// Bridge authorities are authorities; authorities, exits and bridges all
    /// run a relay.
    pub fn normalized(mut self) -> Self {
        if self.bridge_authority {
            self.authority = true;
        }
        if self.authority || self.exit || self.bridge {
            self.relay = true;
        }
        self
    }

    /// Votes on the public consensus.
    pub fn is_consensus_authority(&self) -> bool {
        self.authority && !self.bridge_authority
    }

    /// Serves directory documents (authorities, relays, exits, bridges).
    pub fn is_dir_server(&self) -> bool {
        self.relay
    }

    /// Published in the public consensus.
    pub fn is_consensus_relay(&self) -> bool {
        self.relay && !self.bridge
    }

    /// Publishes a descriptor somewhere (consensus relays and bridges).
    pub fn publishes_descriptor(&self) -> bool {
        self.relay
    }

    /// Originates traffic through a local proxy port. Onion services only
    /// receive traffic, even when they also carry the client flag.
    pub fn is_traffic_client(&self) -> bool {
        (self.client || self.bridge_client) && !self.hidden_service
    }

    /// A client that is neither a relay nor a bridge client.
    pub fn is_plain_client(&self) -> bool {
        !self.relay && !self.bridge_client
    }

    /// Short human label used in logs.
    pub fn label(&self) -> &'static str {
        if self.bridge_authority {
            "bridge authority"
        } else if self.authority {
            "authority"
        } else if self.bridge {
            "bridge"
        } else if self.exit {
            "exit"
        } else if self.relay {
            "relay"
        } else if self.hidden_service {
            "hidden service"
        } else if self.bridge_client {
            "bridge client"
        } else {
            "client"
        }
    }
}

/// Which address families a node listens on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
    Dual,
}

impl AddressFamily {
    /// Needs an IPv6 listen address.
    pub fn needs_v6(self) -> bool {
        matches!(self, AddressFamily::V6 | AddressFamily::Dual)
    }
}

/// A single daemon instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Global node number.
    pub id: NodeId,
    /// Role class identifier shared by replicas.
    pub tag: String,
    /// Replica index within the tag (0-based, strictly increasing).
    pub instance: usize,
    /// Role flags (normalized).
    pub roles: Roles,
    /// Address families to listen on.
    pub family: AddressFamily,
    /// Template name, resolved against the template search path.
    pub template: String,
    /// Start ordering, 1-based.
    pub launch_phase: u32,
    /// Alternate daemon binary.
    pub binary: Option<PathBuf>,
    /// Template variables fixed by the description for this node.
    pub vars: BTreeMap<String, String>,
}

impl Node {
    /// Daemon nickname, e.g. `test003r`.
    pub fn nick(&self) -> String {
        format!("{}{:03}{}", NICK_PREFIX, self.id.0, self.tag)
    }

    /// Working directory name under the nodes directory, e.g. `003r`.
    pub fn dir_name(&self) -> String {
        format!("{:03}{}", self.id.0, self.tag)
    }

    /// Port derived from a base port, `None` past the end of the range.
    pub fn checked_port(&self, base: u16) -> Option<u16> {
        u16::try_from(self.id.0).ok().and_then(|id| base.checked_add(id))
    }

    /// Port derived from a base port. [`crate::expand`] rejects topologies
    /// whose ports would not fit, so this only falls back to 0 for nodes
    /// built by hand.
    pub fn port(&self, base: u16) -> u16 {
        self.checked_port(base).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: usize, tag: &str) -> Node {
        Node {
            id: NodeId(id),
            tag: tag.to_string(),
            instance: 0,
            roles: Roles::default(),
            family: AddressFamily::V4,
            template: "client".to_string(),
            launch_phase: 1,
            binary: None,
            vars: BTreeMap::new(),
        }
    }

    #[test]
    fn derived_names() {
        let n = node(7, "c");
        assert_eq!(n.nick(), "test007c");
        assert_eq!(n.dir_name(), "007c");
        assert_eq!(n.port(9000), 9007);
        assert_eq!(n.id.to_string(), "007");
    }

    #[test]
    fn ports_past_the_range_are_refused() {
        assert_eq!(node(7, "c").checked_port(65528), Some(65535));
        assert_eq!(node(8, "c").checked_port(65528), None);
        assert_eq!(node(70_000, "c").checked_port(0), None);
    }

    #[test]
    fn roles_normalize() {
        let r = Roles {
            bridge_authority: true,
            ..Default::default()
        }
        .normalized();
        assert!(r.authority && r.relay);
        assert!(!r.is_consensus_authority());

        let exit = Roles {
            exit: true,
            ..Default::default()
        }
        .normalized();
        assert!(exit.is_consensus_relay());

        let bridge = Roles {
            bridge: true,
            ..Default::default()
        }
        .normalized();
        assert!(bridge.is_dir_server());
        assert!(!bridge.is_consensus_relay());
    }

    #[test]
    fn client_kinds() {
        let c = Roles {
            client: true,
            ..Default::default()
        };
        assert!(c.is_plain_client());
        assert!(c.is_traffic_client());

        let bc = Roles {
            bridge_client: true,
            ..Default::default()
        };
        assert!(!bc.is_plain_client());
        assert!(bc.is_traffic_client());
        assert_eq!(bc.label(), "bridge client");

        let hs = Roles {
            client: true,
            hidden_service: true,
            ..Default::default()
        };
        assert!(!hs.is_traffic_client());
    }
}
