//! Declarative network descriptions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Result, TopologyError};
use crate::node::{AddressFamily, Roles};

/// A host capability a network needs in order to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    /// Nodes listen on IPv6 addresses.
    Ipv6,
}

/// One role class with a replication count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    /// Identifier shared by all replicas; appears in nicknames and dir names.
    pub tag: String,
    /// Number of replicas. Must be positive.
    #[serde(default = "default_count")]
    pub count: i64,
    #[serde(flatten)]
    pub roles: Roles,
    /// Template name, resolved against the template search path.
    pub template: String,
    #[serde(default = "default_phase")]
    pub launch_phase: u32,
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub family: AddressFamily,
    /// Values bound for every replica of this template.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

fn default_count() -> i64 {
    1
}

fn default_phase() -> u32 {
    1
}

impl RoleTemplate {
    pub fn new(tag: impl Into<String>, count: i64, template: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            count,
            roles: Roles::default(),
            template: template.into(),
            launch_phase: 1,
            binary: None,
            family: AddressFamily::V4,
            vars: BTreeMap::new(),
        }
    }

    pub fn with_roles(mut self, roles: Roles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_phase(mut self, phase: u32) -> Self {
        self.launch_phase = phase;
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Authorities.
    pub fn authority(tag: &str, count: i64) -> Self {
        Self::new(tag, count, "authority").with_roles(Roles {
            authority: true,
            ..Default::default()
        })
    }

    /// Non-exit relays.
    pub fn relay(tag: &str, count: i64) -> Self {
        Self::new(tag, count, "relay-non-exit").with_roles(Roles {
            relay: true,
            ..Default::default()
        })
    }

    /// Exit relays.
    pub fn exit(tag: &str, count: i64) -> Self {
        Self::new(tag, count, "relay").with_roles(Roles {
            exit: true,
            ..Default::default()
        })
    }

    /// Plain clients.
    pub fn client(tag: &str, count: i64) -> Self {
        Self::new(tag, count, "client").with_roles(Roles {
            client: true,
            ..Default::default()
        })
    }
}

/// Ordered list of role templates plus host requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    pub nodes: Vec<RoleTemplate>,
}

impl NetworkDescription {
    pub fn new(nodes: Vec<RoleTemplate>) -> Self {
        Self {
            requirements: Vec::new(),
            nodes,
        }
    }

    /// Parse a JSON description.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TopologyError::Parse(e.to_string()))
    }

    /// Whether any node or requirement needs IPv6.
    pub fn needs_ipv6(&self) -> bool {
        self.requirements.contains(&Requirement::Ipv6)
            || self.nodes.iter().any(|t| t.family.needs_v6())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_description() {
        let desc = NetworkDescription::from_json(
            r#"{
                "requirements": ["ipv6"],
                "nodes": [
                    {"tag": "a", "count": 3, "authority": true, "template": "authority"},
                    {"tag": "r", "count": 2, "exit": true, "template": "relay", "family": "dual"},
                    {"tag": "c", "client": true, "template": "client", "launch_phase": 2}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(desc.requirements, vec![Requirement::Ipv6]);
        assert_eq!(desc.nodes.len(), 3);
        assert!(desc.nodes[0].roles.authority);
        assert_eq!(desc.nodes[1].family, AddressFamily::Dual);
        assert_eq!(desc.nodes[2].count, 1);
        assert_eq!(desc.nodes[2].launch_phase, 2);
        assert!(desc.needs_ipv6());
    }

    #[test]
    fn parse_error_is_reported() {
        let err = NetworkDescription::from_json("{\"nodes\": 3}").unwrap_err();
        assert!(matches!(err, TopologyError::Parse(_)));
    }
}
