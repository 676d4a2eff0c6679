//! Expansion of a description into an ordered, validated topology.

use std::collections::{BTreeMap, HashMap};

use crate::description::{NetworkDescription, Requirement};
use crate::error::{Result, TopologyError};
use crate::layout::NodeLayout;
use crate::node::{Node, NodeId};
use crate::settings::NetworkSettings;
use crate::NICK_PREFIX;

/// Longest nickname the daemon accepts.
const MAX_NICK_LEN: usize = 19;

/// Ordered nodes plus the settings they were expanded under.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    settings: NetworkSettings,
    requirements: Vec<Requirement>,
}

impl Topology {
    /// All nodes in id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn layout(&self, node: &Node) -> NodeLayout {
        NodeLayout::new(&self.settings, node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes grouped by ascending launch phase.
    pub fn phases(&self) -> BTreeMap<u32, Vec<&Node>> {
        let mut phases: BTreeMap<u32, Vec<&Node>> = BTreeMap::new();
        for node in &self.nodes {
            phases.entry(node.launch_phase).or_default().push(node);
        }
        phases
    }

    /// Nodes selected by the configured launch phase, or all nodes.
    pub fn selected(&self) -> Vec<&Node> {
        match self.settings.launch_phase {
            Some(phase) => self
                .nodes
                .iter()
                .filter(|n| n.launch_phase == phase)
                .collect(),
            None => self.nodes.iter().collect(),
        }
    }

    /// Authorities voting on the public consensus.
    pub fn consensus_authorities(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.roles.is_consensus_authority())
    }

    pub fn bridge_authority(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.roles.bridge_authority)
    }

    pub fn bridges(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.roles.bridge)
    }

    pub fn has_bridges(&self) -> bool {
        self.nodes.iter().any(|n| n.roles.bridge)
    }

    pub fn has_hidden_services(&self) -> bool {
        self.nodes.iter().any(|n| n.roles.hidden_service)
    }

    /// Whether any node listens on IPv6.
    pub fn needs_ipv6(&self) -> bool {
        self.requirements.contains(&Requirement::Ipv6)
            || self.nodes.iter().any(|n| n.family.needs_v6())
    }

    pub fn by_nick(&self, nick: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.nick() == nick)
    }
}

/// Expand a description into concrete nodes.
///
/// Ids are assigned in one pass in description order. The function touches
/// neither the filesystem nor any process.
pub fn expand(desc: &NetworkDescription, settings: NetworkSettings) -> Result<Topology> {
    if desc.nodes.is_empty() {
        return Err(TopologyError::Empty);
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (idx, template) in desc.nodes.iter().enumerate() {
        validate_tag(&template.tag)?;
        if let Some(first) = seen.insert(template.tag.as_str(), idx) {
            return Err(TopologyError::DuplicateTag {
                tag: template.tag.clone(),
                first,
                second: idx,
            });
        }
        if template.count <= 0 {
            return Err(TopologyError::NonPositiveCount {
                tag: template.tag.clone(),
                count: template.count,
            });
        }
        if template.launch_phase == 0 {
            return Err(TopologyError::InvalidPhase {
                tag: template.tag.clone(),
                phase: template.launch_phase,
            });
        }
    }

    let total = desc
        .nodes
        .iter()
        .fold(0usize, |sum, t| sum.saturating_add(usize::try_from(t.count).unwrap_or(usize::MAX)));
    let capacity = settings.ports.capacity();
    if total > capacity {
        return Err(TopologyError::TooManyNodes { nodes: total, capacity });
    }

    let mut nodes = Vec::new();
    for template in &desc.nodes {
        let roles = template.roles.normalized();
        for instance in 0..template.count as usize {
            nodes.push(Node {
                id: NodeId(nodes.len()),
                tag: template.tag.clone(),
                instance,
                roles,
                family: template.family,
                template: template.template.clone(),
                launch_phase: template.launch_phase,
                binary: template.binary.clone(),
                vars: template.vars.clone(),
            });
        }
    }

    check_collaborators(desc, &nodes)?;

    Ok(Topology {
        nodes,
        settings,
        requirements: desc.requirements.clone(),
    })
}

fn validate_tag(tag: &str) -> Result<()> {
    let reason = if tag.is_empty() {
        Some("empty")
    } else if !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some("only ASCII letters and digits are allowed")
    } else if NICK_PREFIX.len() + 3 + tag.len() > MAX_NICK_LEN {
        Some("nickname would exceed 19 characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(TopologyError::InvalidTag {
            tag: tag.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn check_collaborators(desc: &NetworkDescription, nodes: &[Node]) -> Result<()> {
    if !nodes.iter().any(|n| n.roles.is_consensus_authority()) {
        return Err(TopologyError::NoAuthorities);
    }

    let bridge_authorities = nodes.iter().filter(|n| n.roles.bridge_authority).count();
    if nodes.iter().any(|n| n.roles.bridge) && bridge_authorities != 1 {
        return Err(TopologyError::BridgeAuthorityCount {
            found: bridge_authorities,
        });
    }

    if !nodes.iter().any(|n| n.roles.bridge) {
        if let Some(t) = desc.nodes.iter().find(|t| t.roles.bridge_client) {
            return Err(TopologyError::MissingCollaborator {
                tag: t.tag.clone(),
                role: "bridge client",
                required: "bridge",
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::RoleTemplate;
    use crate::settings::PortBases;
    use crate::node::Roles;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn basic() -> NetworkDescription {
        NetworkDescription::new(vec![
            RoleTemplate::authority("a", 3),
            RoleTemplate::exit("r", 1),
            RoleTemplate::client("c", 1),
        ])
    }

    #[test]
    fn ids_follow_description_order() {
        let topo = expand(&basic(), NetworkSettings::default()).unwrap();
        let nicks: Vec<String> = topo.nodes().iter().map(|n| n.nick()).collect();
        assert_eq!(
            nicks,
            vec!["test000a", "test001a", "test002a", "test003r", "test004c"]
        );
        assert_eq!(topo.consensus_authorities().count(), 3);
        assert_eq!(topo.by_nick("test003r").map(|n| n.instance), Some(0));
    }

    #[test]
    fn rejects_duplicate_tags() {
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            RoleTemplate::client("a", 1),
        ]);
        assert_eq!(
            expand(&desc, NetworkSettings::default()).unwrap_err(),
            TopologyError::DuplicateTag {
                tag: "a".to_string(),
                first: 0,
                second: 1
            }
        );
    }

    #[test]
    fn rejects_non_positive_counts() {
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            RoleTemplate::client("c", 0),
        ]);
        assert!(matches!(
            expand(&desc, NetworkSettings::default()),
            Err(TopologyError::NonPositiveCount { count: 0, .. })
        ));
    }

    #[test]
    fn rejects_missing_authorities() {
        let desc = NetworkDescription::new(vec![RoleTemplate::client("c", 2)]);
        assert_eq!(
            expand(&desc, NetworkSettings::default()).unwrap_err(),
            TopologyError::NoAuthorities
        );
    }

    #[test]
    fn bridge_client_needs_bridge() {
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            RoleTemplate::new("bc", 1, "bridge-client").with_roles(Roles {
                bridge_client: true,
                ..Default::default()
            }),
        ]);
        assert!(matches!(
            expand(&desc, NetworkSettings::default()),
            Err(TopologyError::MissingCollaborator {
                required: "bridge",
                ..
            })
        ));
    }

    #[test]
    fn bridges_need_one_bridge_authority() {
        let bridge = RoleTemplate::new("br", 1, "bridge").with_roles(Roles {
            bridge: true,
            ..Default::default()
        });
        let bridge_auth = |tag: &str| {
            RoleTemplate::new(tag, 1, "bridge-authority").with_roles(Roles {
                bridge_authority: true,
                ..Default::default()
            })
        };

        let none = NetworkDescription::new(vec![RoleTemplate::authority("a", 1), bridge.clone()]);
        assert_eq!(
            expand(&none, NetworkSettings::default()).unwrap_err(),
            TopologyError::BridgeAuthorityCount { found: 0 }
        );

        let two = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            bridge_auth("ba"),
            bridge_auth("bb"),
            bridge.clone(),
        ]);
        assert_eq!(
            expand(&two, NetworkSettings::default()).unwrap_err(),
            TopologyError::BridgeAuthorityCount { found: 2 }
        );

        let ok = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            bridge_auth("ba"),
            bridge,
        ]);
        let topo = expand(&ok, NetworkSettings::default()).unwrap();
        assert!(topo.has_bridges());
        assert_eq!(topo.bridge_authority().map(|n| n.tag.as_str()), Some("ba"));
    }

    #[test]
    fn rejects_more_nodes_than_ports() {
        let desc = NetworkDescription::new(vec![RoleTemplate::authority("a", 3), RoleTemplate::client("c", 398)]);
        assert_eq!(
            expand(&desc, NetworkSettings::default()).unwrap_err(),
            TopologyError::TooManyNodes {
                nodes: 401,
                capacity: 400
            }
        );

        let settings = NetworkSettings {
            ports: PortBases {
                pt_port: 65533,
                ..Default::default()
            },
            ..Default::default()
        };
        let desc = NetworkDescription::new(vec![RoleTemplate::authority("a", 3)]);
        let topo = expand(&desc, settings.clone()).unwrap();
        let last = &topo.nodes()[2];
        assert_eq!(last.checked_port(settings.ports.pt_port), Some(65535));
        let desc = NetworkDescription::new(vec![RoleTemplate::authority("a", 4)]);
        assert!(matches!(
            expand(&desc, settings),
            Err(TopologyError::TooManyNodes { capacity: 3, .. })
        ));
    }

    #[test]
    fn rejects_bad_tags() {
        for tag in ["", "a-b", "waytoolongtagname"] {
            let desc = NetworkDescription::new(vec![RoleTemplate::authority(tag, 1)]);
            assert!(
                matches!(
                    expand(&desc, NetworkSettings::default()),
                    Err(TopologyError::InvalidTag { .. })
                ),
                "tag {tag:?} accepted"
            );
        }
    }

    #[test]
    fn phases_are_ascending() {
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 2),
            RoleTemplate::client("c", 1).with_phase(3),
            RoleTemplate::exit("r", 2).with_phase(2),
        ]);
        let topo = expand(&desc, NetworkSettings::default()).unwrap();
        let phases: Vec<(u32, usize)> = topo
            .phases()
            .into_iter()
            .map(|(p, nodes)| (p, nodes.len()))
            .collect();
        assert_eq!(phases, vec![(1, 2), (2, 2), (3, 1)]);
    }

    #[test]
    fn launch_phase_selects_nodes() {
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 2),
            RoleTemplate::client("c", 1).with_phase(2),
        ]);
        let settings = NetworkSettings {
            launch_phase: Some(2),
            ..Default::default()
        };
        let topo = expand(&desc, settings).unwrap();
        let selected: Vec<String> = topo.selected().iter().map(|n| n.nick()).collect();
        assert_eq!(selected, vec!["test002c"]);
    }

    fn description_strategy() -> impl Strategy<Value = NetworkDescription> {
        prop::collection::vec((1i64..6, 0u8..3, 1u32..4), 0..6).prop_map(|specs| {
            let mut nodes = vec![RoleTemplate::authority("a", 1)];
            for (i, (count, kind, phase)) in specs.into_iter().enumerate() {
                let tag = format!("t{i}");
                let template = match kind {
                    0 => RoleTemplate::exit(&tag, count),
                    1 => RoleTemplate::relay(&tag, count),
                    _ => RoleTemplate::client(&tag, count),
                };
                nodes.push(template.with_phase(phase));
            }
            NetworkDescription::new(nodes)
        })
    }

    proptest! {
        #[test]
        fn ids_are_a_permutation(desc in description_strategy()) {
            let topo = expand(&desc, NetworkSettings::default()).unwrap();
            let total: i64 = desc.nodes.iter().map(|t| t.count).sum();
            prop_assert_eq!(topo.len() as i64, total);

            let ids: HashSet<usize> = topo.nodes().iter().map(|n| n.id.0).collect();
            prop_assert_eq!(ids, (0..topo.len()).collect::<HashSet<_>>());

            let keys: HashSet<(String, usize)> =
                topo.nodes().iter().map(|n| (n.tag.clone(), n.instance)).collect();
            prop_assert_eq!(keys.len(), topo.len());
        }

        #[test]
        fn count_k_gives_k_replicas(desc in description_strategy()) {
            let topo = expand(&desc, NetworkSettings::default()).unwrap();
            for template in &desc.nodes {
                let replicas: Vec<&Node> =
                    topo.nodes().iter().filter(|n| n.tag == template.tag).collect();
                prop_assert_eq!(replicas.len() as i64, template.count);
                for pair in replicas.windows(2) {
                    prop_assert!(pair[0].instance < pair[1].instance);
                    prop_assert!(pair[0].id < pair[1].id);
                }
            }
        }

        #[test]
        fn expansion_is_deterministic(desc in description_strategy()) {
            let a = expand(&desc, NetworkSettings::default()).unwrap();
            let b = expand(&desc, NetworkSettings::default()).unwrap();
            prop_assert_eq!(a.nodes(), b.nodes());
        }
    }
}
