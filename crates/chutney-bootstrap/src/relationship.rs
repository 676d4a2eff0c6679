//! Cross-node facts that must hold before a network counts as converged.
//!
//! Each [`Relationship`] looks at the membership table built from one tick's
//! snapshots and reports every (subject, observer) pair it finds unmet. The
//! baseline set covers descriptor acceptance, consensus membership, directory
//! caches on relays, and the documents bridge clients and plain clients need.
//! More can be pushed onto a [`RelationshipSet`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chutney_topology::{Node, NodeId, Topology};

use crate::artifact::{DocKind, DocState, NodeSnapshot, SHORT_DOC_LINES};

/// How one subject shows up in one observer's document, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirStatus {
    Missing,
    Empty,
    /// No key to search for, e.g. the subject's ed25519 identity is unknown.
    NotChecked,
    /// Present but too short to hold a real entry.
    Short,
    Absent,
    Present,
}

impl fmt::Display for DirStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirStatus::Missing => "no file",
            DirStatus::Empty => "empty file",
            DirStatus::NotChecked => "not checked",
            DirStatus::Short => "very short file",
            DirStatus::Absent => "not in file",
            DirStatus::Present => "present",
        };
        f.write_str(s)
    }
}

impl DirStatus {
    pub fn of(state: &DocState, key: Option<&str>) -> Self {
        match state {
            DocState::Missing => DirStatus::Missing,
            DocState::Empty => DirStatus::Empty,
            DocState::Entries { lines, keys } => match key {
                Some(k) if keys.contains(k) => DirStatus::Present,
                None => DirStatus::NotChecked,
                Some(_) if *lines < SHORT_DOC_LINES => DirStatus::Short,
                Some(_) => DirStatus::Absent,
            },
        }
    }
}

/// Fold alternative statuses into one.
///
/// `best` picks the highest status, otherwise the lowest. `NotChecked` is
/// always ignored when anything else is available; `Missing` is ignored too
/// when `ignore_missing` is set.
pub fn combine(
    statuses: impl IntoIterator<Item = DirStatus>,
    best: bool,
    ignore_missing: bool,
) -> Option<DirStatus> {
    let mut acc: Option<DirStatus> = None;
    for new in statuses {
        let Some(old) = acc else {
            acc = Some(new);
            continue;
        };
        let replace = if old == new {
            false
        } else if ignore_missing && old == DirStatus::Missing {
            true
        } else if ignore_missing && new == DirStatus::Missing {
            false
        } else if old == DirStatus::NotChecked {
            true
        } else if new == DirStatus::NotChecked {
            false
        } else if best {
            new > old
        } else {
            new < old
        };
        if replace {
            acc = Some(new);
        }
    }
    acc
}

/// Per-node documents and identities from one tick.
#[derive(Debug, Clone, Default)]
pub struct MembershipTable {
    docs: BTreeMap<NodeId, BTreeMap<DocKind, DocState>>,
    ed25519: BTreeMap<NodeId, String>,
}

impl MembershipTable {
    pub fn build<'a>(snapshots: impl IntoIterator<Item = &'a NodeSnapshot>) -> Self {
        let mut table = Self::default();
        for snap in snapshots {
            table.docs.insert(snap.node, snap.docs.clone());
            if let Some(id) = &snap.ed25519_id {
                table.ed25519.insert(snap.node, id.clone());
            }
        }
        table
    }

    /// How `subject` appears in `observer`'s copy of `kind`.
    pub fn status(&self, observer: &Node, kind: DocKind, subject: &Node) -> DirStatus {
        let missing = DocState::Missing;
        let state = self
            .docs
            .get(&observer.id)
            .and_then(|docs| docs.get(&kind))
            .unwrap_or(&missing);
        let nick;
        let key = if kind.keyed_by_ed25519() {
            self.ed25519.get(&subject.id).map(String::as_str)
        } else {
            nick = subject.nick();
            Some(nick.as_str())
        };
        DirStatus::of(state, key)
    }

    /// Best of the current and `.new` descriptor files.
    pub fn descriptors(&self, observer: &Node, subject: &Node) -> DirStatus {
        self.best_of(observer, subject, &[DocKind::Descriptors, DocKind::DescriptorsNew])
    }

    /// Best of the current and `.new` microdescriptor files.
    pub fn microdescs(&self, observer: &Node, subject: &Node) -> DirStatus {
        self.best_of(observer, subject, &[DocKind::Microdescs, DocKind::MicrodescsNew])
    }

    fn best_of(&self, observer: &Node, subject: &Node, kinds: &[DocKind]) -> DirStatus {
        combine(kinds.iter().map(|k| self.status(observer, *k, subject)), true, true)
            .unwrap_or(DirStatus::Missing)
    }

    /// Both consensus flavors, combined for the kind of observer: directory
    /// servers must have both, clients need either.
    pub fn consensus(&self, observer: &Node, subject: &Node) -> DirStatus {
        let flavors = [DocKind::NsConsensus, DocKind::MdConsensus]
            .map(|k| self.status(observer, k, subject));
        let dir_server = observer.roles.is_dir_server();
        combine(flavors, !dir_server, !dir_server).unwrap_or(DirStatus::Missing)
    }

    /// Whether `observer` has any microdescriptor file on disk.
    pub fn has_microdescs(&self, observer: &Node) -> bool {
        self.docs.get(&observer.id).is_some_and(|docs| {
            [DocKind::Microdescs, DocKind::MicrodescsNew]
                .iter()
                .any(|k| docs.get(k).is_some_and(|state| *state != DocState::Missing))
        })
    }

    /// Descriptors the consensus refers to, full or micro.
    ///
    /// A bridge client uses a single flavour for consensus relays:
    /// microdescriptors once it has any, full descriptors otherwise.
    pub fn referenced_descriptors(&self, observer: &Node, subject: &Node) -> DirStatus {
        if observer.roles.bridge_client && subject.roles.is_consensus_relay() {
            return if self.has_microdescs(observer) {
                self.microdescs(observer, subject)
            } else {
                self.descriptors(observer, subject)
            };
        }
        let kinds = [self.descriptors(observer, subject), self.microdescs(observer, subject)];
        let dir_server = observer.roles.is_dir_server();
        combine(kinds, !dir_server, !dir_server).unwrap_or(DirStatus::Missing)
    }
}

/// One unmet (subject, observer) fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmet {
    pub relationship: &'static str,
    pub subject: String,
    pub observer: String,
    pub status: DirStatus,
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} as seen by {} ({})",
            self.relationship, self.subject, self.observer, self.status
        )
    }
}

/// Inputs to relationship evaluation.
pub struct Observation<'a> {
    pub topology: &'a Topology,
    /// Nodes taking part in this wait.
    pub active: &'a BTreeSet<NodeId>,
    pub table: &'a MembershipTable,
}

impl<'a> Observation<'a> {
    pub fn nodes(&self) -> impl Iterator<Item = &'a Node> + '_ {
        self.topology
            .nodes()
            .iter()
            .filter(|n| self.active.contains(&n.id))
    }
}

/// A fact every healthy, converged network satisfies.
pub trait Relationship: Send + Sync {
    fn name(&self) -> &'static str;

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet>;
}

fn check<'a, F>(
    name: &'static str,
    obs: &Observation<'a>,
    subject: impl Fn(&Node) -> bool,
    observer: impl Fn(&Node) -> bool,
    status: F,
) -> Vec<Unmet>
where
    F: Fn(&MembershipTable, &Node, &Node) -> DirStatus,
{
    let mut unmet = Vec::new();
    for s in obs.nodes().filter(|n| subject(n)) {
        for o in obs.nodes().filter(|n| observer(n)) {
            let st = status(obs.table, o, s);
            if st != DirStatus::Present && st != DirStatus::NotChecked {
                unmet.push(Unmet {
                    relationship: name,
                    subject: s.nick(),
                    observer: o.nick(),
                    status: st,
                });
            }
        }
    }
    unmet
}

/// Every consensus relay's descriptor is held by every voting authority.
pub struct DescriptorsAccepted;

impl Relationship for DescriptorsAccepted {
    fn name(&self) -> &'static str {
        "descriptor accepted by authority"
    }

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        check(
            self.name(),
            obs,
            |n| n.roles.is_consensus_relay(),
            |n| n.roles.is_consensus_authority(),
            |t, o, s| t.descriptors(o, s),
        )
    }
}

/// Every consensus relay is in each authority's consensus, both flavors.
/// Bridges are held by the bridge authority instead.
pub struct InAuthorityView;

impl Relationship for InAuthorityView {
    fn name(&self) -> &'static str {
        "listed by authority"
    }

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        let mut unmet = check(
            self.name(),
            obs,
            |n| n.roles.is_consensus_relay(),
            |n| n.roles.is_consensus_authority(),
            |t, o, s| t.consensus(o, s),
        );
        unmet.extend(check(
            self.name(),
            obs,
            |n| n.roles.bridge,
            |n| n.roles.bridge_authority,
            |t, o, s| t.descriptors(o, s),
        ));
        unmet
    }
}

/// Every directory server caches the consensus and the descriptors it lists.
pub struct DirServersCached;

impl Relationship for DirServersCached {
    fn name(&self) -> &'static str {
        "cached by directory server"
    }

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        check(
            self.name(),
            obs,
            |n| n.roles.is_consensus_relay(),
            |n| n.roles.is_dir_server(),
            |t, o, s| {
                combine(
                    [t.consensus(o, s), t.referenced_descriptors(o, s)],
                    false,
                    false,
                )
                .unwrap_or(DirStatus::Missing)
            },
        )
    }
}

/// Every bridge client has its bridges' descriptors.
pub struct BridgeClientsHaveBridges;

impl Relationship for BridgeClientsHaveBridges {
    fn name(&self) -> &'static str {
        "bridge known to bridge client"
    }

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        check(
            self.name(),
            obs,
            |n| n.roles.bridge,
            |n| n.roles.bridge_client,
            |t, o, s| t.descriptors(o, s),
        )
    }
}

/// Every non-relay node has a consensus listing each relay and the
/// descriptors for it.
pub struct ClientsHaveSummary;

impl Relationship for ClientsHaveSummary {
    fn name(&self) -> &'static str {
        "summary held by client"
    }

    fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        check(
            self.name(),
            obs,
            |n| n.roles.is_consensus_relay(),
            |n| !n.roles.is_dir_server(),
            |t, o, s| {
                combine(
                    [t.consensus(o, s), t.referenced_descriptors(o, s)],
                    false,
                    false,
                )
                .unwrap_or(DirStatus::Missing)
            },
        )
    }
}

/// Ordered, extensible list of relationships.
pub struct RelationshipSet {
    relationships: Vec<Box<dyn Relationship>>,
}

impl RelationshipSet {
    pub fn empty() -> Self {
        Self {
            relationships: Vec::new(),
        }
    }

    /// Descriptor acceptance, authority listing, directory caches, bridge
    /// clients and plain clients.
    pub fn baseline() -> Self {
        let mut set = Self::empty();
        set.push(DescriptorsAccepted);
        set.push(InAuthorityView);
        set.push(DirServersCached);
        set.push(BridgeClientsHaveBridges);
        set.push(ClientsHaveSummary);
        set
    }

    pub fn push(&mut self, relationship: impl Relationship + 'static) {
        self.relationships.push(Box::new(relationship));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.relationships.iter().map(|r| r.name()).collect()
    }

    pub fn unmet(&self, obs: &Observation<'_>) -> Vec<Unmet> {
        self.relationships.iter().flat_map(|r| r.unmet(obs)).collect()
    }
}

impl Default for RelationshipSet {
    fn default() -> Self {
        Self::baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chutney_topology::{expand, NetworkDescription, NetworkSettings, RoleTemplate, Roles};
    use DirStatus::*;

    #[test]
    fn combine_best_ignores_missing() {
        assert_eq!(combine([Missing, Present], true, true), Some(Present));
        assert_eq!(combine([Absent, Missing], true, true), Some(Absent));
        assert_eq!(combine([Missing, Missing], true, true), Some(Missing));
        assert_eq!(combine([], true, true), None);
    }

    #[test]
    fn combine_worst_keeps_missing() {
        assert_eq!(combine([Present, Missing], false, false), Some(Missing));
        assert_eq!(combine([Present, Absent], false, false), Some(Absent));
    }

    #[test]
    fn not_checked_never_wins() {
        assert_eq!(combine([NotChecked, Absent], true, false), Some(Absent));
        assert_eq!(combine([Present, NotChecked], false, false), Some(Present));
        assert_eq!(combine([NotChecked], false, false), Some(NotChecked));
    }

    fn bridged_net() -> Topology {
        let with = |tag: &str, template: &str, roles: Roles| RoleTemplate::new(tag, 1, template).with_roles(roles);
        let desc = NetworkDescription::new(vec![
            RoleTemplate::authority("a", 1),
            RoleTemplate::exit("r", 1),
            with("ba", "bridge-authority", Roles { bridge_authority: true, ..Default::default() }),
            with("br", "bridge", Roles { bridge: true, ..Default::default() }),
            with("bc", "bridge-client", Roles { bridge_client: true, ..Default::default() }),
        ]);
        expand(&desc, NetworkSettings::default()).unwrap()
    }

    /// The exit with its ed25519 id, and the bridge client holding `docs`.
    fn bridge_client_table(topo: &Topology, docs: &[(DocKind, &str)]) -> MembershipTable {
        let exit = topo.by_nick("test001r").unwrap();
        let client = topo.by_nick("test004bc").unwrap();
        let mut exit_snap = NodeSnapshot::empty(exit.id);
        exit_snap.ed25519_id = Some("exitkey".to_string());
        let mut client_snap = NodeSnapshot::empty(client.id);
        for (kind, text) in docs {
            client_snap.docs.insert(*kind, DocState::parse(*kind, text));
        }
        MembershipTable::build([&exit_snap, &client_snap])
    }

    #[test]
    fn bridge_client_with_microdescs_needs_the_relay_in_them() {
        let topo = bridged_net();
        let exit = topo.by_nick("test001r").unwrap();
        let client = topo.by_nick("test004bc").unwrap();
        let table = bridge_client_table(
            &topo,
            &[
                (DocKind::Descriptors, "router test001r 127.0.0.1 5001 0 0\n"),
                (DocKind::MicrodescsNew, "onion-key\nid ed25519 otherkey\n"),
            ],
        );
        assert!(table.has_microdescs(client));
        assert_eq!(table.descriptors(client, exit), Present);
        assert_eq!(table.referenced_descriptors(client, exit), Short);
    }

    #[test]
    fn bridge_client_without_microdescs_uses_descriptors() {
        let topo = bridged_net();
        let exit = topo.by_nick("test001r").unwrap();
        let client = topo.by_nick("test004bc").unwrap();
        let table = bridge_client_table(&topo, &[(DocKind::Descriptors, "router test001r 127.0.0.1 5001 0 0\n")]);
        assert!(!table.has_microdescs(client));
        assert_eq!(table.referenced_descriptors(client, exit), Present);

        let table = bridge_client_table(&topo, &[]);
        assert_eq!(table.referenced_descriptors(client, exit), Missing);
    }

    #[test]
    fn status_of_document() {
        let keys: BTreeSet<String> = ["test001r".to_string()].into();
        let short = DocState::Entries { lines: 3, keys: keys.clone() };
        let long = DocState::Entries { lines: 40, keys };
        assert_eq!(DirStatus::of(&short, Some("test001r")), Present);
        assert_eq!(DirStatus::of(&short, Some("test002r")), Short);
        assert_eq!(DirStatus::of(&long, Some("test002r")), Absent);
        assert_eq!(DirStatus::of(&long, None), NotChecked);
        assert_eq!(DirStatus::of(&DocState::Missing, Some("x")), Missing);
    }
}
