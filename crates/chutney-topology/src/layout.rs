//! Well-known paths inside a node's working directory.

use std::path::{Path, PathBuf};

use crate::node::Node;
use crate::settings::NetworkSettings;

/// Paths of one node's working directory.
///
/// The directory is owned by its node: the renderer creates it, the
/// supervisor writes the pid file, the monitor only reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    pub dir: PathBuf,
}

impl NodeLayout {
    pub fn new(settings: &NetworkSettings, node: &Node) -> Self {
        Self::in_nodes_dir(&settings.nodes_dir(), node)
    }

    pub fn in_nodes_dir(nodes_dir: &Path, node: &Node) -> Self {
        Self {
            dir: nodes_dir.join(node.dir_name()),
        }
    }

    pub fn torrc(&self) -> PathBuf {
        self.dir.join("torrc")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("pid")
    }

    /// Where a stale pid file is moved after the process is gone.
    pub fn old_pid_file(&self) -> PathBuf {
        self.dir.join("pid.old")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join("lock")
    }

    pub fn notice_log(&self) -> PathBuf {
        self.dir.join("notice.log")
    }

    pub fn info_log(&self) -> PathBuf {
        self.dir.join("info.log")
    }

    /// Captured stdout/stderr of the daemon.
    pub fn stdout_log(&self) -> PathBuf {
        self.dir.join("stdout.log")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.dir.join("keys")
    }

    pub fn ed25519_id_key(&self) -> PathBuf {
        self.keys_dir().join("ed25519_master_id_public_key")
    }

    pub fn fingerprint_file(&self) -> PathBuf {
        self.dir.join("fingerprint")
    }

    pub fn hidden_service_dir(&self) -> PathBuf {
        self.dir.join("hidden_service")
    }

    /// Onion address written by a hidden-service node.
    pub fn onion_hostname(&self) -> PathBuf {
        self.hidden_service_dir().join("hostname")
    }

    /// A cached directory document by file name.
    pub fn cached(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AddressFamily, NodeId, Roles};
    use std::collections::BTreeMap;

    #[test]
    fn paths_derive_from_node_dir() {
        let node = Node {
            id: NodeId(4),
            tag: "r".to_string(),
            instance: 1,
            roles: Roles::default(),
            family: AddressFamily::V4,
            template: "relay".to_string(),
            launch_phase: 1,
            binary: None,
            vars: BTreeMap::new(),
        };
        let layout = NodeLayout::in_nodes_dir(Path::new("/net/nodes"), &node);
        assert_eq!(layout.dir, PathBuf::from("/net/nodes/004r"));
        assert_eq!(layout.pid_file(), PathBuf::from("/net/nodes/004r/pid"));
        assert_eq!(
            layout.ed25519_id_key(),
            PathBuf::from("/net/nodes/004r/keys/ed25519_master_id_public_key")
        );
        assert_eq!(
            layout.cached("cached-consensus"),
            PathBuf::from("/net/nodes/004r/cached-consensus")
        );
    }
}
