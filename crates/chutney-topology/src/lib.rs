//! Chutney Network Topology
//!
//! Expands a declarative network description into an ordered list of
//! concrete nodes.
//!
//! # Deterministic Numbering
//!
//! Every node receives a global [`NodeId`] from a single pass over the
//! description. The first role template's replicas get the lowest ids, and
//! ids are never reused or reassigned. Everything that must be unique per
//! node is derived from that id:
//! - ports (`base + id`)
//! - working directory name (`{id:03}{tag}`)
//! - nickname (`test{id:03}{tag}`)
//!
//! # Validation
//!
//! [`expand`] rejects descriptions that could never converge: no directory
//! authority, bridges without exactly one bridge authority, bridge clients
//! without a bridge, duplicate tags, and non-positive replication counts.
//! All of this happens before any file or process exists.

mod description;
mod error;
mod expand;
mod layout;
mod node;
mod settings;

pub use description::{NetworkDescription, Requirement, RoleTemplate};
pub use error::{Result, TopologyError};
pub use expand::{expand, Topology};
pub use layout::NodeLayout;
pub use node::{AddressFamily, Node, NodeId, Roles};
pub use settings::{DnsMode, NetworkSettings, PortBases, Timing, TrafficSettings};

/// Nickname prefix shared by every node in a test network.
pub const NICK_PREFIX: &str = "test";

/// Name of the directory (or symlink) under the data root holding node dirs.
pub const NODES_DIR: &str = "nodes";

/// Seconds between directory-authority votes in the rendered networks.
pub const VOTING_INTERVAL_SECS: u64 = 20;
