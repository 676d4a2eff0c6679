//! Chutney Bootstrap Monitor
//!
//! Decides when a freshly started test network is ready for traffic.
//!
//! # Local progress
//!
//! Each daemon logs `Bootstrapped N%` lines. The monitor keeps the highest
//! percentage seen per node; an onion service also needs its descriptor
//! published before it counts as bootstrapped.
//!
//! # Convergence
//!
//! Local progress is not enough. Every tick the monitor reads the cached
//! directory documents of every node and evaluates a [`RelationshipSet`]
//! over them: relays accepted and listed by the authorities, directory
//! servers caching what the consensus lists, clients holding a usable
//! summary. The network has converged when every node is bootstrapped and
//! no relationship is unmet.
//!
//! # Reading
//!
//! The monitor never writes. Node directories are read through an
//! [`ArtifactSource`]; [`FsArtifactSource`] tails logs incrementally and
//! re-reads documents whole.

mod artifact;
mod error;
mod monitor;
mod progress;
mod relationship;

pub use artifact::{
    read_ed25519_id, ArtifactSource, DocKind, DocState, FsArtifactSource, NodeSnapshot,
    SHORT_DOC_LINES,
};
pub use error::{Lagging, MonitorError, Result};
pub use monitor::{
    BootstrapMonitor, ConvergenceState, LivenessProbe, NodePhase, NodeState, WaitOptions,
};
pub use progress::{parse_bootstrap_line, parse_onion_published, BootstrapLine, BootstrapProgress, LogTail};
pub use relationship::{
    combine, BridgeClientsHaveBridges, ClientsHaveSummary, DescriptorsAccepted, DirServersCached,
    DirStatus, InAuthorityView, MembershipTable, Observation, Relationship, RelationshipSet, Unmet,
};
