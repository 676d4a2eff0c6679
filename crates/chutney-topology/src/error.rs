//! Error types for chutney-topology.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors that make a network description unusable.
///
/// These are raised before any directory or process exists, and are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// Two role templates share a tag.
    #[error("tag {tag:?} is used by role templates #{first} and #{second}")]
    DuplicateTag {
        tag: String,
        first: usize,
        second: usize,
    },

    /// A role template asked for zero or fewer replicas.
    #[error("role template {tag:?} has non-positive count {count}")]
    NonPositiveCount { tag: String, count: i64 },

    /// A tag that cannot be used in nicknames or directory names.
    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    /// A launch phase below 1.
    #[error("role template {tag:?} has launch phase {phase}, phases start at 1")]
    InvalidPhase { tag: String, phase: u32 },

    /// A role needs a collaborator role that the description does not contain.
    #[error("{role} nodes ({tag:?}) require at least one {required} node")]
    MissingCollaborator {
        tag: String,
        role: &'static str,
        required: &'static str,
    },

    /// Bridges are present but the number of bridge authorities is not one.
    #[error("bridges need exactly one bridge authority, found {found}")]
    BridgeAuthorityCount { found: usize },

    /// More nodes than the port bases leave room for.
    #[error("{nodes} nodes do not fit between the port bases, at most {capacity} do")]
    TooManyNodes { nodes: usize, capacity: usize },

    /// No directory authority means convergence is undefined.
    #[error("network has no directory authority")]
    NoAuthorities,

    /// The description produced no nodes at all.
    #[error("network description contains no nodes")]
    Empty,

    /// The description document could not be parsed.
    #[error("invalid network description: {0}")]
    Parse(String),
}
