//! Error types for chutney-template.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for rendering operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors raised while loading, rendering or writing a node configuration.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A placeholder has no binding in any layer.
    #[error("template {template:?} for {nick} uses ${{{name}}}, which has no value")]
    MissingVariable {
        name: String,
        template: String,
        nick: String,
    },

    /// A template or include was not found on the search path.
    #[error("template {name:?} not found in {search_path:?}")]
    NotFound {
        name: String,
        search_path: Vec<PathBuf>,
    },

    /// Templates include each other.
    #[error("include cycle: {}", chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },

    /// Includes nested deeper than the limit.
    #[error("includes nested deeper than {limit} levels at {name:?}")]
    IncludeDepth { name: String, limit: usize },

    /// An include placeholder reached rendering unresolved.
    #[error("template {template:?} still contains ${{include:{include}}}")]
    UnresolvedInclude { template: String, include: String },

    /// Malformed placeholder.
    #[error("{template}:{line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    /// The nodes directory could not be set up.
    #[error("nodes directory {path}: {reason}")]
    NodesDir { path: PathBuf, reason: String },

    /// Filesystem failure while materializing a node directory.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            source,
        }
    }
}
