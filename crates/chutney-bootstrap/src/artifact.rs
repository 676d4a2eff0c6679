//! Cached directory documents and per-node artifact snapshots.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};

use chutney_topology::{NetworkSettings, Node, NodeId, NodeLayout};

use crate::error::{MonitorError, Result};
use crate::progress::{parse_bootstrap_line, parse_onion_published, BootstrapProgress, LogTail};

static CONSENSUS_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^r (\S+) ").expect("consensus regex is valid"));
static DESCRIPTOR_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^router (\S+) ").expect("descriptor regex is valid"));
static MICRODESC_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^id ed25519 (\S+)").expect("microdesc regex is valid"));

/// Documents with fewer lines than this are reported as suspiciously short.
pub const SHORT_DOC_LINES: usize = 8;

/// Cached directory documents a node may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocKind {
    NsConsensus,
    MdConsensus,
    Descriptors,
    DescriptorsNew,
    Microdescs,
    MicrodescsNew,
}

impl DocKind {
    pub const ALL: [DocKind; 6] = [
        DocKind::NsConsensus,
        DocKind::MdConsensus,
        DocKind::Descriptors,
        DocKind::DescriptorsNew,
        DocKind::Microdescs,
        DocKind::MicrodescsNew,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            DocKind::NsConsensus => "cached-consensus",
            DocKind::MdConsensus => "cached-microdesc-consensus",
            DocKind::Descriptors => "cached-descriptors",
            DocKind::DescriptorsNew => "cached-descriptors.new",
            DocKind::Microdescs => "cached-microdescs",
            DocKind::MicrodescsNew => "cached-microdescs.new",
        }
    }

    /// Microdescriptors are keyed by ed25519 identity, the rest by nickname.
    pub fn keyed_by_ed25519(self) -> bool {
        matches!(self, DocKind::Microdescs | DocKind::MicrodescsNew)
    }

    fn entry_pattern(self) -> &'static Regex {
        match self {
            DocKind::NsConsensus | DocKind::MdConsensus => &*CONSENSUS_ENTRY,
            DocKind::Descriptors | DocKind::DescriptorsNew => &*DESCRIPTOR_ENTRY,
            DocKind::Microdescs | DocKind::MicrodescsNew => &*MICRODESC_ENTRY,
        }
    }
}

/// What a node's copy of one document looks like right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocState {
    Missing,
    Empty,
    /// Parsed document: its line count and the keys of its entries.
    Entries { lines: usize, keys: BTreeSet<String> },
}

impl DocState {
    pub fn parse(kind: DocKind, text: &str) -> Self {
        let lines = text.lines().count();
        if lines == 0 {
            return DocState::Empty;
        }
        let keys = kind
            .entry_pattern()
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        DocState::Entries { lines, keys }
    }
}

/// Everything read from one node's directory in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub node: NodeId,
    pub progress: BootstrapProgress,
    /// Description of the published onion descriptor, once seen.
    pub onion_published: Option<String>,
    pub docs: BTreeMap<DocKind, DocState>,
    /// The node's own ed25519 identity, once its key exists.
    pub ed25519_id: Option<String>,
}

impl NodeSnapshot {
    /// Snapshot with nothing on disk yet.
    pub fn empty(node: NodeId) -> Self {
        Self {
            node,
            progress: BootstrapProgress::default(),
            onion_published: None,
            docs: DocKind::ALL.iter().map(|k| (*k, DocState::Missing)).collect(),
            ed25519_id: None,
        }
    }

    pub fn doc(&self, kind: DocKind) -> &DocState {
        self.docs.get(&kind).unwrap_or(&DocState::Missing)
    }
}

/// Where snapshots come from. The monitor only reads.
pub trait ArtifactSource: Send + Sync {
    fn read(&self, node: &Node) -> Result<NodeSnapshot>;
}

/// Encoded ed25519 identity from a master public key file: bytes 32..64 in
/// base64 without padding. `None` while the file is absent or short.
pub fn read_ed25519_id(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) if bytes.len() >= 64 => Ok(Some(STANDARD_NO_PAD.encode(&bytes[32..64]))),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MonitorError::Artifact {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[derive(Debug, Default)]
struct LogState {
    notice: LogTail,
    info: LogTail,
    progress: BootstrapProgress,
    onion_published: Option<String>,
}

/// Reads snapshots from node directories on disk. Logs are tailed
/// incrementally; documents are re-read whole each time.
#[derive(Debug)]
pub struct FsArtifactSource {
    settings: NetworkSettings,
    logs: Mutex<HashMap<NodeId, Arc<Mutex<LogState>>>>,
}

impl FsArtifactSource {
    pub fn new(settings: NetworkSettings) -> Self {
        Self {
            settings,
            logs: Mutex::new(HashMap::new()),
        }
    }

    fn read_doc(layout: &NodeLayout, kind: DocKind) -> Result<DocState> {
        let path = layout.cached(kind.file_name());
        match fs::read(&path) {
            Ok(bytes) => Ok(DocState::parse(kind, &String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DocState::Missing),
            Err(e) => Err(MonitorError::Artifact { path, source: e }),
        }
    }
}

impl ArtifactSource for FsArtifactSource {
    fn read(&self, node: &Node) -> Result<NodeSnapshot> {
        let layout = NodeLayout::new(&self.settings, node);

        let entry = self
            .logs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(node.id)
            .or_default()
            .clone();
        let mut state = entry.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(lines) = state.notice.read_new_lines(&layout.notice_log())? {
            for line in lines.iter().filter_map(|l| parse_bootstrap_line(l)) {
                state.progress.record(line);
            }
        }
        if node.roles.hidden_service && state.onion_published.is_none() {
            if let Some(lines) = state.info.read_new_lines(&layout.info_log())? {
                state.onion_published = lines.iter().find_map(|l| parse_onion_published(l));
            }
        }
        let progress = state.progress.clone();
        let onion_published = state.onion_published.clone();
        drop(state);

        let mut docs = BTreeMap::new();
        for kind in DocKind::ALL {
            docs.insert(kind, Self::read_doc(&layout, kind)?);
        }

        Ok(NodeSnapshot {
            node: node.id,
            progress,
            onion_published,
            docs,
            ed25519_id: read_ed25519_id(&layout.ed25519_id_key())?,
        })
    }
}
