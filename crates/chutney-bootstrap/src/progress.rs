//! Bootstrap progress from daemon log lines.

use regex::Regex;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{MonitorError, Result};

static BOOTSTRAPPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Bootstrapped (\d+)%(?: \(([^\)]*)\))?: (.*)").expect("bootstrap regex is valid")
});

static ONION_PUBLISHED: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"Launching upload for hidden service (.*)").expect("upload regex is valid"),
        Regex::new(r"Service ([^\s]+ [^\s]+ descriptor of revision .*)")
            .expect("descriptor regex is valid"),
    ]
});

/// One `Bootstrapped N%` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapLine {
    pub percent: u8,
    pub keyword: Option<String>,
    pub message: String,
}

pub fn parse_bootstrap_line(line: &str) -> Option<BootstrapLine> {
    let caps = BOOTSTRAPPED.captures(line)?;
    let percent = caps.get(1)?.as_str().parse::<u32>().ok()?.min(100) as u8;
    Some(BootstrapLine {
        percent,
        keyword: caps.get(2).map(|m| m.as_str().to_string()),
        message: caps.get(3).map_or_else(String::new, |m| m.as_str().trim_end().to_string()),
    })
}

/// The descriptor description if `line` reports an onion service publish.
pub fn parse_onion_published(line: &str) -> Option<String> {
    ONION_PUBLISHED
        .iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
}

/// Best progress seen so far in a node's log.
///
/// `percent` only ever grows: a lower reading after a higher one is ignored,
/// though its message still replaces the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapProgress {
    pub percent: Option<u8>,
    pub keyword: Option<String>,
    pub message: Option<String>,
}

impl BootstrapProgress {
    pub fn record(&mut self, line: BootstrapLine) {
        self.percent = Some(self.percent.map_or(line.percent, |p| p.max(line.percent)));
        self.keyword = line.keyword;
        self.message = Some(line.message);
    }

    /// Fold in another observation, keeping the higher percent.
    pub fn merge(&mut self, newer: &BootstrapProgress) {
        if let Some(p) = newer.percent {
            self.percent = Some(self.percent.map_or(p, |old| old.max(p)));
        }
        if newer.message.is_some() {
            self.keyword = newer.keyword.clone();
            self.message = newer.message.clone();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent == Some(100)
    }
}

/// Reads only what was appended to a log since the last call.
#[derive(Debug, Default)]
pub struct LogTail {
    offset: u64,
    partial: String,
}

impl LogTail {
    /// Complete new lines, or `None` if the file does not exist yet.
    /// A file that shrank is re-read from the start.
    pub fn read_new_lines(&mut self, path: &Path) -> Result<Option<Vec<String>>> {
        let artifact = |source| MonitorError::Artifact {
            path: path.to_path_buf(),
            source,
        };
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(artifact(e)),
        };
        let len = file.metadata().map_err(artifact)?.len();
        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.offset)).map_err(artifact)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(artifact)?;
        self.offset += buf.len() as u64;

        self.partial.push_str(&String::from_utf8_lossy(&buf));
        let mut lines = Vec::new();
        while let Some(end) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=end).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        Ok(Some(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    #[test]
    fn parses_bootstrap_lines() {
        let line = "Nov 01 12:00:00.000 [notice] Bootstrapped 85% (ap_conn_done): Connected to a relay to build circuits";
        let parsed = parse_bootstrap_line(line).unwrap();
        assert_eq!(parsed.percent, 85);
        assert_eq!(parsed.keyword.as_deref(), Some("ap_conn_done"));
        assert_eq!(parsed.message, "Connected to a relay to build circuits");

        let old_style = parse_bootstrap_line("[notice] Bootstrapped 100%: Done").unwrap();
        assert_eq!(old_style.percent, 100);
        assert_eq!(old_style.keyword, None);

        assert!(parse_bootstrap_line("[notice] Opening Socks listener").is_none());
    }

    #[test]
    fn percent_never_decreases() {
        let mut p = BootstrapProgress::default();
        p.record(parse_bootstrap_line("Bootstrapped 90% (a): x").unwrap());
        p.record(parse_bootstrap_line("Bootstrapped 5% (b): y").unwrap());
        assert_eq!(p.percent, Some(90));
        assert_eq!(p.message.as_deref(), Some("y"));
    }

    #[test]
    fn detects_onion_publication() {
        assert_eq!(
            parse_onion_published(
                "[info] Service abcdef.onion 1 descriptor of revision 42 has been uploaded"
            )
            .as_deref(),
            Some("abcdef.onion 1 descriptor of revision 42 has been uploaded")
        );
        assert!(parse_onion_published("[info] Service is starting").is_none());
    }

    #[test]
    fn tail_returns_only_appended_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notice.log");
        let mut tail = LogTail::default();
        assert_eq!(tail.read_new_lines(&path).unwrap(), None);

        let mut f = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        write!(f, "one\ntw").unwrap();
        assert_eq!(tail.read_new_lines(&path).unwrap(), Some(vec!["one".to_string()]));

        write!(f, "o\nthree\n").unwrap();
        assert_eq!(
            tail.read_new_lines(&path).unwrap(),
            Some(vec!["two".to_string(), "three".to_string()])
        );
        assert_eq!(tail.read_new_lines(&path).unwrap(), Some(Vec::new()));
    }
}
