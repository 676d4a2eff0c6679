//! Comments out config lines the daemon binary does not understand.

use std::collections::HashSet;
use tracing::{debug, warn};

/// Unsupported lines beyond this count are only logged at debug level.
const WARN_LIMIT: usize = 10;

/// The set of options a daemon binary accepts.
#[derive(Debug, Clone)]
pub struct OptionFilter {
    daemon: String,
    version: String,
    options: HashSet<String>,
}

impl OptionFilter {
    pub fn new<I, S>(daemon: impl Into<String>, version: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            daemon: daemon.into(),
            version: version.into(),
            options: options
                .into_iter()
                .map(|o| o.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Build from the output of the daemon's option listing: the first word
    /// of each non-empty line is an option name.
    pub fn from_listing(daemon: impl Into<String>, version: impl Into<String>, listing: &str) -> Self {
        let options = listing
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|word| !word.starts_with('#'));
        Self::new(daemon, version, options)
    }

    pub fn supports(&self, option: &str) -> bool {
        self.options.contains(&option.to_ascii_lowercase())
    }

    /// Rewrite `text`, turning unsupported option lines into comments.
    /// Empty and comment lines are kept. Returns the new text and the number
    /// of lines disabled.
    pub fn apply(&self, text: &str) -> (String, usize) {
        let mut out = String::with_capacity(text.len());
        let mut disabled = 0;
        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            let keep = match trimmed.split_whitespace().next() {
                None => true,
                Some(word) if word.starts_with('#') => true,
                Some(word) => self.supports(word),
            };
            if keep {
                out.push_str(line);
                continue;
            }

            if disabled < WARN_LIMIT {
                warn!(daemon = %self.daemon, line = trimmed, "daemon does not support config option");
            } else {
                debug!(daemon = %self.daemon, line = trimmed, "daemon does not support config option");
            }
            disabled += 1;
            out.push_str(&format!(
                "# {} version {} does not support: {}",
                self.daemon, self.version, line
            ));
        }
        (out, disabled)
    }
}
