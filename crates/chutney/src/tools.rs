//! Running the daemon and certificate tool for information.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use chutney_template::OptionFilter;

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+.() A-Za-z0-9]+$").expect("version regex is valid"));
static MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+): (yes|no)").expect("module regex is valid"));

/// Run `program` to completion, feeding `stdin` if given.
pub(crate) async fn run(program: &Path, args: &[&str], stdin: Option<&str>) -> std::io::Result<Output> {
    debug!(program = %program.display(), ?args, "running");
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(text.as_bytes()).await?;
    }
    child.wait_with_output().await
}

/// Stdout and stderr of a run, the way a terminal would show them.
pub(crate) fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Whether `program` can be executed at all. Exit status does not matter.
pub async fn binary_exists(program: &Path, probe_arg: &str) -> bool {
    match run(program, &[probe_arg], None).await {
        Ok(_) => true,
        Err(e) => {
            debug!(program = %program.display(), error = %e, "binary not runnable");
            false
        }
    }
}

/// First line of `--version` output, tidied: "Tor version 0.4.8.9." becomes
/// "Tor 0.4.8.9.".
pub fn clean_version(output: &str) -> Option<String> {
    let first = output.lines().next()?.trim();
    let version = first.replace("version ", "").replace(").", ")");
    VERSION.is_match(&version).then_some(version)
}

/// Whether a tidied version string names a daemon older than 0.4, which
/// does not wait for descriptors before voting them into the consensus.
/// Other implementations never count as legacy.
pub fn is_legacy_version(version: &str) -> bool {
    let Some(number) = version.strip_prefix("Tor ") else {
        return false;
    };
    let mut parts = number.split(|c: char| !c.is_ascii_digit()).map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor))) => (major, minor) < (0, 4),
        _ => false,
    }
}

pub async fn daemon_version(daemon: &Path) -> Option<String> {
    let output = run(daemon, &["--version"], None).await.ok()?;
    clean_version(&String::from_utf8_lossy(&output.stdout))
}

/// Compile-time modules and whether each is built in. Daemons without
/// `--list-modules` report nothing.
pub fn parse_modules(output: &str) -> BTreeMap<String, bool> {
    output
        .lines()
        .filter_map(|line| MODULE.captures(line))
        .map(|c| (c[1].to_string(), &c[2] == "yes"))
        .collect()
}

/// Whether `daemon` was built with `module`. Unlisted modules are assumed
/// present.
pub async fn has_module(daemon: &Path, module: &str) -> bool {
    let listing = match run(daemon, &["--list-modules", "--quiet"], None).await {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).into_owned(),
        _ => String::new(),
    };
    parse_modules(&listing).get(module).copied().unwrap_or(true)
}

/// Filter commenting out the options `daemon` does not know. `None` when
/// the daemon cannot list its options, in which case nothing is filtered.
pub async fn option_filter(daemon: &Path) -> Option<OptionFilter> {
    let version = daemon_version(daemon).await.unwrap_or_else(|| "unknown".to_string());
    match run(daemon, &["--list-torrc-options"], None).await {
        Ok(output) if output.status.success() => Some(OptionFilter::from_listing(
            daemon.display().to_string(),
            version,
            &String::from_utf8_lossy(&output.stdout),
        )),
        Ok(output) => {
            warn!(daemon = %daemon.display(), status = %output.status, "cannot list torrc options, not filtering");
            None
        }
        Err(e) => {
            warn!(daemon = %daemon.display(), error = %e, "cannot list torrc options, not filtering");
            None
        }
    }
}
