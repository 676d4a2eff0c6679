//! Node identities learned before rendering, and the network-wide
//! `authorities` and `bridges` lines built from them.
//!
//! Authorities get long-term keys from the certificate tool; every relay
//! asks the daemon for its fingerprint, which creates the key on first use.
//! Both are idempotent: existing keys are kept.

use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use chutney_template::{make_private_dir, Renderer};
use chutney_topology::{Node, NodeId, NodeLayout, Topology};

use crate::error::{Error, Result};
use crate::tools;

const IDENTITY_KEY: &str = "authority_identity_key";
const SIGNING_KEY: &str = "authority_signing_key";
const CERTIFICATE: &str = "authority_certificate";

/// Relay fingerprint length in hex digits.
pub const FINGERPRINT_LEN: usize = 40;

/// What configure knows about one node's keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    /// RSA identity fingerprint, for relays.
    pub fingerprint: Option<String>,
    /// Authority v3 identity, from the authority certificate.
    pub v3ident: Option<String>,
}

/// Rendered values of the network-wide variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkLines {
    pub authorities: String,
    pub bridges: String,
}

/// Which directory-authority option an authority is announced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityKind {
    Dir,
    /// Used for every consensus authority once a bridge authority exists.
    AlternateDir,
    AlternateBridge,
}

impl AuthorityKind {
    fn option(self) -> &'static str {
        match self {
            AuthorityKind::Dir => "DirAuthority",
            AuthorityKind::AlternateDir => "AlternateDirAuthority",
            AuthorityKind::AlternateBridge => "AlternateBridgeAuthority",
        }
    }
}

/// One authority line as it appears in every node's config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityLine {
    pub kind: AuthorityKind,
    pub nick: String,
    pub ip: String,
    pub ipv6: Option<String>,
    pub or_port: u16,
    pub dir_port: u16,
    /// `dirserver_flags` plus `v3ident=` or `bridge`.
    pub flags: String,
    pub fingerprint: String,
}

impl fmt::Display for AuthorityLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} orport={}", self.kind.option(), self.nick, self.or_port)?;
        if let Some(v6) = &self.ipv6 {
            write!(f, " ipv6={}:{}", bracketed(v6), self.or_port)?;
        }
        writeln!(f, " {} {}:{} {}", self.flags, self.ip, self.dir_port, self.fingerprint)
    }
}

/// A `Bridge` line for bridge clients, with an optional pluggable transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeLine {
    pub transport: Option<String>,
    pub addr: String,
    pub port: u16,
    pub fingerprint: String,
    pub extra: Option<String>,
}

impl fmt::Display for BridgeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bridge ")?;
        if let Some(transport) = &self.transport {
            write!(f, "{transport} ")?;
        }
        write!(f, "{}:{} {}", self.addr, self.port, self.fingerprint)?;
        if let Some(extra) = &self.extra {
            write!(f, " {extra}")?;
        }
        writeln!(f)
    }
}

fn bracketed(v6: &str) -> String {
    format!("[{}]", v6.trim_start_matches('[').trim_end_matches(']'))
}

/// Fingerprint from `--list-fingerprint` output: the last line is
/// `<nick> <hex in groups of four>`.
pub fn parse_fingerprint(output: &str) -> Option<String> {
    let last = output.trim_end().lines().last()?;
    let fingerprint: String = last.split_whitespace().skip(1).collect();
    let valid = fingerprint.len() == FINGERPRINT_LEN
        && !fingerprint.bytes().any(|b| b.is_ascii_lowercase())
        && hex::decode(&fingerprint).is_ok();
    valid.then_some(fingerprint)
}

/// The v3 identity from an authority certificate's `fingerprint` line.
pub fn parse_v3ident(certificate: &str) -> Option<String> {
    certificate
        .lines()
        .find(|line| line.starts_with("fingerprint"))
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}

fn authority_files(keys: &Path) -> [PathBuf; 3] {
    [keys.join(IDENTITY_KEY), keys.join(SIGNING_KEY), keys.join(CERTIFICATE)]
}

/// Create the authority's identity key, signing key and certificate unless
/// all three exist. The nickname is the key passphrase.
async fn ensure_authority_keys(
    gencert: &Path,
    keys: &Path,
    nick: &str,
    lifetime_months: &str,
    dir_addr: &str,
) -> Result<()> {
    let [identity, signing, certificate] = authority_files(keys);
    if [&identity, &signing, &certificate].iter().all(|p| p.exists()) {
        debug!(%nick, "authority keys present");
        return Ok(());
    }
    info!(%nick, gencert = %gencert.display(), "creating authority identity key");
    let (identity, signing, certificate) = (
        identity.display().to_string(),
        signing.display().to_string(),
        certificate.display().to_string(),
    );
    let args: [&str; 13] = [
        "--create-identity-key",
        "--passphrase-fd",
        "0",
        "-i",
        &identity,
        "-s",
        &signing,
        "-c",
        &certificate,
        "-m",
        lifetime_months,
        "-a",
        dir_addr,
    ];
    let output = tools::run(gencert, &args, Some(&format!("{nick}\n")))
        .await
        .map_err(|e| Error::identity(nick, format!("cannot run {}: {e}", gencert.display())))?;
    if !output.status.success() {
        return Err(Error::identity(
            nick,
            format!("{} failed ({}): {}", gencert.display(), output.status, tools::combined(&output).trim()),
        ));
    }
    Ok(())
}

/// Ask the daemon for the relay's fingerprint. The config file need not
/// exist yet.
async fn router_fingerprint(daemon: &Path, layout: &NodeLayout, nick: &str) -> Result<String> {
    let torrc = layout.torrc().display().to_string();
    let dir = layout.dir.display().to_string();
    let args: [&str; 8] = [
        "--ignore-missing-torrc",
        "-f",
        &torrc,
        "--orport",
        "1",
        "--datadirectory",
        &dir,
        "--list-fingerprint",
    ];
    let output = tools::run(daemon, &args, None)
        .await
        .map_err(|e| Error::identity(nick, format!("cannot run {}: {e}", daemon.display())))?;
    let text = tools::combined(&output);
    parse_fingerprint(&text).ok_or_else(|| {
        Error::identity(
            nick,
            format!("no fingerprint in `{} --list-fingerprint` output: {:?}", daemon.display(), text.trim()),
        )
    })
}

async fn discover_node(topology: &Topology, renderer: &Renderer, node: &Node) -> Result<(NodeId, NodeIdentity)> {
    let settings = topology.settings();
    let layout = topology.layout(node);
    let nick = node.nick();
    make_private_dir(&layout.keys_dir())?;
    if node.roles.hidden_service {
        make_private_dir(&layout.hidden_service_dir())?;
    }

    let mut identity = NodeIdentity::default();
    if node.roles.authority {
        let bindings = renderer.bindings(node, settings);
        let lifetime = bindings.get("auth_cert_lifetime").unwrap_or("12");
        let dir_addr = format!("{}:{}", settings.listen_v4, node.port(settings.ports.dir_port));
        ensure_authority_keys(&settings.gencert, &layout.keys_dir(), &nick, lifetime, &dir_addr).await?;

        let cert_path = layout.keys_dir().join(CERTIFICATE);
        let cert = fs::read_to_string(&cert_path).map_err(|e| Error::io(&cert_path, e))?;
        identity.v3ident = Some(
            parse_v3ident(&cert).ok_or_else(|| Error::identity(&nick, "authority certificate has no fingerprint line"))?,
        );
    }
    if node.roles.relay {
        let daemon = node.binary.as_deref().unwrap_or(settings.daemon.as_path());
        identity.fingerprint = Some(router_fingerprint(daemon, &layout, &nick).await?);
    }
    debug!(%nick, ?identity, "identity known");
    Ok((node.id, identity))
}

/// Prepare every node's directory and keys, concurrently.
pub async fn discover(topology: &Topology, renderer: &Renderer) -> Result<BTreeMap<NodeId, NodeIdentity>> {
    let found = try_join_all(topology.nodes().iter().map(|n| discover_node(topology, renderer, n))).await?;
    Ok(found.into_iter().collect())
}

/// Authority and bridge lines for the whole network, in node order.
pub fn network_lines(
    topology: &Topology,
    renderer: &Renderer,
    identities: &BTreeMap<NodeId, NodeIdentity>,
) -> Result<NetworkLines> {
    let settings = topology.settings();
    let has_bridge_authority = topology.bridge_authority().is_some();
    let mut lines = NetworkLines::default();

    for node in topology.nodes() {
        let nick = node.nick();
        let identity = identities.get(&node.id).cloned().unwrap_or_default();
        let bindings = renderer.bindings(node, settings);
        let fingerprint = || {
            identity
                .fingerprint
                .clone()
                .ok_or_else(|| Error::identity(&nick, "no relay fingerprint"))
        };

        if node.roles.authority {
            let base_flags = bindings.get("dirserver_flags").unwrap_or("no-v2");
            let (kind, flags) = if node.roles.bridge_authority {
                (AuthorityKind::AlternateBridge, format!("{base_flags} bridge"))
            } else {
                let v3ident = identity
                    .v3ident
                    .as_deref()
                    .ok_or_else(|| Error::identity(&nick, "no v3 identity"))?;
                let kind = if has_bridge_authority {
                    AuthorityKind::AlternateDir
                } else {
                    AuthorityKind::Dir
                };
                (kind, format!("{base_flags} v3ident={v3ident}"))
            };
            let line = AuthorityLine {
                kind,
                nick: nick.clone(),
                ip: settings.listen_v4.clone(),
                ipv6: settings.listen_v6.clone(),
                or_port: node.port(settings.ports.or_port),
                dir_port: node.port(settings.ports.dir_port),
                flags,
                fingerprint: fingerprint()?,
            };
            lines.authorities.push_str(&line.to_string());
        }

        if node.roles.bridge {
            let transport = bindings.get("pt_transport").filter(|t| !t.is_empty());
            let port = match transport {
                Some(_) => node.port(settings.ports.pt_port),
                None => node.port(settings.ports.or_port),
            };
            let fingerprint = fingerprint()?;
            let bridge = |addr: String| BridgeLine {
                transport: transport.map(str::to_string),
                addr,
                port,
                fingerprint: fingerprint.clone(),
                extra: bindings.get("pt_extra").filter(|e| !e.is_empty()).map(str::to_string),
            };
            lines.bridges.push_str(&bridge(settings.listen_v4.clone()).to_string());
            if let Some(v6) = &settings.listen_v6 {
                lines.bridges.push_str(&bridge(bracketed(v6)).to_string());
            }
        }
    }
    Ok(lines)
}
