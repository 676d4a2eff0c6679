//! Per-node configuration rendering.

use std::collections::BTreeMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use chutney_topology::{DnsMode, NetworkSettings, Node, NodeId, NodeLayout};

use crate::bindings::{BindingSource, Bindings};
use crate::error::{RenderError, Result};
use crate::filter::OptionFilter;
use crate::loader::TemplateLoader;

/// Network-wide variables filled in once node identities are known.
pub const NETWORK_VARS: &[&str] = &["authorities", "bridges"];

/// Declared defaults, the lowest-precedence layer.
const DEFAULTS: &[(&str, &str)] = &[
    ("connlimit", "60"),
    ("auth_cert_lifetime", "12"),
    ("dirserver_flags", "no-v2"),
    ("hs_directory", "hidden_service"),
    ("pt_transport", ""),
    ("pt_extra", ""),
];

/// A node's materialized configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub node: NodeId,
    pub nick: String,
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub pid_file: PathBuf,
    /// Control channel of the daemon.
    pub control_port: u16,
    pub text: String,
}

/// Renders node templates into config files.
#[derive(Debug, Clone)]
pub struct Renderer {
    loader: TemplateLoader,
    network_vars: BTreeMap<String, String>,
    filter: Option<OptionFilter>,
}

impl Renderer {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self {
            loader: TemplateLoader::new(search_path),
            network_vars: BTreeMap::new(),
            filter: None,
        }
    }

    /// Bind a network-wide value such as `authorities`.
    pub fn set_network_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.network_vars.insert(name.into(), value.into());
    }

    /// Comment out options the daemon rejects before writing.
    pub fn with_filter(mut self, filter: OptionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn loader(&self) -> &TemplateLoader {
        &self.loader
    }

    /// Every binding available to `node`, by layer.
    pub fn bindings(&self, node: &Node, settings: &NetworkSettings) -> Bindings {
        let layout = NodeLayout::new(settings, node);
        let ports = &settings.ports;
        let mut b = Bindings::new();

        b.extend(BindingSource::Node, node.vars.clone());
        let computed = [
            ("nick", node.nick()),
            ("tag", node.tag.clone()),
            ("nodenum", node.id.0.to_string()),
            ("torrc", node.template.clone()),
            ("dir", display(&layout.dir)),
            ("torrc_fname", display(&layout.torrc())),
            ("pidfile", display(&layout.pid_file())),
            ("lockfile", display(&layout.lock_file())),
            ("orport", node.port(ports.or_port).to_string()),
            ("dirport", node.port(ports.dir_port).to_string()),
            ("controlport", node.port(ports.control_port).to_string()),
            ("socksport", node.port(ports.socks_port).to_string()),
            ("extorport", node.port(ports.extor_port).to_string()),
            ("ptport", node.port(ports.pt_port).to_string()),
            ("launch_phase", node.launch_phase.to_string()),
            (
                "tor",
                display(node.binary.as_deref().unwrap_or(settings.daemon.as_path())),
            ),
        ];
        b.extend(BindingSource::Node, computed);

        b.extend(BindingSource::Global, self.network_vars.clone());
        b.set(BindingSource::Global, "ip", settings.listen_v4.clone());
        if let Some(v6) = &settings.listen_v6 {
            b.set(BindingSource::Global, "ipv6_addr", v6.clone());
        }
        b.set(BindingSource::Global, "net_base_dir", display(&settings.nodes_dir()));
        b.set(BindingSource::Global, "sandbox", if settings.sandbox { "1" } else { "0" });
        b.set(BindingSource::Global, "owning_controller_process", owning_controller_line(settings));
        b.set(BindingSource::Global, "server_dns_resolv_conf", dns_line(&settings.dns));
        b.set(BindingSource::Global, "data_bytes", settings.traffic.data_bytes.to_string());
        b.set(BindingSource::Global, "connection_count", settings.traffic.connections.to_string());
        b.set(
            BindingSource::Global,
            "hs_multi_client",
            if settings.traffic.hs_multi_client { "1" } else { "0" },
        );
        b.set(
            BindingSource::Global,
            "bootstrap_time",
            settings.timing.verify_timeout.as_secs().to_string(),
        );

        b.extend(BindingSource::Environment, settings.env_vars.clone());
        b.extend(BindingSource::Default, DEFAULTS.iter().copied());
        b
    }

    /// Render without touching the filesystem.
    pub fn prepare(&self, node: &Node, settings: &NetworkSettings) -> Result<RenderedConfig> {
        let template = self.loader.load(&node.template)?;
        let bindings = self.bindings(node, settings);
        let mut text = template.render(&bindings, &node.nick())?;
        if let Some(filter) = &self.filter {
            text = filter.apply(&text).0;
        }

        let layout = NodeLayout::new(settings, node);
        Ok(RenderedConfig {
            node: node.id,
            nick: node.nick(),
            config_path: layout.torrc(),
            pid_file: layout.pid_file(),
            dir: layout.dir,
            control_port: node.port(settings.ports.control_port),
            text,
        })
    }

    /// Fail fast if the node's template uses a variable nothing will bind.
    /// Network-wide variables count as bound even before they are known.
    pub fn check(&self, node: &Node, settings: &NetworkSettings) -> Result<()> {
        let template = self.loader.load(&node.template)?;
        let bindings = self.bindings(node, settings);
        let missing = template
            .free_vars()
            .into_iter()
            .find(|name| !bindings.contains(name) && !NETWORK_VARS.contains(&name.as_str()));
        match missing {
            Some(name) => Err(RenderError::MissingVariable {
                name,
                template: node.template.clone(),
                nick: node.nick(),
            }),
            None => Ok(()),
        }
    }

    /// Render and write the node's config, creating its directory.
    ///
    /// Rerunning with the same inputs leaves the file byte-identical and
    /// never removes anything else in the directory.
    pub fn render(&self, node: &Node, settings: &NetworkSettings) -> Result<RenderedConfig> {
        let rendered = self.prepare(node, settings)?;
        make_private_dir(&rendered.dir)?;
        if node.roles.hidden_service {
            make_private_dir(&NodeLayout::new(settings, node).hidden_service_dir())?;
        }

        let unchanged = fs::read_to_string(&rendered.config_path)
            .map(|existing| existing == rendered.text)
            .unwrap_or(false);
        if unchanged {
            debug!(nick = %rendered.nick, "config unchanged");
        } else {
            fs::write(&rendered.config_path, &rendered.text)
                .map_err(|e| RenderError::io(&rendered.config_path, e))?;
            debug!(nick = %rendered.nick, path = %rendered.config_path.display(), "wrote config");
        }
        Ok(rendered)
    }
}

/// Create a directory (and parents) readable only by its owner.
pub fn make_private_dir(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| RenderError::io(path, e))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn owning_controller_line(settings: &NetworkSettings) -> String {
    match settings.controlling_pid {
        Some(pid) if pid > 1 && !settings.timing.leave_running => {
            format!("__OwningControllerProcess {pid}")
        }
        pid => format!("#__OwningControllerProcess {}", pid.unwrap_or(0)),
    }
}

fn dns_line(dns: &DnsMode) -> String {
    match dns.resolv_conf() {
        Some(path) => format!("ServerDNSResolvConfFile {}", path.display()),
        None => "#ServerDNSResolvConfFile using the daemon's compile-time default".to_string(),
    }
}
