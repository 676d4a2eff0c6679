//! Settings resolved once from `CHUTNEY_*` environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chutney_topology::{DnsMode, NetworkSettings};

use crate::error::ConfigError;

/// Prefix of template overrides: `CHUTNEY_VAR_CONNLIMIT=10` binds `connlimit`.
pub const VAR_PREFIX: &str = "CHUTNEY_VAR_";

/// Which stages of a full test cycle run. A negative time budget in the
/// environment switches the matching stage off and leaves the network up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Wait for bootstrap after starting.
    pub wait: bool,
    /// Send traffic after bootstrapping.
    pub verify: bool,
    /// Stop the network at the end.
    pub stop: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait: true,
            verify: true,
            stop: true,
        }
    }
}

/// Everything the orchestrator reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub network: NetworkSettings,
    pub run: RunOptions,
    /// Verbose logging requested.
    pub debug: bool,
}

impl Settings {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Resolve settings from explicit name/value pairs. Unset variables keep
    /// their defaults; malformed ones are an error naming the variable.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = Env(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        let mut network = NetworkSettings::default();
        let mut run = RunOptions::default();

        if let Some(dir) = env.get("CHUTNEY_DATA_DIR") {
            network.data_root = PathBuf::from(dir);
        }
        if let Some(path) = env.get("CHUTNEY_TEMPLATE_PATH") {
            network.template_path = std::env::split_paths(path).collect();
        }
        if let Some(tor) = env.get("CHUTNEY_TOR") {
            network.daemon = PathBuf::from(tor);
            network.gencert = PathBuf::from(format!("{tor}-gencert"));
        }
        if let Some(gencert) = env.get("CHUTNEY_TOR_GENCERT") {
            network.gencert = PathBuf::from(gencert);
        }
        if let Some(addr) = env.get("CHUTNEY_LISTEN_ADDRESS") {
            network.listen_v4 = addr.to_string();
        }
        network.listen_v6 = env
            .get("CHUTNEY_LISTEN_ADDRESS_V6")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let timing = &mut network.timing;
        if let Some(secs) = env.parse::<i64>("CHUTNEY_START_TIME", "an integer number of seconds")? {
            timing.bootstrap_timeout = seconds(secs);
            run.wait = secs >= 0;
        }
        if let Some(secs) = env.parse::<i64>("CHUTNEY_BOOTSTRAP_TIME", "an integer number of seconds")? {
            timing.verify_timeout = seconds(secs);
            run.verify = secs >= 0;
        }
        if let Some(secs) = env.parse::<i64>("CHUTNEY_STOP_TIME", "an integer number of seconds")? {
            timing.stop_idle = seconds(secs);
            run.stop = secs >= 0;
        }
        if let Some(secs) = env.parse::<u64>("CHUTNEY_MIN_START_TIME", "a non-negative number of seconds")? {
            timing.min_start = Duration::from_secs(secs);
        }
        timing.leave_running = !(run.wait && run.verify && run.stop);

        let traffic = &mut network.traffic;
        if let Some(rounds) = env.parse("CHUTNEY_ROUNDS", "a positive integer")? {
            traffic.rounds = rounds;
        }
        if let Some(connections) = env.parse("CHUTNEY_CONNECTIONS", "a positive integer")? {
            traffic.connections = connections;
        }
        if let Some(bytes) = env.parse("CHUTNEY_DATA_BYTES", "a byte count")? {
            traffic.data_bytes = bytes;
        }
        if let Some(multi) = env.flag("CHUTNEY_HS_MULTI_CLIENT") {
            traffic.hs_multi_client = multi;
        }

        network.dns = match env.get("CHUTNEY_DNS_CONF") {
            None => DnsMode::default(),
            Some("") => DnsMode::DaemonDefault,
            Some(off) if off.eq_ignore_ascii_case("off") => DnsMode::Disabled,
            Some(path) => DnsMode::File(PathBuf::from(path)),
        };
        if let Some(sandbox) = env.flag("CHUTNEY_TOR_SANDBOX") {
            network.sandbox = sandbox;
        }

        if let Some(n) = env.parse("CHUTNEY_ALLOW_FAILURES", "a non-negative integer")? {
            network.allowed_failures = n;
        }
        network.controlling_pid = env
            .parse::<u32>("CHUTNEY_CONTROLLING_PID", "a process id")?
            .filter(|&pid| pid != 0);
        network.launch_phase = match env.parse::<u32>("CHUTNEY_LAUNCH_PHASE", "a launch phase (1 or more)")? {
            Some(0) => return Err(env.invalid("CHUTNEY_LAUNCH_PHASE", "a launch phase (1 or more)")),
            phase => phase,
        };

        network.env_vars = env
            .0
            .iter()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix(VAR_PREFIX)?;
                (!name.is_empty()).then(|| (name.to_ascii_lowercase(), v.clone()))
            })
            .collect();

        let debug = env.get("CHUTNEY_DEBUG").is_some_and(|v| !v.is_empty());
        Ok(Self { network, run, debug })
    }
}

/// Budgets are given in whole seconds; the sign only selects behaviour.
fn seconds(secs: i64) -> Duration {
    Duration::from_secs(secs.unsigned_abs())
}

struct Env(BTreeMap<String, String>);

impl Env {
    fn get(&self, var: &str) -> Option<&str> {
        self.0.get(var).map(String::as_str)
    }

    fn invalid(&self, var: &str, expected: &'static str) -> ConfigError {
        ConfigError {
            var: var.to_string(),
            expected,
            value: self.get(var).unwrap_or_default().to_string(),
        }
    }

    fn parse<T: FromStr>(&self, var: &str, expected: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(var).map(str::trim) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| self.invalid(var, expected)),
        }
    }

    /// Integers are true when non-zero; "false" and "no" are false, as is
    /// the empty string; anything else is true.
    fn flag(&self, var: &str) -> Option<bool> {
        let value = self.get(var)?.trim();
        if let Ok(n) = value.parse::<i64>() {
            return Some(n != 0);
        }
        let lower = value.to_ascii_lowercase();
        Some(!(lower.is_empty() || lower == "false" || lower == "no"))
    }
}
