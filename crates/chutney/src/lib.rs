//! Chutney
//!
//! Builds, launches and checks throwaway overlay networks on one host.
//!
//! # Commands
//!
//! A [`Network`] wraps an expanded topology and the supervisor running it.
//! Every command of the binary is one method:
//! - `configure` checks templates, generates identities and renders configs
//! - `start`, `stop`, `restart`, `status` and `hup` manage the daemons
//! - `wait_for_bootstrap` blocks until the network has converged
//! - `verify` sends traffic through it and checks the echo
//!
//! # Configuration
//!
//! [`Settings::from_env`] reads every `CHUTNEY_*` variable once. Nothing
//! else consults the environment.
//!
//! # Retries
//!
//! [`run_attempts`] is the only place that retries. Runtime failures (a
//! daemon crash, a bootstrap timeout, failed traffic) start a fresh attempt
//! while the allowed-failure budget lasts. Description and template errors
//! fail at once, and an unsupported host exits with [`EXIT_UNSUPPORTED`].

mod attempt;
mod config;
mod error;
mod host;
mod identity;
mod network;
mod tools;

pub use attempt::{run_attempts, test_network};
pub use config::{RunOptions, Settings, VAR_PREFIX};
pub use error::{ConfigError, Error, Result, EXIT_UNSUPPORTED};
pub use host::{check_supported, ipv6_supported};
pub use identity::{
    discover as discover_identities, network_lines, parse_fingerprint, parse_v3ident, AuthorityKind,
    AuthorityLine, BridgeLine, NetworkLines, NodeIdentity,
};
pub use network::{Network, NetworkStatus, Phases};
pub use tools::{clean_version, is_legacy_version, parse_modules};
