//! chutney - configure, run and check a local test network
//!
//! Usage:
//!   chutney <command> <network.json>
//!
//! Settings come from `CHUTNEY_*` environment variables. Exit status is 0 on
//! success, 77 when the host cannot run the network, 1 otherwise.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chutney::{Error, Network, Result, Settings};
use chutney_supervisor::LocalBackend;
use chutney_topology::{expand, NetworkDescription};
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn print_usage() {
    eprintln!("chutney - Local overlay test networks");
    eprintln!();
    eprintln!("Usage: chutney <command> <network.json>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  configure           Generate keys and write every node's config");
    eprintln!("  start               Start the nodes of the current launch phase");
    eprintln!("  stop                Stop them");
    eprintln!("  restart             Stop, then start");
    eprintln!("  status              Report which nodes are running");
    eprintln!("  hup                 Send SIGHUP to running nodes");
    eprintln!("  wait_for_bootstrap  Wait until the network has converged");
    eprintln!("  verify              Send traffic through the network");
    eprintln!("  supported           Check this host can run the network (77 if not)");
    eprintln!("  print_phases        Print the config and launch phases in use");
    eprintln!("  test-network        All of the above, retried on failure");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CHUTNEY_DATA_DIR        Where node directories go (default: net)");
    eprintln!("  CHUTNEY_TOR             Daemon binary (default: tor)");
    eprintln!("  CHUTNEY_START_TIME      Bootstrap wait in seconds, negative to leave running");
    eprintln!("  CHUTNEY_BOOTSTRAP_TIME  Verification budget in seconds");
    eprintln!("  CHUTNEY_ALLOW_FAILURES  Extra attempts for test-network");
    eprintln!("  CHUTNEY_DEBUG           Verbose logging when non-empty");
}

fn init_tracing(debug: bool) {
    let default = if debug { "chutney=debug" } else { "chutney=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_description(path: &Path) -> Result<NetworkDescription> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(NetworkDescription::from_json(&text)?)
}

/// Run one command. `Ok(false)` is a negative answer rather than a failure.
async fn run(command: &str, network_file: &Path, mut settings: Settings) -> Result<bool> {
    let desc = load_description(network_file)?;

    if matches!(command, "test-network" | "test_network") {
        if !settings.network.timing.leave_running {
            settings.network.controlling_pid.get_or_insert(std::process::id());
        }
        chutney::test_network(&desc, &settings, Arc::new(LocalBackend::new())).await?;
        return Ok(true);
    }

    let network = Network::new(expand(&desc, settings.network)?);
    match command {
        "configure" => {
            network.configure().await?;
        }
        "start" => network.start().await?,
        "stop" => {
            network.stop().await?;
        }
        "restart" => network.restart().await?,
        "status" => {
            let status = network.status().await?;
            println!("{}/{} nodes are running", status.running, status.expected);
            return Ok(status.all_running());
        }
        "hup" => {
            network.hup().await?;
        }
        "wait_for_bootstrap" => {
            network.wait_for_bootstrap().await?;
        }
        "verify" => {
            network.verify().await?;
        }
        "supported" => network.supported().await?,
        "print_phases" => {
            let phases = network.phases();
            let join = |p: &[u32]| p.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
            println!("CHUTNEY_CONFIG_PHASES={}", join(&phases.config));
            println!("CHUTNEY_LAUNCH_PHASES={}", join(&phases.launch));
        }
        other => return Err(Error::Usage(format!("unknown command: {other}"))),
    }
    Ok(true)
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("chutney: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(settings.debug);

    if args.len() != 3 {
        print_usage();
        std::process::exit(1);
    }

    match run(&args[1], Path::new(&args[2]), settings).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if matches!(e, Error::Usage(_)) {
                print_usage();
            }
            error!(command = %args[1], error = %e, "command failed");
            std::process::exit(e.exit_code());
        }
    }
}
