//! Whole-network retries.
//!
//! Only this loop retries. Each attempt is independent: a fresh supervisor
//! and a fresh nodes directory, so earlier attempts stay on disk untouched.

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use chutney_supervisor::ProcessBackend;
use chutney_topology::{expand, NetworkDescription};

use crate::config::Settings;
use crate::error::Result;
use crate::network::Network;

/// Run `attempt` up to `allowed_failures + 1` times. Errors that would
/// repeat identically, an unsupported host among them, end the loop at
/// once. The last error is returned when the budget is spent.
pub async fn run_attempts<T, F, Fut>(allowed_failures: u32, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total = allowed_failures.saturating_add(1);
    let mut number = 0;
    loop {
        number += 1;
        info!(attempt = number, of = total, "starting attempt");
        match attempt(number).await {
            Ok(value) => {
                info!(attempt = number, "attempt succeeded");
                return Ok(value);
            }
            Err(e) if e.is_retryable() && number < total => {
                warn!(attempt = number, error = %e, "attempt failed, retrying");
            }
            Err(e) => {
                error!(attempt = number, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}

/// The full test cycle for a description under the attempt loop. Host
/// support is checked once, before the first attempt.
pub async fn test_network(
    desc: &NetworkDescription,
    settings: &Settings,
    backend: Arc<dyn ProcessBackend>,
) -> Result<()> {
    let topology = expand(desc, settings.network.clone())?;
    Network::with_backend(topology.clone(), backend.clone()).supported().await?;

    run_attempts(settings.network.allowed_failures, |_| {
        let network = Network::with_backend(topology.clone(), backend.clone());
        let run = settings.run;
        async move { network.test_network(run).await }
    })
    .await
}
