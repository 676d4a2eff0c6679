//! Rounds of concurrent streams and their throughput.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use chutney_topology::{NodeId, Topology};

use crate::echo::EchoListener;
use crate::error::{Result, TrafficError};
use crate::payload::Payload;
use crate::plan::{StreamSpec, TrafficPlan};
use crate::socks;

/// Throughput is only reported once this much data crossed the network.
pub const MIN_REPORT_BYTES: u64 = 5 * 1024 * 1024;
/// ...and the round took at least this long.
pub const MIN_REPORT_ELAPSED: Duration = Duration::from_secs(1);

/// A stream that has not completed within this long fails.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

const READ_BUF: usize = 64 * 1024;
const MIB: f64 = 1024.0 * 1024.0;

/// MiB/s figures for one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Payload over the slowest stream's duration.
    pub single_stream: f64,
    /// Data relayed by all daemons on all paths over the round's duration.
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub name: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub streams: Vec<StreamReport>,
    pub elapsed: Duration,
    /// Present only when enough data moved for the figures to mean anything.
    pub throughput: Option<Throughput>,
}

impl RoundReport {
    fn new(streams: Vec<StreamReport>, elapsed: Duration, payload: u64, path_nodes: u64) -> Self {
        let cumulative = payload.saturating_mul(path_nodes);
        let throughput = (cumulative >= MIN_REPORT_BYTES && elapsed >= MIN_REPORT_ELAPSED).then(|| {
            let slowest = streams
                .iter()
                .map(|s| s.elapsed)
                .max()
                .unwrap_or(elapsed)
                .max(Duration::from_millis(1));
            Throughput {
                single_stream: payload as f64 / slowest.as_secs_f64() / MIB,
                overall: cumulative as f64 / elapsed.as_secs_f64() / MIB,
            }
        });
        Self {
            streams,
            elapsed,
            throughput,
        }
    }
}

/// Sends the payload over every planned stream and checks the echo.
pub struct TrafficEngine {
    plan: TrafficPlan,
    payload: Payload,
    rounds: u32,
    stream_timeout: Duration,
}

impl TrafficEngine {
    pub fn new(plan: TrafficPlan, payload: Payload, rounds: u32) -> Self {
        Self {
            plan,
            payload,
            rounds: rounds.max(1),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    /// Plan and random payload for a running network.
    pub fn for_topology(topology: &Topology, onions: &BTreeMap<NodeId, String>) -> Result<Self> {
        let traffic = topology.settings().traffic;
        let plan = TrafficPlan::build(topology, onions)?;
        let payload = Payload::random(traffic.data_bytes, &mut rand::thread_rng());
        Ok(Self::new(plan, payload, traffic.rounds))
    }

    pub fn with_stream_timeout(mut self, stream_timeout: Duration) -> Self {
        self.stream_timeout = stream_timeout;
        self
    }

    pub fn plan(&self) -> &TrafficPlan {
        &self.plan
    }

    /// Bring up the echo listener and run every round. The first failing
    /// stream fails the whole run. Returns the last round's report.
    pub async fn run(&self) -> Result<RoundReport> {
        let _listener = EchoListener::bind(self.plan.listen)?;
        for spec in &self.plan.streams {
            info!(
                stream = %spec.name,
                target = %spec.target.host(),
                port = spec.target.port(),
                proxy = %spec.proxy,
                "connecting"
            );
        }

        let mut report = self.run_round().await?;
        log_round(1, &report);
        for round in 2..=self.rounds {
            report = self.run_round().await?;
            log_round(round, &report);
        }
        Ok(report)
    }

    /// One round: all streams concurrently, then a barrier.
    pub async fn run_round(&self) -> Result<RoundReport> {
        let started = Instant::now();
        let results = join_all(self.plan.streams.iter().map(|s| self.timed_stream(s))).await;
        let elapsed = started.elapsed();

        let mut streams = Vec::with_capacity(results.len());
        let mut first_err = None;
        for result in results {
            match result {
                Ok(report) => streams.push(report),
                Err(e) => {
                    warn!(error = %e, "stream failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(RoundReport::new(
            streams,
            elapsed,
            self.payload.len(),
            self.plan.path_nodes(),
        ))
    }

    async fn timed_stream(&self, spec: &StreamSpec) -> Result<StreamReport> {
        timeout(self.stream_timeout, run_stream(spec, &self.payload))
            .await
            .map_err(|_| TrafficError::StreamTimeout {
                stream: spec.name.clone(),
                after: self.stream_timeout,
            })?
    }
}

fn log_round(round: u32, report: &RoundReport) {
    info!(
        round,
        streams = report.streams.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "round complete"
    );
    if let Some(t) = report.throughput {
        info!(
            single_stream_mib_s = format_args!("{:.2}", t.single_stream),
            overall_mib_s = format_args!("{:.2}", t.overall),
            "bandwidth"
        );
    }
}

async fn run_stream(spec: &StreamSpec, payload: &Payload) -> Result<StreamReport> {
    let started = Instant::now();
    let mut tcp = socks::connect(&spec.name, spec.proxy, spec.target.host(), spec.target.port()).await?;
    let (mut rd, mut wr) = tcp.split();

    let send = async {
        for _ in 0..payload.repetitions() {
            wr.write_all(payload.chunk())
                .await
                .map_err(|source| TrafficError::Transfer {
                    stream: spec.name.clone(),
                    received: 0,
                    source,
                })?;
        }
        Ok::<_, TrafficError>(())
    };

    let recv = async {
        let mut buf = vec![0u8; READ_BUF];
        let mut received = 0u64;
        while received < payload.len() {
            let n = rd.read(&mut buf).await.map_err(|source| TrafficError::Transfer {
                stream: spec.name.clone(),
                received,
                source,
            })?;
            if n == 0 {
                return Err(TrafficError::Transfer {
                    stream: spec.name.clone(),
                    received,
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                });
            }
            if let Some(offset) = payload.first_mismatch(received, &buf[..n]) {
                return Err(TrafficError::Mismatch {
                    stream: spec.name.clone(),
                    offset,
                });
            }
            received += n as u64;
        }
        Ok(received)
    };

    let ((), bytes) = tokio::try_join!(send, recv)?;
    debug!(stream = %spec.name, bytes, "verified");
    Ok(StreamReport {
        name: spec.name.clone(),
        bytes,
        elapsed: started.elapsed(),
    })
}
