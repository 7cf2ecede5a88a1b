//! Route probe executor: mtr first, traceroute as the fallback.

use chrono::Utc;

use super::{CommandRunner, ProbeConfig, ProbeError};
use crate::db::{Hop, RouteSample, RouteSource, Target};
use crate::parse::{parse_mtr_json, parse_traceroute};

/// One way of tracing a path to a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStrategy {
    Mtr,
    Traceroute,
}

/// Strategies tried in order until one succeeds.
pub const DEFAULT_ROUTE_STRATEGIES: [RouteStrategy; 2] = [RouteStrategy::Mtr, RouteStrategy::Traceroute];

/// A successfully traced path.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub hops: Vec<Hop>,
    pub destination_reached: bool,
}

impl RouteStrategy {
    pub fn program(&self) -> &'static str {
        match self {
            RouteStrategy::Mtr => "mtr",
            RouteStrategy::Traceroute => "traceroute",
        }
    }

    pub fn source(&self) -> RouteSource {
        match self {
            RouteStrategy::Mtr => RouteSource::Mtr,
            RouteStrategy::Traceroute => RouteSource::Traceroute,
        }
    }

    pub fn args(&self, host: &str, config: &ProbeConfig) -> Vec<String> {
        match self {
            RouteStrategy::Mtr => vec![
                "-c".to_string(),
                config.mtr_count.to_string(),
                "-n".to_string(),
                "-b".to_string(),
                "-j".to_string(),
                host.to_string(),
            ],
            RouteStrategy::Traceroute => vec![
                "-n".to_string(),
                "-m".to_string(),
                config.max_hops.to_string(),
                "-w".to_string(),
                "2".to_string(),
                "-q".to_string(),
                "3".to_string(),
                host.to_string(),
            ],
        }
    }

    /// Run this strategy once against `host`.
    ///
    /// An mtr run counts as reaching the destination only when its last hop
    /// answered with an IP, rather than on every successful run, and an
    /// empty hub list is a failure so the traceroute fallback gets a turn.
    pub async fn trace(
        &self,
        runner: &dyn CommandRunner,
        host: &str,
        config: &ProbeConfig,
    ) -> Result<Trace, ProbeError> {
        let program = self.program();
        let output = runner
            .run(program, &self.args(host, config), config.route_timeout)
            .await?;
        if !output.success {
            return Err(ProbeError::Command(output.failure_message(program)));
        }

        match self {
            RouteStrategy::Mtr => {
                let hops = parse_mtr_json(&output.stdout)?;
                if hops.is_empty() {
                    return Err(ProbeError::Command("mtr reported no hops".to_string()));
                }
                let destination_reached = hops.last().is_some_and(|h| h.ip.is_some());
                Ok(Trace { hops, destination_reached })
            }
            RouteStrategy::Traceroute => {
                let hops = parse_traceroute(&output.stdout);
                let destination_reached = !hops.is_empty();
                Ok(Trace { hops, destination_reached })
            }
        }
    }
}

/// Trace the route to a target with the default strategy chain.
pub async fn run_route(runner: &dyn CommandRunner, target: &Target, config: &ProbeConfig) -> RouteSample {
    run_route_with(runner, target, config, &DEFAULT_ROUTE_STRATEGIES).await
}

/// Try each strategy in order and record the first success.
///
/// When every strategy fails the result is a zero-hop sample listing each
/// failure. Nothing is retried within the call.
pub async fn run_route_with(
    runner: &dyn CommandRunner,
    target: &Target,
    config: &ProbeConfig,
    strategies: &[RouteStrategy],
) -> RouteSample {
    let time = Utc::now();
    let mut failures = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        match strategy.trace(runner, &target.host, config).await {
            Ok(trace) => {
                tracing::debug!(
                    "Route probe: {} traced {} hops to {}",
                    strategy.program(),
                    trace.hops.len(),
                    target.host
                );
                return RouteSample::new(
                    target.id,
                    time,
                    trace.hops,
                    trace.destination_reached,
                    strategy.source(),
                );
            }
            Err(e) => {
                if let ProbeError::Parse(parse_err) = &e {
                    tracing::debug!(
                        "Route probe: raw {} output for {}: {}",
                        strategy.program(),
                        target.host,
                        parse_err.raw()
                    );
                }
                tracing::warn!(
                    "Route probe: {} failed for {} ({}): {}",
                    strategy.program(),
                    target.name,
                    target.host,
                    e
                );
                failures.push(format!("{}: {}", strategy.program(), e));
            }
        }
    }

    if failures.is_empty() {
        failures.push("no route strategies configured".to_string());
    }
    RouteSample::failed(target.id, time, failures.join("; "))
}
