//! Ping probe executor.

use std::time::Duration;

use chrono::Utc;

use super::{CommandRunner, ProbeConfig, ProbeError};
use crate::db::{PingSample, Target};
use crate::parse::{parse_ping, PingStats, Platform};

/// Extra seconds on top of the expected run time before ping is killed.
const PING_SLACK_SECS: u64 = 5;

/// Ping a target and return the resulting sample.
///
/// Never fails: a missing binary, a timeout or unreadable output all yield a
/// total-loss sample carrying the error text.
pub async fn run_ping(runner: &dyn CommandRunner, target: &Target, config: &ProbeConfig) -> PingSample {
    let time = Utc::now();

    match ping_host(runner, &target.host, config).await {
        Ok(stats) => PingSample::new(
            target.id,
            time,
            stats.packets_sent,
            stats.packets_received,
            stats.packet_loss,
            stats.rtt,
        ),
        Err(e) => {
            if let ProbeError::Parse(parse_err) = &e {
                tracing::debug!("Ping probe: raw output for {}: {}", target.host, parse_err.raw());
            }
            tracing::warn!("Ping probe failed for {} ({}): {}", target.name, target.host, e);
            PingSample::failed(target.id, time, config.ping_count, Some(e.to_string()))
        }
    }
}

async fn ping_host(
    runner: &dyn CommandRunner,
    host: &str,
    config: &ProbeConfig,
) -> Result<PingStats, ProbeError> {
    let args = ping_args(config.platform, config.ping_count, config.ping_wait, host);
    let output = runner
        .run("ping", &args, ping_timeout(config.ping_count, config.ping_wait))
        .await?;

    // GNU ping exits non-zero when nothing came back but still prints a
    // summary, so the exit status only matters when there is no summary.
    match parse_ping(&output.stdout, config.platform) {
        Ok(stats) => Ok(stats),
        Err(_) if !output.success => Err(ProbeError::Command(output.failure_message("ping"))),
        Err(e) => Err(e.into()),
    }
}

/// Command line for the host's ping flavour.
pub fn ping_args(platform: Platform, count: u32, wait: Duration, host: &str) -> Vec<String> {
    let wait = match platform {
        Platform::Bsd => wait.as_millis().max(1).to_string(),
        Platform::Gnu => wait.as_secs().max(1).to_string(),
    };
    vec![
        "-c".to_string(),
        count.to_string(),
        "-W".to_string(),
        wait,
        host.to_string(),
    ]
}

/// Ping sends one packet a second and then waits up to `wait` for the last
/// reply, so a lossy run lasts about `count - 1 + wait` seconds.
fn ping_timeout(count: u32, wait: Duration) -> Duration {
    let wait_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    Duration::from_secs(u64::from(count) + wait_secs.max(1) + PING_SLACK_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{Script, ScriptedRunner};

    const GNU_OK: &str = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.

--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 10.100/11.200/12.300/0.800 ms
";

    const GNU_LOSS: &str = "PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3071ms
";

    fn target() -> Target {
        Target {
            id: 7,
            name: "Google DNS".to_string(),
            host: "8.8.8.8".to_string(),
            ..Default::default()
        }
    }

    fn config() -> ProbeConfig {
        ProbeConfig {
            ping_count: 4,
            platform: Platform::Gnu,
            ..Default::default()
        }
    }

    fn assert_total_loss(sample: &PingSample) {
        assert_eq!(sample.packets_received, 0);
        assert!(!sample.is_alive);
        assert_eq!(sample.packet_loss, 100.0);
        assert!(sample.min_rtt.is_none() && sample.avg_rtt.is_none());
        assert!(sample.max_rtt.is_none() && sample.jitter.is_none());
    }

    #[test]
    fn test_ping_args() {
        let gnu = ping_args(Platform::Gnu, 10, Duration::from_secs(2), "example.com");
        assert_eq!(gnu, vec!["-c", "10", "-W", "2", "example.com"]);

        let bsd = ping_args(Platform::Bsd, 10, Duration::from_secs(2), "example.com");
        assert_eq!(bsd, vec!["-c", "10", "-W", "2000", "example.com"]);
    }

    #[test]
    fn test_ping_timeout_covers_reply_wait() {
        assert_eq!(ping_timeout(10, Duration::from_secs(2)), Duration::from_secs(17));
        assert_eq!(ping_timeout(10, Duration::from_millis(1500)), Duration::from_secs(17));
        assert_eq!(ping_timeout(1, Duration::ZERO), Duration::from_secs(7));

        for (count, wait) in [(10, 10), (30, 2), (4, 60)] {
            let lossy_run = Duration::from_secs(count - 1 + wait);
            assert!(ping_timeout(count as u32, Duration::from_secs(wait)) > lossy_run);
        }
    }

    #[tokio::test]
    async fn test_long_reply_wait_reaches_runner() {
        let partial = "--- 8.8.8.8 ping statistics ---
10 packets transmitted, 9 received, 10% packet loss, time 18021ms
rtt min/avg/max/mdev = 10.100/11.200/12.300/0.800 ms
";
        let runner = ScriptedRunner::new().on(
            "ping",
            Script::Exit { code: 1, stdout: partial.to_string(), stderr: String::new() },
        );
        let config = ProbeConfig {
            ping_count: 10,
            ping_wait: Duration::from_secs(10),
            platform: Platform::Gnu,
            ..Default::default()
        };
        let sample = run_ping(&runner, &target(), &config).await;

        assert_eq!(sample.packets_received, 9);
        assert_eq!(sample.packet_loss, 10.0);
        assert!(sample.is_alive);
        assert_eq!(runner.timeouts(), vec![Duration::from_secs(25)]);
        assert!(runner.timeouts()[0] > Duration::from_secs(10 - 1 + 10));
    }

    #[tokio::test]
    async fn test_successful_ping() {
        let runner = ScriptedRunner::new().on("ping", Script::ok(GNU_OK));
        let sample = run_ping(&runner, &target(), &config()).await;

        assert_eq!(sample.target_id, 7);
        assert!(sample.is_alive);
        assert_eq!(sample.packets_sent, 4);
        assert_eq!(sample.avg_rtt, Some(11.2));
        assert_eq!(sample.jitter, Some(0.8));
        assert!(sample.error.is_none());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.last().map(String::as_str), Some("8.8.8.8"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_with_summary_is_measured_loss() {
        let runner = ScriptedRunner::new().on(
            "ping",
            Script::Exit { code: 1, stdout: GNU_LOSS.to_string(), stderr: String::new() },
        );
        let sample = run_ping(&runner, &target(), &config()).await;
        assert_total_loss(&sample);
        assert!(sample.error.is_none());
    }

    #[tokio::test]
    async fn test_failures_become_loss_samples() {
        for script in [
            Script::Missing,
            Script::Timeout,
            Script::fail(2, "ping: unknown host"),
            Script::ok("garbage"),
        ] {
            let runner = ScriptedRunner::new().on("ping", script);
            let sample = run_ping(&runner, &target(), &config()).await;
            assert_total_loss(&sample);
            assert_eq!(sample.packets_sent, 4);
            assert!(sample.error.is_some());
        }
    }
}
