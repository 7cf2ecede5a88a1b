//! Ping summary parsing for BSD and GNU ping.

use std::sync::OnceLock;

use regex::Regex;

use super::{excerpt, ParseError};
use crate::db::RttSummary;

/// Flavour of the host's ping binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS and the BSDs: `round-trip min/avg/max/stddev`, `-W` in milliseconds.
    Bsd,
    /// Linux iputils: `rtt min/avg/max/mdev`, `-W` in seconds.
    Gnu,
}

impl Platform {
    /// The flavour this binary was built for.
    pub fn host() -> Self {
        if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            Platform::Bsd
        } else {
            Platform::Gnu
        }
    }
}

/// Counters and RTT summary recovered from a ping run.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss: f64,
    /// Absent when nothing came back or the tool printed no RTT line.
    pub rtt: Option<RttSummary>,
}

fn stats_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<sent>\d+) packets transmitted, (?P<recv>\d+) (?:packets )?received.*?(?P<loss>[0-9.]+)% packet loss",
        )
        .unwrap()
    })
}

fn bsd_rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"min/avg/max/stddev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+)\s*ms").unwrap()
    })
}

fn gnu_rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"min/avg/max/mdev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+)\s*ms").unwrap()
    })
}

/// Parse the summary block of a ping run.
///
/// The platform picks which RTT format is tried first; the other is still
/// accepted. A missing statistics line is a [`ParseError`], which is not the
/// same as a run where zero packets came back.
pub fn parse_ping(output: &str, platform: Platform) -> Result<PingStats, ParseError> {
    let stats_line = output
        .lines()
        .find(|line| line.contains("packets transmitted"))
        .ok_or_else(|| ParseError::MissingSummary { raw: excerpt(output) })?;

    let malformed = || ParseError::MalformedStatistics {
        line: stats_line.trim().to_string(),
    };
    let caps = stats_regex().captures(stats_line).ok_or_else(malformed)?;
    let packets_sent: u32 = caps["sent"].parse().map_err(|_| malformed())?;
    let packets_received: u32 = caps["recv"].parse().map_err(|_| malformed())?;
    let packet_loss: f64 = caps["loss"].parse().map_err(|_| malformed())?;

    let rtt = output
        .lines()
        .find(|line| line.contains("min/avg/max"))
        .and_then(|line| parse_rtt_line(line, platform));

    Ok(PingStats {
        packets_sent,
        packets_received,
        packet_loss,
        rtt,
    })
}

fn parse_rtt_line(line: &str, platform: Platform) -> Option<RttSummary> {
    let (first, second) = match platform {
        Platform::Bsd => (bsd_rtt_regex(), gnu_rtt_regex()),
        Platform::Gnu => (gnu_rtt_regex(), bsd_rtt_regex()),
    };
    let caps = first.captures(line).or_else(|| second.captures(line))?;

    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    Some(RttSummary {
        min: field(1)?,
        avg: field(2)?,
        max: field(3)?,
        jitter: field(4)?,
    })
}
