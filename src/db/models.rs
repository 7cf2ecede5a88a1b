//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: i64,
    pub name: String,
    /// IP address or DNS name handed to the probe tools.
    pub host: String,
    pub group: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            host: String::new(),
            group: None,
            description: None,
            enabled: true,
        }
    }
}

/// Result of one ping probe against a target.
///
/// When no packet came back every RTT field is `None`, loss is 100 and the
/// sample is not alive. Use [`PingSample::failed`] or [`PingSample::new`] to
/// build one so that invariant holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingSample {
    pub target_id: i64,
    pub time: DateTime<Utc>,
    pub packets_sent: u32,
    pub packets_received: u32,
    /// Percentage in `0..=100`.
    pub packet_loss: f64,
    pub min_rtt: Option<f64>,
    pub avg_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    /// Standard deviation of the RTTs in this probe.
    pub jitter: Option<f64>,
    pub is_alive: bool,
    /// Why the probe failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Round-trip summary reported by a ping tool, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub jitter: f64,
}

impl PingSample {
    /// Build a sample from parsed counters, normalising the loss invariants.
    pub fn new(
        target_id: i64,
        time: DateTime<Utc>,
        packets_sent: u32,
        packets_received: u32,
        packet_loss: f64,
        rtt: Option<RttSummary>,
    ) -> Self {
        let packets_received = packets_received.min(packets_sent);
        if packets_received == 0 {
            let mut sample = Self::failed(target_id, time, packets_sent, None);
            sample.error = None;
            return sample;
        }

        Self {
            target_id,
            time,
            packets_sent,
            packets_received,
            packet_loss: packet_loss.clamp(0.0, 100.0),
            min_rtt: rtt.map(|r| r.min),
            avg_rtt: rtt.map(|r| r.avg),
            max_rtt: rtt.map(|r| r.max),
            jitter: rtt.map(|r| r.jitter),
            is_alive: true,
            error: None,
        }
    }

    /// A total-loss sample, recorded when the probe could not run or its
    /// output could not be understood.
    pub fn failed(target_id: i64, time: DateTime<Utc>, packets_sent: u32, error: Option<String>) -> Self {
        Self {
            target_id,
            time,
            packets_sent,
            packets_received: 0,
            packet_loss: 100.0,
            min_rtt: None,
            avg_rtt: None,
            max_rtt: None,
            jitter: None,
            is_alive: false,
            error,
        }
    }
}

/// One router along a traced path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    /// 1-based position in the path.
    pub hop: u32,
    /// `None` when the hop did not answer.
    pub ip: Option<String>,
    pub hostname: Option<String>,
    /// Raw per-query RTTs (traceroute only; MTR reports aggregates).
    #[serde(default)]
    pub rtts: Vec<f64>,
    pub avg_rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub last_rtt: Option<f64>,
    pub std_dev: Option<f64>,
    /// Pings sent to this hop (MTR only).
    pub sent: Option<u32>,
    /// Loss percentage at this hop. Always 0 for traceroute.
    pub loss: f64,
}

/// Which tool produced a route sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Mtr,
    Traceroute,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Mtr => "mtr",
            RouteSource::Traceroute => "traceroute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mtr" => Some(RouteSource::Mtr),
            "traceroute" => Some(RouteSource::Traceroute),
            _ => None,
        }
    }
}

/// Result of one route probe against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSample {
    pub target_id: i64,
    pub time: DateTime<Utc>,
    pub hops: Vec<Hop>,
    pub destination_reached: bool,
    pub total_hops: u32,
    /// `None` when every strategy failed.
    pub source: Option<RouteSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouteSample {
    pub fn new(
        target_id: i64,
        time: DateTime<Utc>,
        hops: Vec<Hop>,
        destination_reached: bool,
        source: RouteSource,
    ) -> Self {
        Self {
            target_id,
            time,
            total_hops: hops.len() as u32,
            hops,
            destination_reached,
            source: Some(source),
            error: None,
        }
    }

    /// The zero-hop result recorded after every strategy failed.
    pub fn failed(target_id: i64, time: DateTime<Utc>, error: String) -> Self {
        Self {
            target_id,
            time,
            hops: Vec::new(),
            destination_reached: false,
            total_hops: 0,
            source: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_received_clears_rtt() {
        let rtt = RttSummary { min: 1.0, avg: 2.0, max: 3.0, jitter: 0.5 };
        let sample = PingSample::new(1, Utc::now(), 10, 0, 40.0, Some(rtt));

        assert!(!sample.is_alive);
        assert_eq!(sample.packet_loss, 100.0);
        assert!(sample.min_rtt.is_none());
        assert!(sample.avg_rtt.is_none());
        assert!(sample.max_rtt.is_none());
        assert!(sample.jitter.is_none());
        assert!(sample.error.is_none());
    }

    #[test]
    fn test_received_never_exceeds_sent() {
        let sample = PingSample::new(1, Utc::now(), 5, 7, 0.0, None);
        assert_eq!(sample.packets_received, 5);
        assert!(sample.is_alive);
    }

    #[test]
    fn test_route_sample_counts_hops() {
        let hop = Hop {
            hop: 1,
            ip: Some("10.0.0.1".to_string()),
            hostname: None,
            rtts: vec![1.0],
            avg_rtt: Some(1.0),
            min_rtt: Some(1.0),
            max_rtt: Some(1.0),
            last_rtt: None,
            std_dev: None,
            sent: None,
            loss: 0.0,
        };
        let sample = RouteSample::new(3, Utc::now(), vec![hop.clone(), hop], true, RouteSource::Traceroute);
        assert_eq!(sample.total_hops, 2);

        let failed = RouteSample::failed(3, Utc::now(), "boom".to_string());
        assert_eq!(failed.total_hops, 0);
        assert!(!failed.destination_reached);
        assert!(failed.source.is_none());
    }
}
