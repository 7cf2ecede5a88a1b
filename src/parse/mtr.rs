//! MTR JSON report parsing (`mtr -j`).

use serde::Deserialize;

use super::{excerpt, ParseError};
use crate::db::Hop;

/// Host string mtr prints for a hop that never answered.
const NO_RESPONSE_HOST: &str = "???";

#[derive(Debug, Deserialize)]
struct MtrOutput {
    report: MtrReport,
}

#[derive(Debug, Deserialize)]
struct MtrReport {
    #[serde(default)]
    hubs: Vec<MtrHub>,
}

/// One hub as emitted by mtr. Keys are capitalised in the tool's output.
#[derive(Debug, Deserialize)]
struct MtrHub {
    host: Option<String>,
    #[serde(rename = "Loss%")]
    loss: Option<f64>,
    #[serde(rename = "Snt")]
    sent: Option<f64>,
    #[serde(rename = "Last")]
    last: Option<f64>,
    #[serde(rename = "Avg")]
    avg: Option<f64>,
    #[serde(rename = "Best")]
    best: Option<f64>,
    #[serde(rename = "Wrst")]
    worst: Option<f64>,
    #[serde(rename = "StDev")]
    std_dev: Option<f64>,
}

/// Parse an mtr JSON report into an ordered hop list.
///
/// Missing RTT fields fall back to the hop's average instead of failing, so
/// partial reports still yield hops. Missing loss and stddev read as 0.
pub fn parse_mtr_json(raw: &str) -> Result<Vec<Hop>, ParseError> {
    let output: MtrOutput = serde_json::from_str(raw).map_err(|e| ParseError::InvalidMtrJson {
        message: e.to_string(),
        raw: excerpt(raw),
    })?;

    let hops = output
        .report
        .hubs
        .into_iter()
        .enumerate()
        .map(|(index, hub)| {
            let (ip, hostname) = split_host(hub.host.as_deref());
            let avg = hub.avg;
            Hop {
                hop: index as u32 + 1,
                ip,
                hostname,
                rtts: Vec::new(),
                avg_rtt: avg,
                min_rtt: hub.best.or(avg),
                max_rtt: hub.worst.or(avg),
                last_rtt: hub.last.or(avg),
                std_dev: Some(hub.std_dev.unwrap_or(0.0)),
                sent: hub.sent.map(|s| s.max(0.0) as u32),
                loss: hub.loss.unwrap_or(0.0),
            }
        })
        .collect();

    Ok(hops)
}

/// Split mtr's host field into (ip, hostname).
///
/// With `-n` the field is a bare address; with name lookups and `-b` it reads
/// `name (address)`.
fn split_host(host: Option<&str>) -> (Option<String>, Option<String>) {
    let host = match host.map(str::trim) {
        None | Some("") | Some(NO_RESPONSE_HOST) => return (None, None),
        Some(h) => h,
    };

    if let Some((name, rest)) = host.split_once(" (") {
        if let Some(addr) = rest.strip_suffix(')') {
            return (Some(addr.to_string()), Some(name.to_string()));
        }
    }

    (Some(host.to_string()), Some(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
  "report": {
    "mtr": {"src": "probe", "dst": "8.8.8.8", "tos": 0, "tests": 10},
    "hubs": [
      {"count": 1, "host": "192.168.1.1", "Loss%": 0.0, "Snt": 10, "Last": 1.2, "Avg": 1.4, "Best": 1.0, "Wrst": 2.1, "StDev": 0.3},
      {"count": 2, "host": "???", "Loss%": 100.0, "Snt": 10, "Last": 0.0, "Avg": 0.0, "Best": 0.0, "Wrst": 0.0, "StDev": 0.0},
      {"count": 3, "host": "dns.google (8.8.8.8)", "Loss%": 10.0, "Snt": 10, "Avg": 12.5}
    ]
  }
}"#;

    #[test]
    fn test_parse_report() {
        let hops = parse_mtr_json(REPORT).unwrap();
        assert_eq!(hops.len(), 3);
        assert_eq!(hops.iter().map(|h| h.hop).collect::<Vec<_>>(), vec![1, 2, 3]);

        let first = &hops[0];
        assert_eq!(first.ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(first.avg_rtt, Some(1.4));
        assert_eq!(first.min_rtt, Some(1.0));
        assert_eq!(first.max_rtt, Some(2.1));
        assert_eq!(first.last_rtt, Some(1.2));
        assert_eq!(first.std_dev, Some(0.3));
        assert_eq!(first.sent, Some(10));
        assert_eq!(first.loss, 0.0);

        assert!(hops[1].ip.is_none());
        assert!(hops[1].hostname.is_none());
        assert_eq!(hops[1].loss, 100.0);

        let last = &hops[2];
        assert_eq!(last.ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(last.hostname.as_deref(), Some("dns.google"));
        assert_eq!(last.loss, 10.0);
    }

    #[test]
    fn test_missing_fields_fall_back_to_average() {
        let hops = parse_mtr_json(REPORT).unwrap();
        let partial = &hops[2];
        assert_eq!(partial.min_rtt, Some(12.5));
        assert_eq!(partial.max_rtt, Some(12.5));
        assert_eq!(partial.last_rtt, Some(12.5));
        assert_eq!(partial.std_dev, Some(0.0));
    }

    #[test]
    fn test_lowercase_keys_are_not_read() {
        let raw = r#"{"report": {"hubs": [{"host": "10.0.0.1", "avg": 5.0, "Avg": 7.0}]}}"#;
        let hops = parse_mtr_json(raw).unwrap();
        assert_eq!(hops[0].avg_rtt, Some(7.0));
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_mtr_json("mtr: command not found").unwrap_err();
        assert!(matches!(err, ParseError::InvalidMtrJson { .. }));
        assert_eq!(err.raw(), "mtr: command not found");

        assert!(parse_mtr_json(r#"{"hubs": []}"#).is_err());
    }

    #[test]
    fn test_empty_hubs() {
        assert!(parse_mtr_json(r#"{"report": {"mtr": {}}}"#).unwrap().is_empty());
    }
}
