//! Summary statistics for a window of ping samples.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::PingSample;

/// Aggregates over a window, as shown next to a target's charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatistics {
    pub total_checks: usize,
    /// Mean of the non-null average RTTs.
    pub avg_rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub avg_packet_loss: Option<f64>,
    /// Share of samples where at least one packet came back.
    pub uptime_percentage: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    /// Average RTT of the newest sample, whatever window it falls in.
    pub current_rtt: Option<f64>,
}

/// Summarise samples in any order.
pub fn summarize(samples: &[PingSample]) -> TargetStatistics {
    let total_checks = samples.len();
    if total_checks == 0 {
        return TargetStatistics {
            total_checks,
            avg_rtt: None,
            min_rtt: None,
            max_rtt: None,
            avg_packet_loss: None,
            uptime_percentage: None,
            last_check: None,
            current_rtt: None,
        };
    }

    let avgs: Vec<f64> = samples.iter().filter_map(|s| s.avg_rtt).collect();
    let avg_rtt = (!avgs.is_empty()).then(|| avgs.iter().sum::<f64>() / avgs.len() as f64);
    let min_rtt = samples.iter().filter_map(|s| s.min_rtt).reduce(f64::min);
    let max_rtt = samples.iter().filter_map(|s| s.max_rtt).reduce(f64::max);

    let total_loss: f64 = samples.iter().map(|s| s.packet_loss).sum();
    let alive = samples.iter().filter(|s| s.is_alive).count();
    let newest = samples.iter().max_by_key(|s| s.time);

    TargetStatistics {
        total_checks,
        avg_rtt,
        min_rtt,
        max_rtt,
        avg_packet_loss: Some(total_loss / total_checks as f64),
        uptime_percentage: Some(alive as f64 * 100.0 / total_checks as f64),
        last_check: newest.map(|s| s.time),
        current_rtt: newest.and_then(|s| s.avg_rtt),
    }
}
