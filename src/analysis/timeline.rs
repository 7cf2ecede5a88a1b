//! Loss and latency-spike classification for timeline display.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::PingSample;

/// Largest trailing window used for the local spike test.
const MAX_LOCAL_WINDOW: usize = 5;
/// IQR multiplier for the upper fence.
const IQR_FENCE: f64 = 1.5;
/// A sample this many times the median is a spike candidate.
const RELATIVE_FACTOR: f64 = 1.5;
/// Never flag anything within this many ms of the median.
const ABSOLUTE_MARGIN_MS: f64 = 5.0;
/// Local spike: more than this multiple of the trailing mean...
const LOCAL_FACTOR: f64 = 2.0;
/// ...or more than this many ms above it.
const LOCAL_MARGIN_MS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    None,
    Loss,
    Spike,
}

/// Classification of one ping sample. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub time: DateTime<Utc>,
    pub has_anomaly: bool,
    pub kind: AnomalyKind,
    pub packet_loss: f64,
    pub avg_rtt: Option<f64>,
}

impl TimelinePoint {
    fn new(sample: &PingSample, kind: AnomalyKind) -> Self {
        Self {
            time: sample.time,
            has_anomaly: kind != AnomalyKind::None,
            kind,
            packet_loss: sample.packet_loss,
            avg_rtt: sample.avg_rtt,
        }
    }
}

/// Classify every sample of a chronologically ordered window.
///
/// Any loss is a loss anomaly. Otherwise a sample is a spike when its
/// average RTT exceeds the window-wide threshold (see [`spike_threshold`])
/// or jumps well above the mean of the few samples before it.
pub fn compute_timeline(samples: &[PingSample]) -> Vec<TimelinePoint> {
    let mut rtts: Vec<f64> = samples.iter().filter_map(|s| s.avg_rtt).collect();
    rtts.sort_by(f64::total_cmp);
    let threshold = spike_threshold(&rtts);
    let window = local_window_size(samples.len());

    samples
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            if sample.packet_loss > 0.0 {
                return TimelinePoint::new(sample, AnomalyKind::Loss);
            }
            let (Some(rtt), Some(threshold)) = (sample.avg_rtt, threshold) else {
                return TimelinePoint::new(sample, AnomalyKind::None);
            };

            let exceeds_global = rtt > threshold;
            let exceeds_local = index >= window
                && trailing_mean(&samples[index - window..index])
                    .is_some_and(|mean| rtt > mean * LOCAL_FACTOR || rtt > mean + LOCAL_MARGIN_MS);

            let kind = if exceeds_global || exceeds_local {
                AnomalyKind::Spike
            } else {
                AnomalyKind::None
            };
            TimelinePoint::new(sample, kind)
        })
        .collect()
}

/// Window-wide spike threshold over sorted average RTTs.
///
/// The tighter of the IQR fence and 1.5x the median, but never below the
/// median plus a fixed margin. Quartiles and median are taken by index.
pub fn spike_threshold(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let at = |q: f64| sorted[((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1)];
    let (q1, median, q3) = (at(0.25), at(0.5), at(0.75));

    let iqr_upper = q3 + IQR_FENCE * (q3 - q1);
    let relative = median * RELATIVE_FACTOR;
    let floor = median + ABSOLUTE_MARGIN_MS;
    Some(iqr_upper.min(relative).max(floor))
}

fn local_window_size(len: usize) -> usize {
    (len / 10).clamp(1, MAX_LOCAL_WINDOW)
}

fn trailing_mean(samples: &[PingSample]) -> Option<f64> {
    let rtts: Vec<f64> = samples.iter().filter_map(|s| s.avg_rtt).collect();
    if rtts.is_empty() {
        return None;
    }
    Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
}
