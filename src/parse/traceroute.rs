//! Traceroute text parsing.

use std::net::IpAddr;

use crate::db::Hop;

/// At most this many RTTs are kept per hop (traceroute's default `-q 3`).
const MAX_RTTS_PER_HOP: usize = 3;

/// Parse traceroute output into an ordered hop list.
///
/// Lines whose first token is not a hop number (the `traceroute to ...`
/// header, continuation lines for extra responders) are skipped. Hops are
/// numbered from 1 in output order. A hop whose probes all timed out has no
/// ip, no hostname and no RTTs.
pub fn parse_traceroute(output: &str) -> Vec<Hop> {
    let mut hops = Vec::new();

    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        if first.parse::<u32>().is_err() {
            continue;
        }

        let rest: Vec<&str> = tokens.collect();
        let mut hop = parse_hop_tokens(&rest);
        hop.hop = hops.len() as u32 + 1;
        hops.push(hop);
    }

    hops
}

fn parse_hop_tokens(tokens: &[&str]) -> Hop {
    let mut ip: Option<String> = None;
    let mut hostname: Option<String> = None;
    let mut rtts: Vec<f64> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];

        // `12.3 ms`
        if tokens.get(i + 1) == Some(&"ms") {
            if let Ok(rtt) = tok.parse::<f64>() {
                if rtts.len() < MAX_RTTS_PER_HOP {
                    rtts.push(rtt);
                }
                i += 2;
                continue;
            }
        }
        // `12.3ms`
        if let Some(rtt) = tok.strip_suffix("ms").and_then(|v| v.parse::<f64>().ok()) {
            if rtts.len() < MAX_RTTS_PER_HOP {
                rtts.push(rtt);
            }
            i += 1;
            continue;
        }

        // Timeouts and ICMP annotations such as !H or !N.
        if tok == "*" || tok == "ms" || tok.starts_with('!') {
            i += 1;
            continue;
        }

        if ip.is_none() && hostname.is_none() {
            if let Some(inner) = tokens
                .get(i + 1)
                .and_then(|t| t.strip_prefix('('))
                .and_then(|t| t.strip_suffix(')'))
            {
                hostname = Some(tok.to_string());
                ip = Some(inner.to_string());
                i += 2;
                continue;
            }
            if tok.parse::<IpAddr>().is_ok() {
                ip = Some(tok.to_string());
            } else {
                hostname = Some(tok.to_string());
            }
        }
        i += 1;
    }

    let avg_rtt = if rtts.is_empty() {
        None
    } else {
        Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
    };
    let min_rtt = rtts.iter().copied().reduce(f64::min);
    let max_rtt = rtts.iter().copied().reduce(f64::max);

    Hop {
        hop: 0,
        ip,
        hostname,
        last_rtt: rtts.last().copied(),
        rtts,
        avg_rtt,
        min_rtt,
        max_rtt,
        std_dev: None,
        sent: None,
        loss: 0.0,
    }
}
