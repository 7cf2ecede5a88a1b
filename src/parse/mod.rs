//! Parsers for the text and JSON emitted by ping, traceroute and mtr.
//!
//! Everything here is a pure function over captured stdout.

mod mtr;
mod ping;
mod traceroute;

pub use mtr::*;
pub use ping::*;
pub use traceroute::*;

use thiserror::Error;

/// Longest slice of raw output kept on an error.
const RAW_EXCERPT_LEN: usize = 512;

/// Tool output that could not be understood.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("ping summary line not found")]
    MissingSummary { raw: String },
    #[error("malformed packet statistics: {line}")]
    MalformedStatistics { line: String },
    #[error("invalid mtr JSON: {message}")]
    InvalidMtrJson { message: String, raw: String },
}

impl ParseError {
    /// The output that failed to parse (possibly truncated).
    pub fn raw(&self) -> &str {
        match self {
            ParseError::MissingSummary { raw } => raw,
            ParseError::MalformedStatistics { line } => line,
            ParseError::InvalidMtrJson { raw, .. } => raw,
        }
    }
}

fn excerpt(raw: &str) -> String {
    if raw.len() <= RAW_EXCERPT_LEN {
        return raw.to_string();
    }
    let mut end = RAW_EXCERPT_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &raw[..end])
}
