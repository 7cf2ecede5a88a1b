//! Probe executors for network monitoring.
//!
//! Runs ping, mtr and traceroute as subprocesses and turns their output into
//! samples. Executors never fail: a probe that cannot run or be understood
//! is recorded as a failure sample.

mod ping;
mod route;

pub use ping::*;
pub use route::*;

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::parse::{ParseError, Platform};

/// Bound on a whole mtr or traceroute run.
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{tool} is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },
    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },
    #[error("command failed: {0}")]
    Command(String),
    #[error("unrecognised output: {0}")]
    Parse(#[from] ParseError),
}

/// Probe tuning shared by all executors.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests per ping probe.
    pub ping_count: u32,
    /// How long ping waits for each reply.
    pub ping_wait: Duration,
    /// Pings mtr sends to every hop.
    pub mtr_count: u32,
    /// Traceroute max TTL.
    pub max_hops: u32,
    /// Bound on each route strategy.
    pub route_timeout: Duration,
    pub platform: Platform,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_count: 10,
            ping_wait: Duration::from_secs(2),
            mtr_count: 10,
            max_hops: 30,
            route_timeout: ROUTE_TIMEOUT,
            platform: Platform::host(),
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Describe a non-zero exit for an error message.
    pub fn failure_message(&self, tool: &str) -> String {
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{} exited with {}", tool, code)
        } else {
            format!("{} exited with {}: {}", tool, code, stderr)
        }
    }
}

/// Runs an external tool with a hard time bound.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProbeError>;
}

/// Runs tools as real subprocesses. A subprocess that outlives its timeout
/// is killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProbeError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Dropping the future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => {
                return Err(ProbeError::ToolTimeout {
                    tool: program.to_string(),
                    timeout,
                })
            }
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(ProbeError::ToolUnavailable {
                    tool: program.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(ProbeError::Command(format!("failed to execute {}: {}", program, e)))
            }
            Ok(Ok(output)) => output,
        };

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
