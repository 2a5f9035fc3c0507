// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-timeout subprocess execution for engine binaries.
//!
//! Submission and queue-query commands (`qsub`, `squeue`, ...) must never
//! stall the manager tick; everything runs with a hard timeout and the
//! child is killed when the deadline passes.

use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Timeout for submission binaries.
pub const SUBMIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for queue-state queries.
pub const QUERY_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{what} timed out after {timeout:?}")]
    Timeout { what: String, timeout: Duration },
    #[error("{what} failed to start: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a command to completion with a timeout, capturing output.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    what: &str,
) -> Result<Output, SubprocessError> {
    cmd.kill_on_drop(true);
    cmd.stdin(std::process::Stdio::null());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(SubprocessError::Spawn {
            what: what.to_string(),
            source,
        }),
        Err(_) => {
            tracing::warn!(command = what, ?timeout, "engine command timed out");
            Err(SubprocessError::Timeout {
                what: what.to_string(),
                timeout,
            })
        }
    }
}

/// Run a command with a string piped to stdin (batch submit scripts).
pub async fn run_with_stdin(
    mut cmd: Command,
    stdin: &str,
    timeout: Duration,
    what: &str,
) -> Result<Output, SubprocessError> {
    use tokio::io::AsyncWriteExt;

    cmd.kill_on_drop(true);
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let run = async {
        let mut child = cmd.spawn().map_err(|source| SubprocessError::Spawn {
            what: what.to_string(),
            source,
        })?;
        if let Some(mut pipe) = child.stdin.take() {
            let _ = pipe.write_all(stdin.as_bytes()).await;
            drop(pipe);
        }
        child
            .wait_with_output()
            .await
            .map_err(|source| SubprocessError::Spawn {
                what: what.to_string(),
                source,
            })
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(command = what, ?timeout, "engine command timed out");
            Err(SubprocessError::Timeout {
                what: what.to_string(),
                timeout,
            })
        }
    }
}
