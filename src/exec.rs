// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subprocess execution for external primitives

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, RosterError};

/// Run `program` with `args`, optionally feeding `input` on stdin, and return stdout.
///
/// Fails on spawn errors, a non-zero exit status or when `timeout_secs` elapses.
pub async fn run_command(
    program: &str,
    args: &[&str],
    input: Option<&str>,
    timeout_secs: u64,
) -> Result<String> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    let failed = |message: String| RosterError::CommandFailed {
        command: command_line.clone(),
        message,
    };

    debug!(command = %command_line, "Running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| failed(format!("failed to start: {}", e)))?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| failed(format!("failed to write stdin: {}", e)))?;
        }
    }

    let duration = Duration::from_secs(timeout_secs);
    match timeout(duration, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(failed(format!(
                    "exited with status {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        }
        Ok(Err(e)) => Err(failed(format!("failed to wait: {}", e))),
        Err(_) => Err(failed(format!("timed out after {} seconds", timeout_secs))),
    }
}
