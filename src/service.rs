// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tunnel service reload

use async_trait::async_trait;
use tracing::info;

use crate::error::{Result, RosterError};
use crate::exec::run_command;

/// Makes the running tunnel pick up the updated config store
#[async_trait]
pub trait ServiceReloader: Send + Sync {
    /// Reload the service once
    async fn reload(&self) -> Result<()>;
}

/// Reloader running a configured command, e.g. `systemctl restart wg-quick@wg0`
#[derive(Debug, Clone)]
pub struct CommandReloader {
    command: Vec<String>,
    timeout_secs: u64,
}

impl CommandReloader {
    /// Create a reloader; `command[0]` is the program
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Result<Self> {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(RosterError::InvalidConfig {
                message: "reload_command cannot be empty".to_string(),
            });
        }
        Ok(Self {
            command,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ServiceReloader for CommandReloader {
    async fn reload(&self) -> Result<()> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            RosterError::InvalidConfig {
                message: "reload_command cannot be empty".to_string(),
            }
        })?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(command = %self.command.join(" "), "Reloading tunnel service");
        run_command(program, &args, None, self.timeout_secs).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandReloader::new(vec![], 10).is_err());
        assert!(CommandReloader::new(vec![" ".to_string()], 10).is_err());
    }

    #[tokio::test]
    async fn test_reload_runs_command() {
        let reloader = CommandReloader::new(vec!["true".to_string()], 10).unwrap();
        reloader.reload().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_failure_propagates() {
        let reloader =
            CommandReloader::new(vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()], 10)
                .unwrap();
        let err = reloader.reload().await.unwrap_err();
        assert!(err.to_string().contains("status"));
    }
}
