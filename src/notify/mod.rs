// SPDX-License-Identifier: AGPL-3.0-or-later
//! Profile delivery over SMTP
//!
//! After a batch, each newly provisioned peer can be mailed its profile.
//! Sends are sequential with a fixed delay in between; a failed send is
//! recorded and never retried within the same run.

mod dispatcher;
mod smtp;

pub use dispatcher::{dispatch, DispatchFailure, DispatchSummary};
pub use smtp::{build_message, SmtpMailer};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RosterError};

/// Port on which SMTP runs inside TLS from the first byte
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default submission port
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default subject line
pub const DEFAULT_SUBJECT: &str = "Your WireGuard VPN Configuration";

/// Default pause between two sends
pub const DEFAULT_DELAY_SECS: u64 = 2;

/// Requested transport security
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SmtpProtocol {
    /// Implicit TLS on port 465, STARTTLS elsewhere
    #[default]
    Auto,
    /// TLS for the whole session
    Implicit,
    /// Upgrade with STARTTLS during the handshake
    Starttls,
}

/// Transport security actually used for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    Implicit,
    Starttls,
}

impl SmtpProtocol {
    /// Resolve `Auto` against the configured port
    pub fn resolve(self, port: u16) -> TransportSecurity {
        match self {
            SmtpProtocol::Implicit => TransportSecurity::Implicit,
            SmtpProtocol::Starttls => TransportSecurity::Starttls,
            SmtpProtocol::Auto if port == IMPLICIT_TLS_PORT => TransportSecurity::Implicit,
            SmtpProtocol::Auto => TransportSecurity::Starttls,
        }
    }
}

/// SMTP login; the password never appears in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings for the notification phase
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// SMTP host
    pub server: Option<String>,
    /// SMTP port
    pub port: u16,
    /// Requested transport security
    pub protocol: SmtpProtocol,
    /// Sender address
    pub from: Option<String>,
    /// Subject line
    pub subject: String,
    /// Pause between consecutive sends
    pub delay: Duration,
    /// Login, usually from `SMTP_USER` / `SMTP_PASS`
    pub credentials: Option<SmtpCredentials>,
    /// Per-send network timeout
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: DEFAULT_SMTP_PORT,
            protocol: SmtpProtocol::Auto,
            from: None,
            subject: DEFAULT_SUBJECT.to_string(),
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            credentials: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl NotifyConfig {
    /// Build credentials from the two environment values, if both are set
    pub fn credentials_from(
        username: Option<String>,
        password: Option<String>,
    ) -> Option<SmtpCredentials> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(SmtpCredentials { username, password })
            }
            _ => None,
        }
    }

    /// Check every precondition before anything is sent
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.server.as_deref().map_or(true, str::is_empty) {
            missing.push("SMTP server (--smtp-server)");
        }
        if self.from.as_deref().map_or(true, str::is_empty) {
            missing.push("sender address (--from-email)");
        }
        if self.credentials.is_none() {
            missing.push("credentials (SMTP_USER and SMTP_PASS)");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RosterError::NotifyConfigInvalid {
                message: format!("missing {}", missing.join(", ")),
            })
        }
    }

    /// Transport security for this configuration
    pub fn security(&self) -> TransportSecurity {
        self.protocol.resolve(self.port)
    }
}

/// A profile ready to be mailed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

/// Delivers one message
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}
