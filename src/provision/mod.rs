// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk peer provisioning
//!
//! Each identity in a batch goes through
//! `Pending -> Sanitized -> AddressAllocated -> KeyGenerated -> ProfileWritten
//! -> RegistryAppended -> Done`, or ends early as `Skipped` or `Failed`.
//! Failures are isolated per identity; the batch always runs to the end.

mod orchestrator;

pub use orchestrator::Provisioner;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{FailureKind, Result, RosterError};

/// Progress of a single request through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStage {
    Pending,
    Sanitized,
    AddressAllocated,
    KeyGenerated,
    ProfileWritten,
    RegistryAppended,
    Done,
}

impl std::fmt::Display for ProvisionStage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvisionStage::Pending => "pending",
            ProvisionStage::Sanitized => "sanitized",
            ProvisionStage::AddressAllocated => "address-allocated",
            ProvisionStage::KeyGenerated => "key-generated",
            ProvisionStage::ProfileWritten => "profile-written",
            ProvisionStage::RegistryAppended => "registry-appended",
            ProvisionStage::Done => "done",
        };
        write!(formatter, "{}", name)
    }
}

/// Terminal outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Success,
    Skipped,
    Failed,
}

/// Outcome of provisioning one identity
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
    /// Identity as read from the input
    pub identity: String,
    /// Sanitized peer name, once known
    pub name: Option<String>,
    /// Terminal status
    pub status: ProvisionStatus,
    /// Last stage reached
    pub stage: ProvisionStage,
    /// Failure class for failed requests
    pub failure: Option<FailureKind>,
    /// Why the request was skipped or failed
    pub reason: Option<String>,
    /// Assigned address (success only)
    pub address: Option<Ipv4Addr>,
    /// Written profile (success only)
    pub profile_path: Option<PathBuf>,
    /// Where to deliver the profile (success only)
    pub recipient: Option<String>,
}

impl ProvisioningResult {
    fn pending(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            name: None,
            status: ProvisionStatus::Failed,
            stage: ProvisionStage::Pending,
            failure: None,
            reason: None,
            address: None,
            profile_path: None,
            recipient: None,
        }
    }

    fn failed(mut self, kind: FailureKind, error: RosterError) -> Self {
        self.status = ProvisionStatus::Failed;
        self.failure = Some(kind);
        self.reason = Some(error.to_string());
        self
    }

    fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = ProvisionStatus::Skipped;
        self.reason = Some(reason.into());
        self
    }
}

/// Partitioned outcome of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Newly provisioned peers
    pub succeeded: Vec<ProvisioningResult>,
    /// Identities that were already provisioned
    pub skipped: Vec<ProvisioningResult>,
    /// Identities that failed, with reasons
    pub failed: Vec<ProvisioningResult>,
    /// Whether the service reload ran successfully
    pub reloaded: bool,
    /// Reload error, if the reload ran and failed
    pub reload_error: Option<String>,
}

impl BatchReport {
    /// Number of processed requests
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    /// True when nothing was provisioned and the pool ran dry
    pub fn exhausted_without_success(&self) -> bool {
        self.succeeded.is_empty()
            && self
                .failed
                .iter()
                .any(|result| result.failure == Some(FailureKind::PoolExhausted))
    }

    fn record(&mut self, result: ProvisioningResult) {
        match result.status {
            ProvisionStatus::Success => self.succeeded.push(result),
            ProvisionStatus::Skipped => self.skipped.push(result),
            ProvisionStatus::Failed => self.failed.push(result),
        }
    }
}

/// Read identities, one per line; blank lines and `#` comments are ignored
pub fn read_identities<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| RosterError::InputUnreadable {
        path: path.display().to_string(),
        source,
    })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
