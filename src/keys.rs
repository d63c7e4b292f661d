// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key pair generation
//!
//! Keys come from an external primitive (`wg genkey` / `wg pubkey`); Roster
//! treats them as opaque strings.

use async_trait::async_trait;

use crate::error::{Result, RosterError};
use crate::exec::run_command;

/// An opaque private/public key pair
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Private key, only ever written to the client profile
    pub private_key: String,
    /// Public key registered in the config store
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Source of fresh key pairs
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a private key, then derive its public key
    async fn generate(&self) -> Result<KeyPair>;
}

/// Key generator backed by the `wg` tool
#[derive(Debug, Clone)]
pub struct WgKeyGenerator {
    binary: String,
    timeout_secs: u64,
}

impl WgKeyGenerator {
    /// Create a generator running `binary` (usually `wg`)
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl KeyGenerator for WgKeyGenerator {
    async fn generate(&self) -> Result<KeyPair> {
        let private_key = run_command(&self.binary, &["genkey"], None, self.timeout_secs)
            .await
            .map_err(keygen_failure)?;
        let private_key = non_empty(private_key, "genkey")?;

        let public_key = run_command(
            &self.binary,
            &["pubkey"],
            Some(&format!("{}\n", private_key)),
            self.timeout_secs,
        )
        .await
        .map_err(keygen_failure)?;
        let public_key = non_empty(public_key, "pubkey")?;

        Ok(KeyPair {
            private_key,
            public_key,
        })
    }
}

fn non_empty(output: String, step: &str) -> Result<String> {
    let key = output.trim();
    if key.is_empty() {
        return Err(RosterError::KeyGenFailure {
            message: format!("{} produced no output", step),
        });
    }
    Ok(key.to_string())
}

fn keygen_failure(error: RosterError) -> RosterError {
    RosterError::KeyGenFailure {
        message: error.to_string(),
    }
}
