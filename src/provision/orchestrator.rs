// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch orchestrator
//!
//! Drives identities one at a time through allocation, key generation,
//! profile writing and store registration, then reloads the tunnel service
//! once if anything was added.

use tracing::{debug, error, info, warn};

use super::{BatchReport, ProvisionStage, ProvisionStatus, ProvisioningResult};
use crate::error::FailureKind;
use crate::identity;
use crate::keys::KeyGenerator;
use crate::pool::AddressPool;
use crate::registry::{PeerRegistry, ProfileTemplate};
use crate::service::ServiceReloader;
use crate::store::{PeerRecord, PeerStore};

/// Provisions batches of identities against one config store
pub struct Provisioner {
    pool: AddressPool,
    store: Box<dyn PeerStore>,
    registry: PeerRegistry,
    template: ProfileTemplate,
    keygen: Box<dyn KeyGenerator>,
    reloader: Box<dyn ServiceReloader>,
}

impl Provisioner {
    /// Create a provisioner over an opened store and registry
    pub fn new(
        pool: AddressPool,
        store: Box<dyn PeerStore>,
        registry: PeerRegistry,
        template: ProfileTemplate,
        keygen: Box<dyn KeyGenerator>,
        reloader: Box<dyn ServiceReloader>,
    ) -> Self {
        Self {
            pool,
            store,
            registry,
            template,
            keygen,
            reloader,
        }
    }

    /// Provision every identity, then reload the service if peers were added
    pub async fn run(&mut self, identities: &[String]) -> BatchReport {
        let start_time = std::time::Instant::now();
        let mut report = BatchReport::default();

        info!(
            requests = identities.len(),
            pool = %self.pool,
            "Starting provisioning batch"
        );

        for (index, identity) in identities.iter().enumerate() {
            let result = self.provision(identity).await;

            match result.status {
                ProvisionStatus::Success => info!(
                    index,
                    peer = ?result.name,
                    address = ?result.address,
                    "Peer provisioned"
                ),
                ProvisionStatus::Skipped => info!(
                    index,
                    peer = ?result.name,
                    reason = ?result.reason,
                    "Peer skipped"
                ),
                ProvisionStatus::Failed => error!(
                    index,
                    identity = %result.identity,
                    stage = %result.stage,
                    failure = ?result.failure,
                    reason = ?result.reason,
                    "Peer failed"
                ),
            }

            report.record(result);
        }

        if report.succeeded.is_empty() {
            info!("No peers added, service reload not needed");
        } else {
            match self.reloader.reload().await {
                Ok(()) => report.reloaded = true,
                Err(e) => {
                    error!(error = %e, "Service reload failed");
                    report.reload_error = Some(e.to_string());
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            reloaded = report.reloaded,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Provisioning batch completed"
        );

        report
    }

    /// Carry one identity through the state machine
    async fn provision(&mut self, raw_identity: &str) -> ProvisioningResult {
        let mut result = ProvisioningResult::pending(raw_identity);

        let name = match identity::parse(raw_identity) {
            Ok(name) => name,
            Err(e) => return result.failed(FailureKind::InvalidIdentity, e),
        };
        result.name = Some(name.clone());
        self.advance(&mut result, ProvisionStage::Sanitized);

        // The store is authoritative; a profile alone does not make a peer.
        if self.store.has_peer_named(&name) {
            return result.skipped("peer already registered in the config store");
        }
        let used = self.store.load_peer_addresses(&self.pool);
        if self.registry.exists(&name) {
            // A block without our name comment may still hold this profile's address.
            if let Some(address) = self
                .registry
                .profile_address(&name)
                .filter(|address| used.contains(address))
            {
                return result.skipped(format!(
                    "profile address {} already registered in the config store",
                    address
                ));
            }
            warn!(peer = %name, "Profile exists without a peer block, regenerating");
        }

        let address = match self.pool.allocate(&used) {
            Ok(address) => address,
            Err(e) => return result.failed(FailureKind::PoolExhausted, e),
        };
        self.advance(&mut result, ProvisionStage::AddressAllocated);

        let keys = match self.keygen.generate().await {
            Ok(keys) => keys,
            Err(e) => return result.failed(FailureKind::KeyGenFailure, e),
        };
        self.advance(&mut result, ProvisionStage::KeyGenerated);

        if self.store.has_peer(&keys.public_key) {
            return result.skipped("public key already registered in the config store");
        }

        let profile = self.template.render(&keys.private_key, address);
        let profile_path = match self.registry.write_profile(&name, &profile) {
            Ok(path) => path,
            Err(e) => return result.failed(FailureKind::ProfileWriteFailure, e),
        };
        self.advance(&mut result, ProvisionStage::ProfileWritten);

        let record = PeerRecord {
            name: name.clone(),
            public_key: keys.public_key,
            address,
        };
        if let Err(e) = self.store.append_peer(&record) {
            // The profile holds a private key for a peer the server will never accept.
            if let Err(remove_error) = self.registry.remove_profile(&name) {
                warn!(peer = %name, error = %remove_error, "Failed to remove orphaned profile");
            }
            return result.failed(FailureKind::StoreAppendFailure, e);
        }
        self.advance(&mut result, ProvisionStage::RegistryAppended);

        result.status = ProvisionStatus::Success;
        result.address = Some(address);
        result.profile_path = Some(profile_path);
        result.recipient = Some(raw_identity.trim().to_string());
        self.advance(&mut result, ProvisionStage::Done);
        result
    }

    fn advance(&self, result: &mut ProvisioningResult, stage: ProvisionStage) {
        debug!(identity = %result.identity, from = %result.stage, to = %stage, "Transition");
        result.stage = stage;
    }
}
