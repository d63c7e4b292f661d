// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kea-Roster: bulk WireGuard peer provisioning for the Kea ecosystem
//!
//! The Roster turns a list of email identities into registered tunnel peers.
//! Each identity gets a unique address from the interface pool, a fresh key
//! pair, a client profile on disk and a peer block in the server config.
//!
//! # Features
//!
//! * **Deterministic Allocation:** lowest free host of the pool, gateway excluded
//! * **Idempotent Batches:** re-running a batch skips peers already registered
//! * **Continue-on-Error:** one bad identity never stops the rest of the batch
//! * **Profile Delivery:** optional throttled SMTP delivery of each new profile

pub mod config;
pub mod error;
pub mod exec;
pub mod identity;
pub mod keys;
pub mod lock;
pub mod notify;
pub mod pool;
pub mod provision;
pub mod registry;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{Result, RosterError};
