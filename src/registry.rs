// SPDX-License-Identifier: AGPL-3.0-or-later
//! Peer registry
//!
//! Each provisioned peer gets a client profile at `<peers_dir>/<name>.conf`.
//! Profiles are derived artifacts: the config store decides whether a peer
//! exists, and a profile without a matching peer block is overwritten.

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, RosterError};

/// Server-side values every client profile points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTemplate {
    /// Server public key
    pub server_public_key: String,
    /// `host:port` the client connects to
    pub endpoint: String,
    /// DNS servers pushed to the client
    pub dns: Vec<String>,
    /// Routes sent through the tunnel
    pub allowed_ips: String,
    /// Keepalive interval in seconds
    pub persistent_keepalive: u16,
    /// Prefix length of the client address
    pub prefix_len: u8,
}

impl ProfileTemplate {
    /// Render a client profile
    pub fn render(&self, private_key: &str, address: Ipv4Addr) -> String {
        let mut profile = format!(
            "[Interface]\nPrivateKey = {}\nAddress = {}/{}\n",
            private_key, address, self.prefix_len
        );
        if !self.dns.is_empty() {
            profile.push_str(&format!("DNS = {}\n", self.dns.join(", ")));
        }
        profile.push_str(&format!(
            "\n[Peer]\nPublicKey = {}\nEndpoint = {}\nAllowedIPs = {}\nPersistentKeepalive = {}\n",
            self.server_public_key, self.endpoint, self.allowed_ips, self.persistent_keepalive
        ));
        profile
    }
}

/// Directory of client profiles keyed by peer name
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    dir: PathBuf,
}

impl PeerRegistry {
    /// Open the registry, creating the directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the profiles
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the profile for `name` lives
    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.conf", name))
    }

    /// Whether a profile already exists for `name`
    pub fn exists(&self, name: &str) -> bool {
        self.profile_path(name).is_file()
    }

    /// IPv4 `Address` of an existing profile, if it can be read
    pub fn profile_address(&self, name: &str) -> Option<Ipv4Addr> {
        let contents = std::fs::read_to_string(self.profile_path(name)).ok()?;
        contents.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("Address") {
                return None;
            }
            value
                .split(',')
                .filter_map(|entry| entry.trim().split('/').next()?.parse().ok())
                .next()
        })
    }

    /// Atomically write the profile for `name`, readable by the owner only
    pub fn write_profile(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.profile_path(name);
        let failure = |e: std::io::Error| RosterError::ProfileWriteFailure {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        // NamedTempFile is created with mode 0600 on unix.
        let mut scratch = NamedTempFile::new_in(&self.dir).map_err(failure)?;
        scratch.write_all(contents.as_bytes()).map_err(failure)?;
        scratch.as_file().sync_all().map_err(failure)?;
        scratch.persist(&path).map_err(|e| failure(e.error))?;

        debug!(path = %path.display(), "Wrote profile");
        Ok(path)
    }

    /// Remove the profile for `name` if present
    pub fn remove_profile(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.profile_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
