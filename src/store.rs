// SPDX-License-Identifier: AGPL-3.0-or-later
//! WireGuard config store
//!
//! The store is the server's interface file (`wg0.conf`): an `[Interface]`
//! header followed by one `[Peer]` block per registered peer. Peer blocks
//! written by Roster carry a `# peer: <name>` comment so that a peer can be
//! found again by name.

use std::collections::BTreeSet;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use ipnet::{IpNet, Ipv4Net};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, RosterError};
use crate::pool::AddressPool;

const NAME_COMMENT: &str = "# peer:";

/// A peer registered by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Sanitized peer name
    pub name: String,
    /// Base64 public key
    pub public_key: String,
    /// Address assigned from the pool
    pub address: Ipv4Addr,
}

/// A `[Peer]` block as found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlock {
    /// Name from the `# peer:` comment, if present
    pub name: Option<String>,
    /// Value of `PublicKey`
    pub public_key: String,
    /// Parsed `AllowedIPs` entries
    pub allowed_ips: Vec<IpNet>,
}

/// Durable record of registered peers
pub trait PeerStore: Send {
    /// Addresses referenced by the interface and all peers that fall inside `pool`
    fn load_peer_addresses(&self, pool: &AddressPool) -> BTreeSet<Ipv4Addr>;

    /// Whether a peer with exactly this public key is registered
    fn has_peer(&self, public_key: &str) -> bool;

    /// Whether a peer block carries this name
    fn has_peer_named(&self, name: &str) -> bool;

    /// Durably add a peer block; the only mutation of the store
    fn append_peer(&mut self, record: &PeerRecord) -> Result<()>;
}

/// File-backed store over a WireGuard interface configuration
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    contents: String,
    interface_addresses: Vec<Ipv4Net>,
    peers: Vec<PeerBlock>,
}

impl ConfigStore {
    /// Read and parse the whole store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path).map_err(|e| RosterError::StoreUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let (interface_addresses, peers) =
            parse(&contents).map_err(|message| RosterError::StoreUnavailable {
                path: path.display().to_string(),
                message,
            })?;

        info!(
            path = %path.display(),
            peers = peers.len(),
            "Loaded config store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            contents,
            interface_addresses,
            peers,
        })
    }

    /// Path of the durable file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All peer blocks in file order
    pub fn peers(&self) -> &[PeerBlock] {
        &self.peers
    }

    /// Replace the file in place, keeping its mode and owner and following
    /// a symlinked store to its target
    fn persist(&self, contents: &str) -> std::io::Result<()> {
        let target = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut scratch = NamedTempFile::new_in(dir)?;
        scratch.write_all(contents.as_bytes())?;

        if let Ok(metadata) = std::fs::metadata(&target) {
            scratch.as_file().set_permissions(metadata.permissions())?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::{chown, MetadataExt};
                if let Err(e) = chown(scratch.path(), Some(metadata.uid()), Some(metadata.gid())) {
                    warn!(path = %target.display(), error = %e, "Could not keep store ownership");
                }
            }
        }

        scratch.as_file().sync_all()?;
        scratch.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }
}

impl PeerStore for ConfigStore {
    fn load_peer_addresses(&self, pool: &AddressPool) -> BTreeSet<Ipv4Addr> {
        let peer_addresses = self
            .peers
            .iter()
            .flat_map(|peer| peer.allowed_ips.iter())
            .filter_map(|net| match net {
                IpNet::V4(net) => Some(net.addr()),
                IpNet::V6(_) => None,
            });

        self.interface_addresses
            .iter()
            .map(|net| net.addr())
            .chain(peer_addresses)
            .filter(|address| pool.contains(address))
            .collect()
    }

    fn has_peer(&self, public_key: &str) -> bool {
        self.peers.iter().any(|peer| peer.public_key == public_key)
    }

    fn has_peer_named(&self, name: &str) -> bool {
        self.peers
            .iter()
            .any(|peer| peer.name.as_deref() == Some(name))
    }

    fn append_peer(&mut self, record: &PeerRecord) -> Result<()> {
        let mut contents = self.contents.clone();
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&render_peer_block(record));

        self.persist(&contents)
            .map_err(|e| RosterError::StoreAppendFailure {
                name: record.name.clone(),
                message: e.to_string(),
            })?;

        self.contents = contents;
        self.peers.push(PeerBlock {
            name: Some(record.name.clone()),
            public_key: record.public_key.clone(),
            allowed_ips: vec![IpNet::V4(Ipv4Net::from(record.address))],
        });

        debug!(peer = %record.name, address = %record.address, "Appended peer block");
        Ok(())
    }
}

/// Render the block appended for a new peer
pub fn render_peer_block(record: &PeerRecord) -> String {
    format!(
        "\n{} {}\n[Peer]\nPublicKey = {}\nAllowedIPs = {}/32\n",
        NAME_COMMENT, record.name, record.public_key, record.address
    )
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Interface,
    Peer,
}

fn parse(contents: &str) -> std::result::Result<(Vec<Ipv4Net>, Vec<PeerBlock>), String> {
    let mut section = Section::None;
    let mut seen_interface = false;
    let mut interface_addresses = Vec::new();
    let mut peers: Vec<PeerBlock> = Vec::new();
    let mut pending_name: Option<String> = None;

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Some(name) = line.strip_prefix(NAME_COMMENT) {
                pending_name = Some(name.trim().to_string());
            }
            continue;
        }

        // Anything after '#' is a comment, as in wg-quick.
        let line = match line.split_once('#') {
            Some((setting, _)) => setting.trim_end(),
            None => line,
        };

        match line {
            "[Interface]" => {
                if seen_interface || !peers.is_empty() {
                    return Err(format!("line {}: unexpected [Interface] section", line_no));
                }
                seen_interface = true;
                section = Section::Interface;
                pending_name = None;
                continue;
            }
            "[Peer]" => {
                if !seen_interface {
                    return Err(format!("line {}: [Peer] before [Interface]", line_no));
                }
                check_peer_complete(peers.last())?;
                peers.push(PeerBlock {
                    name: pending_name.take(),
                    public_key: String::new(),
                    allowed_ips: Vec::new(),
                });
                section = Section::Peer;
                continue;
            }
            _ if line.starts_with('[') => {
                return Err(format!("line {}: unknown section {}", line_no, line));
            }
            _ => {}
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected 'Key = Value'", line_no))?;
        let (key, value) = (key.trim(), value.trim());

        match section {
            Section::None => {
                return Err(format!("line {}: '{}' outside of a section", line_no, key));
            }
            Section::Interface => {
                if key.eq_ignore_ascii_case("Address") {
                    for net in parse_address_list(value, line_no)? {
                        if let IpNet::V4(net) = net {
                            interface_addresses.push(net);
                        }
                    }
                }
            }
            Section::Peer => {
                let Some(peer) = peers.last_mut() else {
                    return Err(format!("line {}: peer entry without [Peer]", line_no));
                };
                if key.eq_ignore_ascii_case("PublicKey") {
                    peer.public_key = value.to_string();
                } else if key.eq_ignore_ascii_case("AllowedIPs") {
                    peer.allowed_ips.extend(parse_address_list(value, line_no)?);
                }
            }
        }
    }

    if !seen_interface {
        return Err("missing [Interface] section".to_string());
    }
    check_peer_complete(peers.last())?;

    Ok((interface_addresses, peers))
}

fn check_peer_complete(peer: Option<&PeerBlock>) -> std::result::Result<(), String> {
    match peer {
        Some(peer) if peer.public_key.is_empty() => Err(format!(
            "peer {} has no PublicKey",
            peer.name.as_deref().unwrap_or("<unnamed>")
        )),
        _ => Ok(()),
    }
}

fn parse_address_list(value: &str, line_no: usize) -> std::result::Result<Vec<IpNet>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| format!("line {}: invalid address '{}'", line_no, entry))
        })
        .collect()
}
