// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for Kea-Roster

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RosterError};
use crate::pool::{AddressPool, MAX_PREFIX_LEN};

/// Server-side configuration for provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WireGuard interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Address pool peers are allocated from; host 1 is the server
    #[serde(default = "default_network")]
    pub network: Ipv4Net,

    /// Interface configuration holding the peer blocks
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// File containing the server public key
    #[serde(default = "default_server_public_key_path")]
    pub server_public_key_path: PathBuf,

    /// Directory receiving client profiles
    #[serde(default = "default_peers_dir")]
    pub peers_dir: PathBuf,

    /// Public `host:port` of the server
    #[serde(default)]
    pub endpoint: Option<String>,

    /// DNS servers written into client profiles
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,

    /// Routes clients send through the tunnel
    #[serde(default = "default_client_allowed_ips")]
    pub client_allowed_ips: String,

    /// Keepalive interval written into client profiles
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,

    /// Command run once after a batch that added peers
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Timeout for external commands
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Key generation settings
    #[serde(default)]
    pub keygen: KeygenConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Key generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenConfig {
    /// Path or name of the `wg` tool
    #[serde(default = "default_wg_binary")]
    pub binary: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        Self {
            binary: default_wg_binary(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            network: default_network(),
            store_path: default_store_path(),
            server_public_key_path: default_server_public_key_path(),
            peers_dir: default_peers_dir(),
            endpoint: None,
            dns: default_dns(),
            client_allowed_ips: default_client_allowed_ips(),
            persistent_keepalive: default_keepalive(),
            reload_command: default_reload_command(),
            command_timeout_secs: default_command_timeout(),
            keygen: KeygenConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RosterError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(invalid("interface name cannot be empty"));
        }

        if self.network.prefix_len() > MAX_PREFIX_LEN {
            return Err(invalid(&format!(
                "network {} leaves no room for peers",
                self.network
            )));
        }

        match self.endpoint.as_deref() {
            None | Some("") => {
                return Err(invalid("endpoint must be set to the server's public host:port"));
            }
            Some(endpoint) if !endpoint.contains(':') => {
                return Err(invalid(&format!("endpoint '{}' is missing a port", endpoint)));
            }
            Some(_) => {}
        }

        if self.reload_command.first().map_or(true, |program| program.is_empty()) {
            return Err(invalid("reload_command cannot be empty"));
        }

        if self.persistent_keepalive == 0 {
            return Err(invalid("persistent_keepalive must be greater than zero"));
        }

        if self.command_timeout_secs == 0 {
            return Err(invalid("command_timeout_secs must be greater than zero"));
        }

        Ok(())
    }

    /// The address pool described by `network`
    pub fn pool(&self) -> Result<AddressPool> {
        AddressPool::new(self.network)
    }

    /// Read the server public key
    pub fn server_public_key(&self) -> Result<String> {
        let missing = || RosterError::PublicKeyMissing {
            path: self.server_public_key_path.display().to_string(),
        };

        let key = std::fs::read_to_string(&self.server_public_key_path).map_err(|_| missing())?;
        let key = key.trim();
        if key.is_empty() {
            return Err(missing());
        }
        Ok(key.to_string())
    }
}

fn invalid(message: &str) -> RosterError {
    RosterError::InvalidConfig {
        message: message.to_string(),
    }
}

// Default value functions

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_network() -> Ipv4Net {
    Ipv4Net::new_assert(std::net::Ipv4Addr::new(10, 8, 0, 0), 24)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/etc/wireguard/wg0.conf")
}

fn default_server_public_key_path() -> PathBuf {
    PathBuf::from("/etc/wireguard/server_public.key")
}

fn default_peers_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard/clients")
}

fn default_dns() -> Vec<String> {
    vec!["1.1.1.1".to_string()]
}

fn default_client_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

fn default_keepalive() -> u16 {
    25
}

fn default_reload_command() -> Vec<String> {
    vec![
        "systemctl".to_string(),
        "restart".to_string(),
        "wg-quick@wg0".to_string(),
    ]
}

fn default_command_timeout() -> u64 {
    30
}

fn default_wg_binary() -> String {
    "wg".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid_config() -> Config {
        Config {
            endpoint: Some("vpn.example.com:51820".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interface, "wg0");
        assert_eq!(config.network.to_string(), "10.8.0.0/24");
        assert_eq!(config.persistent_keepalive, 25);
        // No endpoint detection: the default is unusable until one is set
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.interface = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.endpoint = Some("vpn.example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reload_command.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.network = "10.8.0.0/31".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = valid_config();
        config.command_timeout_secs = 0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("command_timeout_secs"));

        let mut config = valid_config();
        config.persistent_keepalive = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_content = r#"
            interface = "wg1"
            network = "172.16.4.0/22"
            store_path = "/tmp/wg1.conf"
            endpoint = "203.0.113.7:51821"
            dns = ["9.9.9.9", "149.112.112.112"]
            persistent_keepalive = 15
            reload_command = ["wg-quick", "strip", "wg1"]

            [keygen]
            binary = "/usr/local/bin/wg"

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.interface, "wg1");
        assert_eq!(config.pool().unwrap().gateway().to_string(), "172.16.4.1");
        assert_eq!(config.dns.len(), 2);
        assert_eq!(config.peers_dir, PathBuf::from("/etc/wireguard/clients"));
        assert_eq!(config.keygen.binary, "/usr/local/bin/wg");
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/roster.toml").unwrap_err();
        assert!(matches!(err, RosterError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_server_public_key() {
        let temp_dir = tempdir().unwrap();
        let mut config = valid_config();
        config.server_public_key_path = temp_dir.path().join("server_public.key");

        assert!(matches!(
            config.server_public_key(),
            Err(RosterError::PublicKeyMissing { .. })
        ));

        std::fs::write(&config.server_public_key_path, "  \n").unwrap();
        assert!(config.server_public_key().is_err());

        std::fs::write(&config.server_public_key_path, "c2VydmVyLXB1Yg==\n").unwrap();
        assert_eq!(config.server_public_key().unwrap(), "c2VydmVyLXB1Yg==");
    }
}
