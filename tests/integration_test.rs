// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for Kea-Roster

#![cfg(unix)]

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

const STORE_HEADER: &str =
    "[Interface]\nAddress = 10.8.0.1/24\nListenPort = 51820\nPrivateKey = server-private=\n";

/// Scratch server layout: store, server key, fake `wg`, config
struct Server {
    dir: TempDir,
}

impl Server {
    fn new(network: &str) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::write(root.join("wg0.conf"), STORE_HEADER).unwrap();
        fs::write(root.join("server_public.key"), "server-public=\n").unwrap();

        let wg = root.join("wg");
        fs::write(
            &wg,
            "#!/bin/sh\ncase \"$1\" in\n  genkey) head -c 32 /dev/urandom | base64 ;;\n  pubkey) read key; echo \"pub-$key\" ;;\n  *) exit 1 ;;\nesac\n",
        )
        .unwrap();
        fs::set_permissions(&wg, fs::Permissions::from_mode(0o755)).unwrap();

        let config = format!(
            r#"interface = "wg0"
network = "{network}"
store_path = "{root}/wg0.conf"
server_public_key_path = "{root}/server_public.key"
peers_dir = "{root}/clients"
endpoint = "vpn.example.com:51820"
reload_command = ["true"]
command_timeout_secs = 10

[keygen]
binary = "{root}/wg"

[logging]
level = "warn"
"#,
            network = network,
            root = root.display()
        );
        fs::write(root.join("roster.toml"), config).unwrap();

        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn store(&self) -> String {
        fs::read_to_string(self.path("wg0.conf")).unwrap()
    }

    fn input(&self, lines: &str) -> PathBuf {
        let path = self.path("users.txt");
        fs::write(&path, lines).unwrap();
        path
    }

    fn roster(&self, input: &Path) -> Command {
        let mut cmd = Command::cargo_bin("roster").unwrap();
        cmd.arg("--config")
            .arg(self.path("roster.toml"))
            .arg("--input-file")
            .arg(input)
            .env_remove("RUST_LOG");
        cmd
    }
}

/// Test the help output
#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("roster").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--input-file"))
        .stdout(predicate::str::contains("--send-email"))
        .stdout(predicate::str::contains("--smtp-protocol"));
}

/// Two identities on an empty pool, then a re-run of the same batch
#[test]
fn test_provision_then_rerun_is_idempotent() {
    let server = Server::new("10.8.0.0/24");
    let input = server.input("a@x.com\nb@y.org\n");

    server
        .roster(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 succeeded, 0 skipped, 0 failed"))
        .stdout(predicate::str::contains("a_x.com  10.8.0.2"))
        .stdout(predicate::str::contains("b_y.org  10.8.0.3"))
        .stdout(predicate::str::contains("Service reload: done"));

    let store = server.store();
    assert!(store.starts_with(STORE_HEADER));
    assert!(store.contains("# peer: a_x.com"));
    assert!(store.contains("AllowedIPs = 10.8.0.2/32"));
    assert!(store.contains("# peer: b_y.org"));
    assert!(store.contains("AllowedIPs = 10.8.0.3/32"));
    assert_eq!(store.matches("[Peer]").count(), 2);

    let profile = fs::read_to_string(server.path("clients/a_x.com.conf")).unwrap();
    assert!(profile.contains("Address = 10.8.0.2/24"));
    assert!(profile.contains("PublicKey = server-public="));
    assert!(profile.contains("Endpoint = vpn.example.com:51820"));
    let mode = fs::metadata(server.path("clients/a_x.com.conf"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    server
        .roster(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 succeeded, 2 skipped, 0 failed"))
        .stdout(predicate::str::contains("Service reload: not needed"));

    assert_eq!(server.store(), store);
}

/// An invalid identity in the middle does not stop the batch
#[test]
fn test_invalid_identity_is_isolated() {
    let server = Server::new("10.8.0.0/24");
    let input = server.input("a@x.com\nnot-an-email\nc@z.net\n");

    server
        .roster(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 succeeded, 0 skipped, 1 failed"))
        .stdout(predicate::str::contains("not-an-email  InvalidIdentity"))
        .stdout(predicate::str::contains("c_z.net  10.8.0.3"));
}

/// A missing input file is fatal and leaves the store alone
#[test]
fn test_missing_input_file() {
    let server = Server::new("10.8.0.0/24");

    server
        .roster(&server.path("missing.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot read input file"));

    assert_eq!(server.store(), STORE_HEADER);
}

/// A missing server public key is fatal before any peer is added
#[test]
fn test_missing_server_key() {
    let server = Server::new("10.8.0.0/24");
    fs::remove_file(server.path("server_public.key")).unwrap();
    let input = server.input("a@x.com\n");

    server
        .roster(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Server public key unavailable"));

    assert_eq!(server.store(), STORE_HEADER);
}

/// A full pool with nothing provisioned exits non-zero
#[test]
fn test_full_pool_fails() {
    let server = Server::new("10.8.0.0/30");
    fs::write(
        server.path("wg0.conf"),
        format!(
            "{}\n# peer: a_x.com\n[Peer]\nPublicKey = pub-a=\nAllowedIPs = 10.8.0.2/32\n",
            STORE_HEADER
        ),
    )
    .unwrap();
    let input = server.input("b@y.org\n");

    server
        .roster(&input)
        .assert()
        .failure()
        .stdout(predicate::str::contains("PoolExhausted"))
        .stderr(predicate::str::contains("exhausted"));
}

/// Notification without credentials is refused, but provisioning is durable
#[test]
fn test_send_email_without_credentials() {
    let server = Server::new("10.8.0.0/24");
    let input = server.input("a@x.com\n");

    server
        .roster(&input)
        .arg("--send-email")
        .arg("--smtp-server")
        .arg("smtp.example.com")
        .arg("--from-email")
        .arg("vpn@example.com")
        .env_remove("SMTP_USER")
        .env_remove("SMTP_PASS")
        .assert()
        .failure()
        .stdout(predicate::str::contains("1 succeeded"))
        .stdout(predicate::str::contains("Notification:").not())
        .stderr(predicate::str::contains("SMTP_USER"));

    assert!(server.store().contains("# peer: a_x.com"));
    assert!(server.path("clients/a_x.com.conf").exists());
}

/// The JSON report carries the partitioned batch
#[test]
fn test_json_report() {
    let server = Server::new("10.8.0.0/24");
    let input = server.input("a@x.com\nbad\n");
    let report_path = server.path("report.json");

    server
        .roster(&input)
        .arg("--report")
        .arg(&report_path)
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["interface"], "wg0");
    assert_eq!(report["batch"]["succeeded"][0]["name"], "a_x.com");
    assert_eq!(report["batch"]["succeeded"][0]["address"], "10.8.0.2");
    assert_eq!(report["batch"]["failed"][0]["failure"], "invalid-identity");
    assert_eq!(report["batch"]["reloaded"], true);
    assert!(report["dispatch"].is_null());
}
