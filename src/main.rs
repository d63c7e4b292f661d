// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kea-Roster: bulk WireGuard peer provisioning for the Kea ecosystem
//!
//! Main CLI entry point. Provisions every identity in the input file, reloads
//! the tunnel service once, then optionally mails each new peer its profile.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kea_roster::{
    config::LoggingConfig,
    keys::WgKeyGenerator,
    lock::StoreLock,
    notify::{self, DispatchSummary, NotifyConfig, SmtpMailer, SmtpProtocol},
    provision::{self, BatchReport, Provisioner},
    registry::{PeerRegistry, ProfileTemplate},
    service::CommandReloader,
    store::ConfigStore,
    Config, RosterError,
};

/// Kea-Roster: The Flock Register
///
/// Provisions WireGuard peers in bulk from a list of email identities and
/// optionally delivers each new client profile by email.
#[derive(Parser, Debug)]
#[command(name = "roster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File with one email identity per line
    #[arg(long)]
    input_file: PathBuf,

    /// Mail each new peer its profile after provisioning
    #[arg(long)]
    send_email: bool,

    /// SMTP server host
    #[arg(long)]
    smtp_server: Option<String>,

    /// SMTP server port
    #[arg(long, default_value_t = notify::DEFAULT_SMTP_PORT)]
    smtp_port: u16,

    /// Transport security (auto picks implicit TLS on 465, STARTTLS otherwise)
    #[arg(long, value_enum, default_value_t = SmtpProtocol::Auto)]
    smtp_protocol: SmtpProtocol,

    /// Sender address
    #[arg(long)]
    from_email: Option<String>,

    /// Subject line of the profile email
    #[arg(long, default_value = notify::DEFAULT_SUBJECT)]
    email_subject: String,

    /// Seconds to wait between two emails
    #[arg(long, default_value_t = notify::DEFAULT_DELAY_SECS)]
    email_delay: u64,

    /// Configuration file path
    #[arg(short, long, default_value = "roster.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Machine-readable run summary
#[derive(Serialize)]
struct RunReport<'a> {
    interface: &'a str,
    batch: &'a BatchReport,
    dispatch: Option<&'a DispatchSummary>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&cli, &config.logging);

    run(cli, config).await
}

/// Load the configuration, falling back to defaults when the file is absent
fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    if !config_path.exists() {
        let config = Config::default();
        config.validate().with_context(|| {
            format!(
                "No configuration file at {} and the defaults are incomplete",
                config_path.display()
            )
        })?;
        return Ok(config);
    }

    Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new(&logging.level)
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let identities = provision::read_identities(&cli.input_file)?;
    if identities.is_empty() {
        println!("No identities in {}, nothing to do", cli.input_file.display());
        return Ok(ExitCode::SUCCESS);
    }

    let pool = config.pool()?;
    if !config.store_path.is_file() {
        return Err(RosterError::StoreUnavailable {
            path: config.store_path.display().to_string(),
            message: "file not found".to_string(),
        }
        .into());
    }
    let server_public_key = config.server_public_key()?;

    info!(
        interface = %config.interface,
        identities = identities.len(),
        store = %config.store_path.display(),
        "Starting roster run"
    );

    let lock = StoreLock::acquire(&config.store_path)?;
    let store = ConfigStore::open(&config.store_path)?;
    let registry = PeerRegistry::open(&config.peers_dir).with_context(|| {
        format!("Failed to open peers directory {}", config.peers_dir.display())
    })?;

    let template = ProfileTemplate {
        server_public_key,
        endpoint: config.endpoint.clone().unwrap_or_default(),
        dns: config.dns.clone(),
        allowed_ips: config.client_allowed_ips.clone(),
        persistent_keepalive: config.persistent_keepalive,
        prefix_len: config.network.prefix_len(),
    };
    let keygen = WgKeyGenerator::new(config.keygen.binary.clone(), config.command_timeout_secs);
    let reloader = CommandReloader::new(config.reload_command.clone(), config.command_timeout_secs)?;

    let mut provisioner = Provisioner::new(
        pool,
        Box::new(store),
        registry,
        template,
        Box::new(keygen),
        Box::new(reloader),
    );
    let batch = provisioner.run(&identities).await;
    drop(lock);

    print_batch(&batch);

    let mut problems: Vec<String> = Vec::new();
    if batch.exhausted_without_success() {
        problems.push(format!("Address pool {} is exhausted, no peer was added", config.network));
    }
    if let Some(reload_error) = &batch.reload_error {
        problems.push(format!("Service reload failed: {}", reload_error));
    }

    let mut dispatch = None;
    if cli.send_email {
        let notify_config = NotifyConfig {
            server: cli.smtp_server.clone(),
            port: cli.smtp_port,
            protocol: cli.smtp_protocol,
            from: cli.from_email.clone(),
            subject: cli.email_subject.clone(),
            delay: Duration::from_secs(cli.email_delay),
            credentials: NotifyConfig::credentials_from(
                std::env::var("SMTP_USER").ok(),
                std::env::var("SMTP_PASS").ok(),
            ),
            ..NotifyConfig::default()
        };

        match send_profiles(&batch, &notify_config).await {
            Ok(summary) => {
                print_dispatch(&summary);
                dispatch = Some(summary);
            }
            Err(e) => {
                error!(error = %e, "Notification phase aborted");
                problems.push(e.to_string());
            }
        }
    }

    if let Some(report_path) = &cli.report {
        let report = RunReport {
            interface: &config.interface,
            batch: &batch,
            dispatch: dispatch.as_ref(),
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(report_path, json)
            .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
        info!(path = %report_path.display(), "Wrote JSON report");
    }

    if problems.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        for problem in &problems {
            eprintln!("Error: {}", problem);
        }
        Ok(ExitCode::FAILURE)
    }
}

async fn send_profiles(
    batch: &BatchReport,
    notify_config: &NotifyConfig,
) -> kea_roster::Result<DispatchSummary> {
    if batch.succeeded.is_empty() {
        // Still surface a broken notification setup.
        notify_config.validate()?;
        info!("No new peers, nothing to send");
        return Ok(DispatchSummary::default());
    }

    let mailer = SmtpMailer::new(notify_config)?;
    notify::dispatch(&batch.succeeded, notify_config, &mailer).await
}

fn print_batch(batch: &BatchReport) {
    println!(
        "Provisioning: {} succeeded, {} skipped, {} failed",
        batch.succeeded.len(),
        batch.skipped.len(),
        batch.failed.len()
    );

    for result in &batch.succeeded {
        let address = result.address.map(|a| a.to_string()).unwrap_or_default();
        let profile = result
            .profile_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "  + {}  {}  {}",
            result.name.as_deref().unwrap_or(&result.identity),
            address,
            profile
        );
    }
    for result in &batch.skipped {
        println!(
            "  = {}  skipped: {}",
            result.name.as_deref().unwrap_or(&result.identity),
            result.reason.as_deref().unwrap_or_default()
        );
    }
    for result in &batch.failed {
        let kind = result.failure.map(|k| k.to_string()).unwrap_or_default();
        println!(
            "  ! {}  {} at {}: {}",
            result.identity,
            kind,
            result.stage,
            result.reason.as_deref().unwrap_or_default()
        );
    }

    if batch.reloaded {
        println!("Service reload: done");
    } else if let Some(reload_error) = &batch.reload_error {
        println!("Service reload: FAILED ({})", reload_error);
    } else {
        println!("Service reload: not needed");
    }
}

fn print_dispatch(summary: &DispatchSummary) {
    println!("Notification: {} sent, {} failed", summary.sent, summary.failed);
    for failure in &summary.failures {
        println!("  ! {}  {}", failure.recipient, failure.reason);
    }
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some profiles were not delivered");
    }
}
