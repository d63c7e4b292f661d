// SPDX-License-Identifier: AGPL-3.0-or-later
//! Throttled, per-recipient isolated delivery loop

use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use super::{Mailer, NotifyConfig, OutgoingMessage};
use crate::error::{Result, RosterError};
use crate::provision::ProvisioningResult;

/// A recipient that did not receive its profile
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    pub recipient: String,
    pub reason: String,
}

/// Counts for one dispatch phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub failures: Vec<DispatchFailure>,
}

/// Mail each succeeded peer its profile.
///
/// Fails as a whole only when `config` is incomplete, before any send.
pub async fn dispatch(
    succeeded: &[ProvisioningResult],
    config: &NotifyConfig,
    mailer: &dyn Mailer,
) -> Result<DispatchSummary> {
    config.validate()?;

    let deliveries: Vec<(&str, &str, &Path)> = succeeded
        .iter()
        .filter_map(|result| {
            Some((
                result.recipient.as_deref()?,
                result.name.as_deref()?,
                result.profile_path.as_deref()?,
            ))
        })
        .collect();

    let mut summary = DispatchSummary::default();
    info!(
        recipients = deliveries.len(),
        security = ?config.security(),
        delay_secs = config.delay.as_secs_f64(),
        "Starting profile delivery"
    );

    for (index, (recipient, name, profile_path)) in deliveries.iter().enumerate() {
        match deliver(config, mailer, recipient, name, profile_path).await {
            Ok(()) => {
                summary.sent += 1;
                info!(recipient = %recipient, "Profile sent");
            }
            Err(e) => {
                summary.failed += 1;
                error!(recipient = %recipient, error = %e, "Profile delivery failed");
                summary.failures.push(DispatchFailure {
                    recipient: recipient.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if index + 1 < deliveries.len() && !config.delay.is_zero() {
            tokio::time::sleep(config.delay).await;
        }
    }

    if summary.failed > 0 {
        warn!(
            sent = summary.sent,
            failed = summary.failed,
            "Profile delivery finished with failures"
        );
    } else {
        info!(sent = summary.sent, "Profile delivery finished");
    }

    Ok(summary)
}

async fn deliver(
    config: &NotifyConfig,
    mailer: &dyn Mailer,
    recipient: &str,
    name: &str,
    profile_path: &Path,
) -> Result<()> {
    let attachment = std::fs::read(profile_path).map_err(|e| RosterError::NotifyFailed {
        recipient: recipient.to_string(),
        message: format!("cannot read {}: {}", profile_path.display(), e),
    })?;

    let attachment_name = profile_path
        .file_name()
        .map(|file| file.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("{}.conf", name));

    let message = OutgoingMessage {
        from: config.from.clone().unwrap_or_default(),
        to: recipient.to_string(),
        subject: config.subject.clone(),
        body: instructions(name, &attachment_name),
        attachment_name,
        attachment,
    };

    mailer.send(&message).await
}

fn instructions(name: &str, attachment_name: &str) -> String {
    format!(
        "Hello,\n\n\
         Your WireGuard VPN access is ready (peer name: {name}).\n\n\
         To connect:\n\
         1. Install the WireGuard client: https://www.wireguard.com/install/\n\
         2. Import the attached file {attachment_name} as a new tunnel.\n\
         3. Activate the tunnel.\n\n\
         The attached file contains your private key. Do not share it.\n",
        name = name,
        attachment_name = attachment_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyConfig;
    use crate::provision::{ProvisionStage, ProvisionStatus};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Records messages; fails for configured recipients
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingMessage>>,
        sent_at: Mutex<Vec<tokio::time::Instant>>,
        reject: Vec<String>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
            if self.reject.contains(&message.to) {
                return Err(RosterError::NotifyFailed {
                    recipient: message.to.clone(),
                    message: "535 authentication failed".to_string(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn config(delay_secs: u64) -> NotifyConfig {
        NotifyConfig {
            server: Some("smtp.example.com".to_string()),
            from: Some("vpn@example.com".to_string()),
            credentials: NotifyConfig::credentials_from(
                Some("vpn".to_string()),
                Some("secret".to_string()),
            ),
            delay: Duration::from_secs(delay_secs),
            ..NotifyConfig::default()
        }
    }

    fn succeeded(dir: &TempDir, recipients: &[&str]) -> Vec<ProvisioningResult> {
        recipients
            .iter()
            .map(|recipient| {
                let name = recipient.replace('@', "_");
                let path = dir.path().join(format!("{}.conf", name));
                fs::write(&path, format!("[Interface]\n# {}\n", name)).unwrap();
                ProvisioningResult {
                    identity: recipient.to_string(),
                    name: Some(name),
                    status: ProvisionStatus::Success,
                    stage: ProvisionStage::Done,
                    failure: None,
                    reason: None,
                    address: None,
                    profile_path: Some(path),
                    recipient: Some(recipient.to_string()),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_sends_profile_as_attachment() {
        let dir = tempdir().unwrap();
        let mailer = RecordingMailer::default();
        let results = succeeded(&dir, &["a@x.com"]);

        let summary = dispatch(&results, &config(0), &mailer).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 0);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].to, "a@x.com");
        assert_eq!(sent[0].from, "vpn@example.com");
        assert_eq!(sent[0].subject, "Your WireGuard VPN Configuration");
        assert_eq!(sent[0].attachment_name, "a_x.com.conf");
        assert_eq!(sent[0].attachment, b"[Interface]\n# a_x.com\n");
        assert!(sent[0].body.contains("a_x.com.conf"));
    }

    #[tokio::test]
    async fn test_invalid_config_sends_nothing() {
        let dir = tempdir().unwrap();
        let mailer = RecordingMailer::default();
        let results = succeeded(&dir, &["a@x.com", "b@y.org"]);
        let mut config = config(0);
        config.credentials = None;

        let err = dispatch(&results, &config, &mailer).await.unwrap_err();
        assert!(matches!(err, RosterError::NotifyConfigInvalid { .. }));
        assert!(mailer.sent_at.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_stop_loop() {
        let dir = tempdir().unwrap();
        let mailer = RecordingMailer {
            reject: vec!["b@y.org".to_string()],
            ..RecordingMailer::default()
        };
        let results = succeeded(&dir, &["a@x.com", "b@y.org", "c@z.net", "d@w.io"]);
        fs::remove_file(results[3].profile_path.as_ref().unwrap()).unwrap();

        let summary = dispatch(&results, &config(0), &mailer).await.unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures[0].recipient, "b@y.org");
        assert_eq!(summary.failures[1].recipient, "d@w.io");
        assert!(summary.failures[1].reason.contains("cannot read"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_sends_but_not_after_last() {
        let dir = tempdir().unwrap();
        let mailer = RecordingMailer::default();
        let results = succeeded(&dir, &["a@x.com", "b@y.org", "c@z.net"]);

        let start = tokio::time::Instant::now();
        dispatch(&results, &config(2), &mailer).await.unwrap();

        let sent_at = mailer.sent_at.lock().unwrap();
        assert_eq!(sent_at.len(), 3);
        assert_eq!(sent_at[1] - sent_at[0], Duration::from_secs(2));
        assert_eq!(sent_at[2] - sent_at[1], Duration::from_secs(2));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_nothing_to_send() {
        let mailer = RecordingMailer::default();
        let summary = dispatch(&[], &config(2), &mailer).await.unwrap();
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 0);
    }
}
