// SPDX-License-Identifier: AGPL-3.0-or-later
//! SMTP transport built on lettre

use async_trait::async_trait;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{Mailer, NotifyConfig, OutgoingMessage, TransportSecurity};
use crate::error::{Result, RosterError};

/// Mailer holding one configured SMTP transport for the whole dispatch
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport; `config` must already be valid
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        config.validate()?;

        let invalid = |message: String| RosterError::NotifyConfigInvalid { message };
        let server = config.server.as_deref().unwrap_or_default();
        let credentials = config
            .credentials
            .as_ref()
            .ok_or_else(|| invalid("missing credentials".to_string()))?;

        let builder = match config.security() {
            TransportSecurity::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(server),
            TransportSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
            }
        }
        .map_err(|e| invalid(format!("SMTP server '{}': {}", server, e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();

        debug!(
            server = %server,
            port = config.port,
            security = ?config.security(),
            "Configured SMTP transport"
        );

        Ok(Self { transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let email = build_message(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| RosterError::NotifyFailed {
                recipient: message.to.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// Build a multipart message: plain-text instructions plus the profile as a
/// base64 attachment
pub fn build_message(message: &OutgoingMessage) -> Result<Message> {
    let failed = |reason: String| RosterError::NotifyFailed {
        recipient: message.to.clone(),
        message: reason,
    };

    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| failed(format!("invalid sender '{}': {}", message.from, e)))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| failed(format!("invalid recipient address: {}", e)))?;

    let content_type = ContentType::parse("application/octet-stream")
        .map_err(|e| failed(format!("invalid content type: {}", e)))?;
    let body = Body::new_with_encoding(message.attachment.clone(), ContentTransferEncoding::Base64)
        .map_err(|_| failed("attachment cannot be base64 encoded".to_string()))?;
    let attachment = Attachment::new(message.attachment_name.clone()).body(body, content_type);

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(message.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| failed(format!("cannot build message: {}", e)))
}
