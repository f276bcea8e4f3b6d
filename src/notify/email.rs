// Email notification channel over SMTP
//
// Port 465 uses implicit TLS, any other port STARTTLS.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{MessageRenderer, NotificationChannel, NotifyError};

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

const SMTPS_PORT: u16 = 465;
const SUBJECT: &str = "Container Notification";

/// SMTP account and addresses of the email channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    /// Sender address, also the SMTP login
    pub sender: String,
    pub recipient: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

pub struct EmailChannel {
    settings: EmailSettings,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    renderer: Arc<MessageRenderer>,
}

impl EmailChannel {
    /// Prepares the SMTP transport; no connection is made until the first send
    pub fn new(
        settings: EmailSettings,
        renderer: Arc<MessageRenderer>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let builder = if settings.smtp_port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)?
        };

        let transport = builder
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(EmailChannel {
            settings,
            transport,
            renderer,
        })
    }

    fn message(&self, text: &str) -> Result<Message, NotifyError> {
        let message = Message::builder()
            .from(self.settings.sender.parse()?)
            .to(self.settings.recipient.parse()?)
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())?;
        Ok(message)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, container_id: &str) -> Result<(), NotifyError> {
        let text = self.renderer.render(container_id)?;
        let message = self.message(&text)?;
        self.transport.send(message).await?;

        debug!(
            "email notification sent to {} for {}",
            self.settings.recipient, container_id
        );
        Ok(())
    }
}
