// Notification channel configuration and HTTP channels
//
// Each channel is enabled by its credentials in the environment:
//
// | Channel    | Variables                                     |
// |------------|-----------------------------------------------|
// | discord    | DISCORD_WEBHOOK_URL                           |
// | slack      | SLACK_WEBHOOK_URL                             |
// | telegram   | TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID          |
// | pushover   | PUSHOVER_API_TOKEN, PUSHOVER_USER_KEY         |
// | pushbullet | PUSHBULLET_ACCESS_TOKEN                       |
// | whatsapp   | WHATSAPP_API_URL, WHATSAPP_RECIPIENT          |
// | email      | EMAIL_SENDER, EMAIL_RECIPIENT, EMAIL_PASSWORD |
//
// Email also reads SMTP_SERVER_HOST and SMTP_SERVER_PORT, defaulting to
// smtp.gmail.com:587.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::email::{EmailChannel, EmailSettings, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT};
use super::{MessageRenderer, NotificationChannel, NotifyError};

const TELEGRAM_API: &str = "https://api.telegram.org";
const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";
const PUSHBULLET_API: &str = "https://api.pushbullet.com/v2/pushes";

/// An HTTP notification service and its credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookService {
    Discord { webhook_url: String },
    Slack { webhook_url: String },
    Telegram { bot_token: String, chat_id: String },
    Pushover { api_token: String, user_key: String },
    Pushbullet { access_token: String },
    WhatsApp { api_url: String, recipient: String },
}

impl WebhookService {
    pub fn name(&self) -> &'static str {
        match self {
            WebhookService::Discord { .. } => "discord",
            WebhookService::Slack { .. } => "slack",
            WebhookService::Telegram { .. } => "telegram",
            WebhookService::Pushover { .. } => "pushover",
            WebhookService::Pushbullet { .. } => "pushbullet",
            WebhookService::WhatsApp { .. } => "whatsapp",
        }
    }
}

/// A configured notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Webhook(WebhookService),
    Email(EmailSettings),
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Webhook(service) => service.name(),
            ChannelKind::Email(_) => "email",
        }
    }

    /// Channels enabled by the process environment
    pub fn from_env() -> Vec<ChannelKind> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Channels whose credentials are all present and non-empty
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Vec<ChannelKind> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut services = Vec::new();

        if let Some(webhook_url) = var("DISCORD_WEBHOOK_URL") {
            services.push(WebhookService::Discord { webhook_url });
        }
        if let Some(webhook_url) = var("SLACK_WEBHOOK_URL") {
            services.push(WebhookService::Slack { webhook_url });
        }
        if let (Some(bot_token), Some(chat_id)) = (var("TELEGRAM_BOT_TOKEN"), var("TELEGRAM_CHAT_ID")) {
            services.push(WebhookService::Telegram { bot_token, chat_id });
        }
        if let (Some(api_token), Some(user_key)) = (var("PUSHOVER_API_TOKEN"), var("PUSHOVER_USER_KEY")) {
            services.push(WebhookService::Pushover { api_token, user_key });
        }
        if let Some(access_token) = var("PUSHBULLET_ACCESS_TOKEN") {
            services.push(WebhookService::Pushbullet { access_token });
        }
        if let (Some(api_url), Some(recipient)) = (var("WHATSAPP_API_URL"), var("WHATSAPP_RECIPIENT")) {
            services.push(WebhookService::WhatsApp { api_url, recipient });
        }

        let mut kinds: Vec<ChannelKind> = services.into_iter().map(ChannelKind::Webhook).collect();

        if let (Some(sender), Some(recipient), Some(password)) =
            (var("EMAIL_SENDER"), var("EMAIL_RECIPIENT"), var("EMAIL_PASSWORD"))
        {
            let smtp_port = match var("SMTP_SERVER_PORT").map(|raw| raw.parse::<u16>()) {
                Some(Ok(port)) => port,
                Some(Err(e)) => {
                    warn!("Invalid SMTP_SERVER_PORT ({}), using {}", e, DEFAULT_SMTP_PORT);
                    DEFAULT_SMTP_PORT
                }
                None => DEFAULT_SMTP_PORT,
            };
            kinds.push(ChannelKind::Email(EmailSettings {
                sender,
                recipient,
                password,
                smtp_host: var("SMTP_SERVER_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port,
            }));
        }

        kinds
    }
}

/// Channel that delivers rendered messages over HTTPS
pub struct HttpChannel {
    service: WebhookService,
    client: Client,
    renderer: Arc<MessageRenderer>,
}

impl HttpChannel {
    pub fn new(service: WebhookService, client: Client, renderer: Arc<MessageRenderer>) -> Self {
        HttpChannel {
            service,
            client,
            renderer,
        }
    }

    /// Builds one channel per kind; webhook channels share a single HTTP client
    pub fn build_all(
        kinds: Vec<ChannelKind>,
        renderer: Arc<MessageRenderer>,
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn NotificationChannel>>, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;

        kinds
            .into_iter()
            .map(|kind| -> Result<Arc<dyn NotificationChannel>, NotifyError> {
                let channel: Arc<dyn NotificationChannel> = match kind {
                    ChannelKind::Webhook(service) => {
                        Arc::new(HttpChannel::new(service, client.clone(), renderer.clone()))
                    }
                    ChannelKind::Email(settings) => {
                        Arc::new(EmailChannel::new(settings, renderer.clone(), timeout)?)
                    }
                };
                Ok(channel)
            })
            .collect()
    }

    fn request(&self, message: &str) -> RequestBuilder {
        match &self.service {
            WebhookService::Discord { webhook_url } => self
                .client
                .post(webhook_url)
                .json(&json!({ "content": message })),
            WebhookService::Slack { webhook_url } => self
                .client
                .post(webhook_url)
                .json(&json!({ "text": message })),
            WebhookService::Telegram { bot_token, chat_id } => self
                .client
                .post(format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token))
                .json(&json!({ "chat_id": chat_id, "text": message })),
            WebhookService::Pushover { api_token, user_key } => self.client.post(PUSHOVER_API).form(&[
                ("token", api_token.as_str()),
                ("user", user_key.as_str()),
                ("message", message),
            ]),
            WebhookService::Pushbullet { access_token } => self
                .client
                .post(PUSHBULLET_API)
                .header("Access-Token", access_token)
                .json(&json!({
                    "type": "note",
                    "title": "Container Notification",
                    "body": message,
                })),
            WebhookService::WhatsApp { api_url, recipient } => self
                .client
                .post(api_url)
                .json(&json!({ "to": recipient, "body": message })),
        }
    }
}

#[async_trait]
impl NotificationChannel for HttpChannel {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn send(&self, container_id: &str) -> Result<(), NotifyError> {
        let message = self.renderer.render(container_id)?;
        let response = self.request(&message).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                channel: self.name().to_string(),
                status,
                body,
            });
        }

        debug!("{} notification sent for {}", self.name(), container_id);
        Ok(())
    }
}
