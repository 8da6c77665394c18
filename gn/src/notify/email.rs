//! Email transport
//!
//! Mail is handed to an HTTP relay as JSON; the relay owns SMTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::NotifyError;
use crate::config::MailConfig;

/// A fully rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    from_name: &'a str,
    #[serde(flatten)]
    message: &'a MailMessage,
}

/// Posts messages to the configured mail relay
pub struct HttpMailRelay {
    http: Client,
    url: String,
    api_key: Option<String>,
    from: String,
    from_name: String,
}

impl HttpMailRelay {
    pub fn from_config(config: &MailConfig) -> Result<Self, NotifyError> {
        debug!(relay = %config.relay_url, "HttpMailRelay::from_config: called");
        if !config.is_configured() {
            return Err(NotifyError::NotConfigured("mail relay-url and from-address".to_string()));
        }

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "HttpMailRelay::from_config: no API key set");
        }

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            url: config.relay_url.clone(),
            api_key,
            from: config.from_address.clone(),
            from_name: config.from_name.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        debug!(to = %message.to, subject = %message.subject, "HttpMailRelay::send: called");
        let body = RelayRequest {
            from: &self.from,
            from_name: &self.from_name,
            message,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            debug!(status, "HttpMailRelay::send: relay error");
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }
}
