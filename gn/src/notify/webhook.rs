//! Webhook transport and Slack message building

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::NotifyError;
use crate::config::WebhookConfig;
use crate::domain::{DiffEntry, DiffSnapshot, Link};

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), NotifyError>;
}

/// Plain HTTP POST with a JSON body
pub struct HttpWebhook {
    http: Client,
}

impl HttpWebhook {
    pub fn from_config(config: &WebhookConfig) -> Result<Self, NotifyError> {
        debug!(timeout_ms = config.timeout_ms, "HttpWebhook::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhook {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), NotifyError> {
        debug!(%url, "HttpWebhook::post_json: called");
        let response = self.http.post(url).json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    pub username: String,
    pub text: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackAttachment {
    pub fallback: String,
    pub title: String,
    pub text: String,
    pub mrkdwn_in: Vec<String>,
}

/// `<href|text>`
fn slack_link(link: &Link) -> String {
    format!("<{}|{}>", link.href, link.text)
}

fn entry_attachment(entry: &DiffEntry) -> Option<SlackAttachment> {
    let title = entry.title();

    if let Some(error) = entry.error() {
        return Some(SlackAttachment {
            fallback: format!("{}: {}", title.text, error),
            title: title.text.clone(),
            text: error.to_string(),
            mrkdwn_in: Vec::new(),
        });
    }

    if !entry.changed() {
        return None;
    }

    let links = entry.change_links();
    let attachment = match (entry, links.as_slice()) {
        // A single moved reference gets its before/after link under a linked title
        (DiffEntry::CommitTracking(_), [only]) => SlackAttachment {
            fallback: only.text.clone(),
            title: slack_link(title),
            text: slack_link(only),
            mrkdwn_in: vec!["text".to_string()],
        },
        _ => SlackAttachment {
            fallback: format!("{} ({})", title.text, links.len()),
            title: if title.title.is_empty() {
                title.text.clone()
            } else {
                title.title.clone()
            },
            text: links.iter().map(|l| slack_link(l)).collect::<Vec<_>>().join("\n"),
            mrkdwn_in: vec!["text".to_string()],
        },
    };
    Some(attachment)
}

/// One message per changed repository; unchanged repositories produce nothing
pub fn build_slack_messages(snapshot: &DiffSnapshot, username: &str) -> Vec<SlackMessage> {
    debug!(repos = snapshot.repos.len(), "build_slack_messages: called");
    snapshot
        .repos
        .iter()
        .filter(|repo| repo.changed)
        .map(|repo| SlackMessage {
            username: username.to_string(),
            text: format!("*Changes for {}*:", slack_link(&repo.repo)),
            attachments: repo.entries.iter().filter_map(entry_attachment).collect(),
        })
        .collect()
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records posts instead of sending them
    #[derive(Default)]
    pub struct RecordingWebhook {
        pub posts: Mutex<Vec<(String, serde_json::Value)>>,
        pub fail: bool,
    }

    impl RecordingWebhook {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl WebhookTransport for RecordingWebhook {
        async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            self.posts.lock().unwrap().push((url.to_string(), body.clone()));
            Ok(())
        }
    }
}
