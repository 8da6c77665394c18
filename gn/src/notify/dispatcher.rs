//! NotificationDispatcher - fans a snapshot out to a user's channels
//!
//! Channels are delivered concurrently and independently. A failure is
//! logged and reported for that channel only; it never touches the others
//! and never fails the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::email::{HttpMailRelay, MailMessage, MailTransport};
use super::templates::TemplateRenderer;
use super::webhook::{HttpWebhook, WebhookTransport, build_slack_messages};
use super::NotifyError;
use crate::config::Config;
use crate::domain::{DiffEntry, DiffSnapshot, Link, RepoDiff, UserConfig, WebhookKind, is_valid_email};
use crate::store::SnapshotId;

const SUBJECT_PREFIX: &str = "[GitNotify] New Updates from your Repositories - ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    Email,
    Slack,
    GenericWebhook,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Slack => write!(f, "slack"),
            Self::GenericWebhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    /// The channel chose not to send (nothing changed)
    Suppressed,
    Failed(String),
}

/// Per-channel results of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(Channel, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|(c, _)| *c == channel).map(|(_, o)| o)
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ChannelOutcome::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ChannelOutcome::Failed(_)))
            .count()
    }
}

#[derive(Debug, Serialize)]
struct EntryView<'a> {
    title: &'a Link,
    error: Option<&'a str>,
    change_type: &'static str,
    changed: bool,
    show: bool,
    changes: Vec<&'a Link>,
}

#[derive(Debug, Serialize)]
struct RepoView<'a> {
    repo: &'a Link,
    changed: bool,
    show: bool,
    entries: Vec<EntryView<'a>>,
}

/// Rendering context handed to the mail templates
#[derive(Debug, Serialize)]
struct MailContext<'a> {
    website_url: &'a str,
    user: String,
    name: &'a str,
    subject: &'a str,
    snapshot_url: Option<String>,
    repos: Vec<RepoView<'a>>,
}

fn entry_view(entry: &DiffEntry) -> EntryView<'_> {
    let changed = entry.changed();
    let error = entry.error();
    EntryView {
        title: entry.title(),
        error,
        change_type: entry.change_type(),
        changed,
        show: changed || error.is_some(),
        changes: entry.change_links(),
    }
}

fn repo_view(repo: &RepoDiff) -> RepoView<'_> {
    RepoView {
        repo: &repo.repo,
        changed: repo.changed,
        show: repo.changed || repo.has_errors(),
        entries: repo.entries.iter().map(entry_view).collect(),
    }
}

pub struct NotificationDispatcher {
    mailer: Option<Arc<dyn MailTransport>>,
    webhook: Arc<dyn WebhookTransport>,
    renderer: TemplateRenderer,
    website_url: String,
    slack_username: String,
}

impl NotificationDispatcher {
    pub fn new(
        mailer: Option<Arc<dyn MailTransport>>,
        webhook: Arc<dyn WebhookTransport>,
        renderer: TemplateRenderer,
        website_url: impl Into<String>,
        slack_username: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            webhook,
            renderer,
            website_url: website_url.into(),
            slack_username: slack_username.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        debug!("NotificationDispatcher::from_config: called");
        let mailer: Option<Arc<dyn MailTransport>> = if config.mail.is_configured() {
            Some(Arc::new(HttpMailRelay::from_config(&config.mail)?))
        } else {
            info!("Email is not configured");
            None
        };

        Ok(Self::new(
            mailer,
            Arc::new(HttpWebhook::from_config(&config.webhook)?),
            TemplateRenderer::new(config.templates.dir.clone()),
            config.website_url.clone(),
            config.webhook.username.clone(),
        ))
    }

    /// Channels this user would be notified on
    pub fn eligible_channels(&self, conf: &UserConfig) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.mailer.is_some() && is_valid_email(conf.email()) {
            channels.push(Channel::Email);
        }
        if conf.notify.has_webhook() {
            channels.push(match conf.notify.webhook_kind() {
                WebhookKind::Slack => Channel::Slack,
                WebhookKind::Generic => Channel::GenericWebhook,
            });
        }
        debug!(user = %conf.key(), ?channels, "NotificationDispatcher::eligible_channels: done");
        channels
    }

    /// At least one channel would carry this user's notifications
    pub fn can_reach(&self, conf: &UserConfig) -> bool {
        !self.eligible_channels(conf).is_empty()
    }

    /// Deliver `snapshot` on every eligible channel
    pub async fn dispatch(
        &self,
        snapshot: &DiffSnapshot,
        conf: &UserConfig,
        snapshot_id: Option<SnapshotId>,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let user = conf.key();
        debug!(%user, changed = snapshot.has_changes(), ?snapshot_id, "NotificationDispatcher::dispatch: called");
        let channels = self.eligible_channels(conf);

        let results = join_all(
            channels
                .iter()
                .map(|channel| self.deliver(*channel, snapshot, conf, snapshot_id, now)),
        )
        .await;

        let mut report = DispatchReport::default();
        for (channel, result) in channels.into_iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%user, %channel, error = %e, "Notification delivery failed");
                    ChannelOutcome::Failed(e.to_string())
                }
            };
            debug!(%user, %channel, ?outcome, "NotificationDispatcher::dispatch: channel done");
            report.outcomes.push((channel, outcome));
        }

        info!(%user, delivered = report.delivered(), failed = report.failed(), "Dispatch finished");
        report
    }

    async fn deliver(
        &self,
        channel: Channel,
        snapshot: &DiffSnapshot,
        conf: &UserConfig,
        snapshot_id: Option<SnapshotId>,
        now: DateTime<Utc>,
    ) -> Result<ChannelOutcome, NotifyError> {
        match channel {
            Channel::Email => self.send_email(snapshot, conf, snapshot_id, now).await,
            Channel::Slack => self.send_slack(snapshot, conf).await,
            Channel::GenericWebhook => self.send_generic(snapshot, conf).await,
        }
    }

    fn subject(conf: &UserConfig, now: DateTime<Utc>) -> String {
        let local = now.with_timezone(&conf.timezone());
        format!("{}{}", SUBJECT_PREFIX, local.format("%d %b %Y | %H Hrs"))
    }

    fn snapshot_url(&self, conf: &UserConfig, snapshot_id: Option<SnapshotId>) -> Option<String> {
        let base = self.website_url.trim_end_matches('/');
        match snapshot_id {
            Some(id) if !base.is_empty() => Some(format!("{}/changes/{}/{}", base, conf.key(), id)),
            _ => None,
        }
    }

    /// Render both mail bodies for `snapshot`
    pub fn render_mail(
        &self,
        snapshot: &DiffSnapshot,
        conf: &UserConfig,
        snapshot_id: Option<SnapshotId>,
        now: DateTime<Utc>,
    ) -> Result<MailMessage, NotifyError> {
        let subject = Self::subject(conf, now);
        let context = MailContext {
            website_url: &self.website_url,
            user: conf.key().to_string(),
            name: conf.display_name(),
            subject: &subject,
            snapshot_url: self.snapshot_url(conf, snapshot_id),
            repos: snapshot.repos.iter().map(repo_view).collect(),
        };

        let html = self.renderer.render_html("changes_mail", &context)?;
        let text = self.renderer.render_text("changes_mail_text", &context)?;

        Ok(MailMessage {
            to: conf.email().to_string(),
            to_name: conf.display_name().to_string(),
            subject,
            text,
            html,
        })
    }

    async fn send_email(
        &self,
        snapshot: &DiffSnapshot,
        conf: &UserConfig,
        snapshot_id: Option<SnapshotId>,
        now: DateTime<Utc>,
    ) -> Result<ChannelOutcome, NotifyError> {
        let Some(mailer) = &self.mailer else {
            return Err(NotifyError::NotConfigured("mail".to_string()));
        };
        if !snapshot.has_changes() {
            debug!(user = %conf.key(), "NotificationDispatcher::send_email: nothing changed, suppressed");
            return Ok(ChannelOutcome::Suppressed);
        }

        let message = self.render_mail(snapshot, conf, snapshot_id, now)?;
        mailer.send(&message).await?;
        Ok(ChannelOutcome::Delivered)
    }

    async fn send_slack(&self, snapshot: &DiffSnapshot, conf: &UserConfig) -> Result<ChannelOutcome, NotifyError> {
        let messages = build_slack_messages(snapshot, &self.slack_username);
        if messages.is_empty() {
            debug!(user = %conf.key(), "NotificationDispatcher::send_slack: nothing changed, suppressed");
            return Ok(ChannelOutcome::Suppressed);
        }

        // Post every message even if an earlier one failed
        let total = messages.len();
        let mut first_error = None;
        let mut failures = 0;
        for message in &messages {
            let body = serde_json::to_value(message).map_err(|e| NotifyError::Encode(e.to_string()))?;
            if let Err(e) = self.webhook.post_json(&conf.notify.webhook_url, &body).await {
                failures += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(ChannelOutcome::Delivered),
            Some(e) => Ok(ChannelOutcome::Failed(format!(
                "{} of {} Slack messages failed: {}",
                failures, total, e
            ))),
        }
    }

    async fn send_generic(&self, snapshot: &DiffSnapshot, conf: &UserConfig) -> Result<ChannelOutcome, NotifyError> {
        let body = serde_json::to_value(snapshot).map_err(|e| NotifyError::Encode(e.to_string()))?;
        self.webhook.post_json(&conf.notify.webhook_url, &body).await?;
        Ok(ChannelOutcome::Delivered)
    }
}
