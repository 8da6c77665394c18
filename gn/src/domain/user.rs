//! User settings: identity, notification preferences and tracked repositories

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::RepoState;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

/// Check that an address looks like `local@domain.tld`
pub fn is_valid_email(address: &str) -> bool {
    !address.is_empty() && EMAIL_RE.is_match(address)
}

/// Identifies one user: `<provider>/<username>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey {
    pub provider: String,
    pub username: String,
}

impl UserKey {
    pub fn new(provider: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            username: username.into(),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.username)
    }
}

impl FromStr for UserKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "UserKey::from_str: called");
        match s.split_once('/') {
            Some((provider, username)) if !provider.is_empty() && !username.is_empty() && !username.contains('/') => {
                Ok(Self::new(provider, username))
            }
            _ => Err(format!("Invalid user '{}'. Expected <provider>/<username>", s)),
        }
    }
}

/// Who the user is and how we talk to their provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    /// Provider name (github, gitlab)
    pub provider: String,
    /// Username at the provider
    pub username: String,
    /// Display name used when addressing the user
    pub name: String,
    /// Account email
    pub email: String,
    /// API token used to query the provider
    pub token: String,
}

/// Webhook flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    /// Structured Slack message per changed repository
    Slack,
    /// Raw JSON snapshot
    Generic,
}

/// Notification preferences and schedule fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Overrides the identity email when set
    pub email: String,

    #[serde(rename = "webhook-url")]
    pub webhook_url: String,

    /// "slack" or anything else for a generic webhook
    #[serde(rename = "webhook-type")]
    pub webhook_type: String,

    /// Hour field, e.g. "9" or "9,17"
    pub hour: String,

    /// Weekday field, e.g. "1-5", "mon,thu" or "*"
    pub weekday: String,

    /// IANA timezone name
    pub timezone: String,

    pub disabled: bool,
}

impl NotifySettings {
    pub fn webhook_kind(&self) -> WebhookKind {
        if self.webhook_type.eq_ignore_ascii_case("slack") {
            WebhookKind::Slack
        } else {
            WebhookKind::Generic
        }
    }

    pub fn has_webhook(&self) -> bool {
        let url = self.webhook_url.trim();
        url.starts_with("http://") || url.starts_with("https://")
    }
}

/// One watched repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackedRepo {
    /// Repository identifier, `owner/name`
    pub repo: String,
    /// Report newly created branches
    pub branches: bool,
    /// Report newly created tags
    pub tags: bool,
    /// Branch or tag names whose commit pointer is watched
    pub refs: Vec<String>,
}

impl TrackedRepo {
    pub fn tracks_commits(&self) -> bool {
        !self.refs.is_empty()
    }
}

/// Persisted per-user settings plus last-known repository state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub identity: Identity,
    pub notify: NotifySettings,
    pub repos: Vec<TrackedRepo>,
    /// Last observed state keyed by repository identifier
    pub state: BTreeMap<String, RepoState>,
}

impl UserConfig {
    pub fn key(&self) -> UserKey {
        UserKey::new(&self.identity.provider, &self.identity.username)
    }

    /// Address notifications go to
    pub fn email(&self) -> &str {
        if self.notify.email.trim().is_empty() {
            self.identity.email.trim()
        } else {
            self.notify.email.trim()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.identity.name.trim().is_empty() {
            &self.identity.username
        } else {
            self.identity.name.trim()
        }
    }

    /// Either a usable address or a webhook is configured
    pub fn has_delivery_channel(&self) -> bool {
        is_valid_email(self.email()) || self.notify.has_webhook()
    }

    /// The configured timezone, UTC when unset or unknown
    pub fn timezone(&self) -> Tz {
        self.notify.timezone.trim().parse::<Tz>().unwrap_or(Tz::UTC)
    }
}
