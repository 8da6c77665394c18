//! gitnotify configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::scheduler::SchedulerConfig;

/// Main gitnotify configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Base URL of the web front end, used in mail links
    #[serde(rename = "website-url")]
    pub website_url: String,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Remote provider API configuration
    pub remote: RemoteConfig,

    /// Outgoing mail configuration
    pub mail: MailConfig,

    /// Webhook delivery configuration
    pub webhook: WebhookConfig,

    /// Template overrides
    pub templates: TemplatesConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .gitnotify.yml
        let local_config = PathBuf::from(".gitnotify.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/gitnotify/gitnotify.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("gitnotify").join("gitnotify.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the per-user settings and diff archive
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/gitnotify on Linux)
        let data_dir = dirs::data_dir()
            .map(|d| d.join("gitnotify"))
            .unwrap_or_else(|| PathBuf::from("data"));

        Self { data_dir }
    }
}

/// Remote provider API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    #[serde(rename = "github-api-url")]
    pub github_api_url: String,

    #[serde(rename = "gitlab-api-url")]
    pub gitlab_api_url: String,

    /// Upper bound for fetching one repository, in milliseconds
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// Items requested per page
    #[serde(rename = "per-page")]
    pub per_page: u32,

    /// Pages fetched at most per listing
    #[serde(rename = "max-pages")]
    pub max_pages: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            github_api_url: "https://api.github.com".to_string(),
            gitlab_api_url: "https://gitlab.com/api/v4".to_string(),
            fetch_timeout_ms: 30_000,
            per_page: 100,
            max_pages: 10,
        }
    }
}

impl RemoteConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Outgoing mail configuration
///
/// Mail goes through an HTTP relay; leaving `relay-url` empty disables email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    #[serde(rename = "relay-url")]
    pub relay_url: String,

    /// Environment variable containing the relay API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "from-address")]
    pub from_address: String,

    #[serde(rename = "from-name")]
    pub from_name: String,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            api_key_env: "GITNOTIFY_MAIL_KEY".to_string(),
            from_address: String::new(),
            from_name: "GitNotify".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        !self.relay_url.trim().is_empty() && !self.from_address.trim().is_empty()
    }
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Name Slack messages are posted under
    pub username: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            username: "gitnotify".to_string(),
        }
    }
}

/// Template overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Directory searched for `<name>.hbs` before the embedded templates
    pub dir: Option<PathBuf>,
}
