//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::UserKey;

/// gitnotify - scheduled change notifications for git repositories
#[derive(Parser)]
#[command(
    name = "gn",
    about = "Scheduled branch, tag and commit notifications for git repositories",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler in the foreground (SIGHUP reloads users)
    Daemon,

    /// Poll one user's repositories now and send notifications
    Poll {
        /// User as <provider>/<username>
        user: UserKey,
    },

    /// List archived change snapshots for a user, newest first
    History {
        /// User as <provider>/<username>
        user: UserKey,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one archived change snapshot
    Show {
        /// User as <provider>/<username>
        user: UserKey,

        /// Snapshot id (unix timestamp)
        id: i64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a user's schedule and its next run times
    Schedule {
        /// User as <provider>/<username>
        user: UserKey,

        /// Number of upcoming runs to list
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// List known users and whether they are scheduled
    Users {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gitnotify")
        .join("logs")
        .join("gitnotify.log")
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_poll() {
        let cli = Cli::try_parse_from(["gn", "-l", "debug", "poll", "github/alice"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Poll { user } => assert_eq!(user, UserKey::new("github", "alice")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_json() {
        let cli = Cli::try_parse_from(["gn", "show", "gitlab/bob", "1700000000", "--format", "json"]).unwrap();
        match cli.command {
            Command::Show { user, id, format } => {
                assert_eq!(user.provider, "gitlab");
                assert_eq!(id, 1_700_000_000);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_user() {
        assert!(Cli::try_parse_from(["gn", "poll", "alice"]).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
