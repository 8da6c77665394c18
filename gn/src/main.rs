//! gitnotify - scheduled change notifications for git repositories
//!
//! CLI entry point for the scheduler daemon and one-off commands.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use gitnotify::cli::{Cli, Command, OutputFormat, generate_after_help};
use gitnotify::config::Config;
use gitnotify::domain::{DiffEntry, DiffSnapshot, UserKey};
use gitnotify::notify::ChannelOutcome;
use gitnotify::poller::Poller;
use gitnotify::scheduler::{ScheduleManager, ScheduleRequest, UpsertOutcome};
use gitnotify::store::{SnapshotId, StateStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gitnotify")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gitnotify.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(data_dir = %config.storage.data_dir.display(), "gitnotify {} loaded config", env!("GIT_DESCRIBE"));

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Daemon => cmd_daemon(&config).await,
        Command::Poll { user } => cmd_poll(&config, &user).await,
        Command::History { user, format } => cmd_history(&config, &user, format).await,
        Command::Show { user, id, format } => cmd_show(&config, &user, SnapshotId(id), format).await,
        Command::Schedule { user, count } => cmd_schedule(&config, &user, count).await,
        Command::Users { format } => cmd_users(&config, format).await,
    }
}

/// Schedule inputs for every user with readable settings
async fn load_requests(store: &StateStore, poller: Option<&Poller>) -> Result<Vec<(UserKey, ScheduleRequest)>> {
    debug!("load_requests: called");
    let mut requests = Vec::new();
    for user in store.list_users().await? {
        match store.load_settings(&user).await {
            Ok(Some(conf)) => {
                let request = match poller {
                    Some(poller) => poller.schedule_request(&conf),
                    None => ScheduleRequest::from_config(&conf),
                };
                requests.push((user, request));
            }
            Ok(None) => {}
            Err(e) => warn!(%user, error = %e, "Skipping user with unreadable settings"),
        }
    }
    Ok(requests)
}

async fn sync_schedules(manager: &ScheduleManager, poller: &Poller) -> Result<()> {
    let requests = load_requests(poller.store(), Some(poller)).await?;
    let outcomes = manager.reconcile(&requests).await;
    let paused = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, UpsertOutcome::Paused { .. }))
        .count();
    info!(
        users = outcomes.len(),
        scheduled = manager.len().await,
        paused,
        "Schedules synchronized"
    );
    Ok(())
}

/// Run the scheduler until SIGINT or SIGTERM
async fn cmd_daemon(config: &Config) -> Result<()> {
    debug!("cmd_daemon: called");
    let poller = Arc::new(Poller::from_config(config)?);
    let manager = ScheduleManager::new(poller.clone());

    sync_schedules(&manager, &poller).await?;
    println!(
        "gitnotify daemon running with {} scheduled users. Press Ctrl+C to stop, SIGHUP to reload users.",
        manager.len().await
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading users");
                    if let Err(e) = sync_schedules(&manager, &poller).await {
                        tracing::error!(error = %e, "Failed to reload users");
                    }
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("Daemon shutting down...");
    if !manager.shutdown(config.scheduler.shutdown_timeout()).await {
        warn!("Some runs did not finish before the shutdown timeout");
    }
    info!("Daemon stopped");
    Ok(())
}

async fn cmd_poll(config: &Config, user: &UserKey) -> Result<()> {
    debug!(%user, "cmd_poll: called");
    let poller = Poller::from_config(config)?;
    let report = poller.poll_user(user).await?;

    print_snapshot(&report.snapshot);
    match report.snapshot_id {
        Some(id) => println!("Archived as snapshot {}", id),
        None => println!("{}", "Snapshot was not archived (see log)".yellow()),
    }
    for (channel, outcome) in &report.dispatch.outcomes {
        let status = match outcome {
            ChannelOutcome::Delivered => "delivered".green().to_string(),
            ChannelOutcome::Suppressed => "nothing to send".dimmed().to_string(),
            ChannelOutcome::Failed(e) => format!("{}: {}", "failed".red(), e),
        };
        println!("  {:<8} {}", channel.to_string(), status);
    }
    Ok(())
}

async fn cmd_history(config: &Config, user: &UserKey, format: OutputFormat) -> Result<()> {
    debug!(%user, ?format, "cmd_history: called");
    let store = StateStore::new(&config.storage.data_dir);
    let tz = store
        .load_settings(user)
        .await?
        .map(|conf| conf.timezone())
        .unwrap_or(chrono_tz::Tz::UTC);
    let snapshots = store.list_snapshots(user, tz).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Text => {
            if snapshots.is_empty() {
                println!("No snapshots for {}", user);
            }
            for s in &snapshots {
                println!("{:<12} {}", s.id, s.label);
            }
        }
    }
    Ok(())
}

async fn cmd_show(config: &Config, user: &UserKey, id: SnapshotId, format: OutputFormat) -> Result<()> {
    debug!(%user, %id, ?format, "cmd_show: called");
    let store = StateStore::new(&config.storage.data_dir);
    let snapshot = store.load_snapshot(user, id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => print_snapshot(&snapshot),
    }
    Ok(())
}

fn print_snapshot(snapshot: &DiffSnapshot) {
    if snapshot.repos.is_empty() {
        println!("No repositories tracked");
        return;
    }
    for repo in &snapshot.repos {
        let marker = if repo.changed {
            "changed".green()
        } else if repo.has_errors() {
            "errors".red()
        } else {
            "unchanged".dimmed()
        };
        println!("{} [{}]", repo.repo.text.bold(), marker);
        for entry in &repo.entries {
            print_entry(entry);
        }
    }
}

fn print_entry(entry: &DiffEntry) {
    if let Some(error) = entry.error() {
        println!("  {}: {}", entry.title().text, error.red());
        return;
    }
    if !entry.changed() {
        return;
    }
    println!("  {}:", entry.title().text);
    for link in entry.change_links() {
        println!("    - {}  {}", link.text, link.href.dimmed());
    }
}

async fn cmd_schedule(config: &Config, user: &UserKey, count: Option<usize>) -> Result<()> {
    debug!(%user, ?count, "cmd_schedule: called");
    let store = StateStore::new(&config.storage.data_dir);
    let conf = store
        .load_settings(user)
        .await?
        .ok_or_else(|| eyre::eyre!("No settings found for {}", user))?;

    match ScheduleRequest::from_config(&conf).resolve() {
        Ok(schedule) => {
            println!("{} {}", "active".green(), schedule.expression());
            let count = count.unwrap_or(config.scheduler.upcoming_runs);
            for at in schedule.upcoming(Utc::now(), count) {
                println!("  {}", at.format("%a %d %b %Y %H:%M %Z"));
            }
        }
        Err(reason) => println!("{} {}", "paused".yellow(), reason),
    }
    Ok(())
}

#[derive(Serialize)]
struct UserStatus {
    user: String,
    active: bool,
    detail: String,
}

async fn cmd_users(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_users: called");
    let store = StateStore::new(&config.storage.data_dir);
    let statuses: Vec<UserStatus> = load_requests(&store, None)
        .await?
        .into_iter()
        .map(|(user, request)| match request.resolve() {
            Ok(schedule) => UserStatus {
                user: user.to_string(),
                active: true,
                detail: schedule.expression(),
            },
            Err(reason) => UserStatus {
                user: user.to_string(),
                active: false,
                detail: reason.to_string(),
            },
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Text => {
            if statuses.is_empty() {
                println!("No users in {}", store.root().display());
            }
            for s in &statuses {
                let state = if s.active { "active".green() } else { "paused".yellow() };
                println!("{:<32} {:<8} {}", s.user, state, s.detail);
            }
        }
    }
    Ok(())
}
