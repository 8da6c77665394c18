//! ScheduleManager - per-user recurring poll jobs
//!
//! Each registered user owns one timer task that sleeps until the next
//! firing of their `Schedule` and then starts a run. The entry table is only
//! locked while it is being mutated; runs execute on their own tasks.
//!
//! Runs for the same user never overlap. Every user has a run lock that
//! outlives their table entry, so replacing a schedule while a run is in
//! flight still skips the new entry's firings until that run finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Schedule, ScheduleError};
use crate::domain::{UserConfig, UserKey};

const RECHECK_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Work performed each time a user's schedule fires
///
/// Implementations must capture their own failures; nothing is returned
/// because nothing a run does may affect the scheduler.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, user: &UserKey);
}

/// The schedule-relevant slice of a user's settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub hour: String,
    pub weekday: String,
    pub timezone: String,
    pub enabled: bool,
    pub has_channel: bool,
}

/// Why a user has no active schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PauseReason {
    #[error("notifications disabled")]
    Disabled,

    #[error("no delivery channel configured")]
    NoChannel,

    #[error("{0}")]
    InvalidSchedule(#[from] ScheduleError),
}

impl ScheduleRequest {
    pub fn from_config(conf: &UserConfig) -> Self {
        Self {
            hour: conf.notify.hour.clone(),
            weekday: conf.notify.weekday.clone(),
            timezone: conf.notify.timezone.clone(),
            enabled: !conf.notify.disabled,
            has_channel: conf.has_delivery_channel(),
        }
    }

    /// The schedule to register, or why the user is paused
    pub fn resolve(&self) -> Result<Schedule, PauseReason> {
        if !self.enabled {
            return Err(PauseReason::Disabled);
        }
        let schedule = Schedule::parse(&self.hour, &self.weekday, &self.timezone)?;
        if !self.has_channel {
            return Err(PauseReason::NoChannel);
        }
        Ok(schedule)
    }
}

/// Result of `ScheduleManager::upsert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No entry existed; one was registered
    Registered { id: u64 },
    /// The schedule changed; the old entry was swapped for a new one
    Replaced { old_id: u64, id: u64 },
    /// Same schedule as the existing entry; nothing was touched
    Unchanged { id: u64 },
    /// The user cannot be scheduled; `removed` says whether an entry was dropped
    Paused { removed: bool, reason: PauseReason },
}

/// Result of firing a user's entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// The previous run for this user is still executing
    SkippedBusy,
    NotScheduled,
}

/// One registered user: the schedule and the timer driving it
struct ScheduleEntry {
    id: u64,
    schedule: Schedule,
    timer: JoinHandle<()>,
}

impl Drop for ScheduleEntry {
    fn drop(&mut self) {
        // Stops future firings only; a run already started keeps going
        self.timer.abort();
    }
}

/// State shared with timer tasks
struct Shared {
    runner: Arc<dyn JobRunner>,
    run_locks: std::sync::Mutex<HashMap<UserKey, Arc<Mutex<()>>>>,
}

impl Shared {
    fn run_lock(&self, user: &UserKey) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(user.clone()).or_default().clone()
    }

    fn all_run_locks(&self) -> Vec<Arc<Mutex<()>>> {
        let locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().cloned().collect()
    }

    fn fire(self: &Arc<Self>, user: &UserKey) -> FireOutcome {
        debug!(%user, "Shared::fire: called");
        let guard = match self.run_lock(user).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(%user, "Previous run still executing, skipping this firing");
                return FireOutcome::SkippedBusy;
            }
        };

        let shared = Arc::clone(self);
        let user = user.clone();
        tokio::spawn(async move {
            let _guard = guard;
            info!(%user, "Run started");
            shared.runner.run(&user).await;
            debug!(%user, "Shared::fire: run finished");
        });
        FireOutcome::Started
    }
}

fn spawn_timer(shared: Arc<Shared>, user: UserKey, schedule: Schedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut after = Utc::now();
        loop {
            let Some(next) = schedule.next_after(after) else {
                warn!(%user, schedule = %schedule, "No firing found ahead, checking again tomorrow");
                tokio::time::sleep(RECHECK_AFTER).await;
                after += chrono::Duration::days(1);
                continue;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(%user, %next, ?wait, "spawn_timer: sleeping until next firing");
            tokio::time::sleep(wait).await;

            shared.fire(&user);
            after = next.max(Utc::now());
        }
    })
}

/// Owns the table of active per-user schedules
pub struct ScheduleManager {
    entries: Mutex<HashMap<UserKey, ScheduleEntry>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl ScheduleManager {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        debug!("ScheduleManager::new: called");
        Self {
            entries: Mutex::new(HashMap::new()),
            shared: Arc::new(Shared {
                runner,
                run_locks: std::sync::Mutex::new(HashMap::new()),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register, replace or remove the user's entry to match `request`
    pub async fn upsert(&self, user: &UserKey, request: &ScheduleRequest) -> UpsertOutcome {
        debug!(%user, ?request, "ScheduleManager::upsert: called");
        let resolved = request.resolve();
        let mut entries = self.entries.lock().await;

        let schedule = match resolved {
            Ok(schedule) => schedule,
            Err(reason) => {
                let removed = entries.remove(user).is_some();
                info!(%user, %reason, removed, "Notifications paused");
                return UpsertOutcome::Paused { removed, reason };
            }
        };

        let old_id = match entries.get(user) {
            Some(existing) if existing.schedule == schedule => {
                debug!(%user, id = existing.id, "ScheduleManager::upsert: schedule unchanged");
                return UpsertOutcome::Unchanged { id: existing.id };
            }
            Some(existing) => Some(existing.id),
            None => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let expression = schedule.expression();
        let timer = spawn_timer(Arc::clone(&self.shared), user.clone(), schedule.clone());
        entries.insert(user.clone(), ScheduleEntry { id, schedule, timer });

        match old_id {
            Some(old_id) => {
                info!(%user, old_id, id, %expression, "Schedule replaced");
                UpsertOutcome::Replaced { old_id, id }
            }
            None => {
                info!(%user, id, %expression, "Schedule registered");
                UpsertOutcome::Registered { id }
            }
        }
    }

    /// Unregister the user's entry; returns whether one existed
    pub async fn remove(&self, user: &UserKey) -> bool {
        debug!(%user, "ScheduleManager::remove: called");
        let removed = self.entries.lock().await.remove(user).is_some();
        if removed {
            info!(%user, "Schedule removed");
        }
        removed
    }

    /// Upsert every given user and remove entries for users not listed
    pub async fn reconcile(&self, users: &[(UserKey, ScheduleRequest)]) -> Vec<(UserKey, UpsertOutcome)> {
        debug!(count = users.len(), "ScheduleManager::reconcile: called");
        let mut outcomes = Vec::with_capacity(users.len());
        for (user, request) in users {
            outcomes.push((user.clone(), self.upsert(user, request).await));
        }

        let stale: Vec<UserKey> = {
            let entries = self.entries.lock().await;
            entries
                .keys()
                .filter(|k| !users.iter().any(|(u, _)| u == *k))
                .cloned()
                .collect()
        };
        for user in stale {
            self.remove(&user).await;
        }
        outcomes
    }

    /// Start a run for a scheduled user right away
    pub async fn fire_now(&self, user: &UserKey) -> FireOutcome {
        debug!(%user, "ScheduleManager::fire_now: called");
        if !self.entries.lock().await.contains_key(user) {
            return FireOutcome::NotScheduled;
        }
        self.shared.fire(user)
    }

    pub async fn entry_id(&self, user: &UserKey) -> Option<u64> {
        self.entries.lock().await.get(user).map(|e| e.id)
    }

    pub async fn schedule_for(&self, user: &UserKey) -> Option<Schedule> {
        self.entries.lock().await.get(user).map(|e| e.schedule.clone())
    }

    /// Next `count` firings of the user's registered schedule
    pub async fn upcoming(&self, user: &UserKey, count: usize) -> Option<Vec<DateTime<Tz>>> {
        let schedule = self.schedule_for(user).await?;
        Some(schedule.upcoming(Utc::now(), count))
    }

    pub async fn users(&self) -> Vec<UserKey> {
        let mut users: Vec<UserKey> = self.entries.lock().await.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Stop all timers, then wait up to `timeout` for in-flight runs
    ///
    /// Returns false if some run was still executing at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        debug!(?timeout, "ScheduleManager::shutdown: called");
        let count = {
            let mut entries = self.entries.lock().await;
            let count = entries.len();
            entries.clear();
            count
        };
        info!(count, "Schedules stopped, waiting for in-flight runs");

        let locks = self.shared.all_run_locks();
        let wait_all = async {
            for lock in locks {
                let _ = lock.lock().await;
            }
        };

        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => {
                debug!("ScheduleManager::shutdown: all runs finished");
                true
            }
            Err(_) => {
                warn!(?timeout, "Runs still executing at shutdown deadline, abandoning them");
                false
            }
        }
    }
}
