//! Per-user recurring poll scheduling
//!
//! `Schedule` is the structural value derived from a user's hour, weekday and
//! timezone fields. `ScheduleManager` keeps one timer per scheduled user and
//! starts a `JobRunner` run at each firing.

mod config;
mod manager;
mod schedule;

pub use config::SchedulerConfig;
pub use manager::{FireOutcome, JobRunner, PauseReason, ScheduleManager, ScheduleRequest, UpsertOutcome};
pub use schedule::{Schedule, ScheduleError};
