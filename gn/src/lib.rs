//! gitnotify - scheduled change notifications for git repositories
//!
//! Users track repositories on a hosting provider and pick a weekly schedule.
//! At each firing the user's repositories are fetched, compared with the
//! state recorded on the previous poll, and any new branches, new tags or
//! moved watched references are archived and sent out by email or webhook.
//!
//! # Modules
//!
//! - [`scheduler`] - Per-user recurring jobs with no overlapping runs
//! - [`diff`] - Reference list and commit pointer diffing
//! - [`store`] - Settings, state and the compressed snapshot archive
//! - [`notify`] - Channel selection, rendering and delivery
//! - [`remote`] - GitHub and GitLab reference listing
//! - [`poller`] - One poll-and-notify run
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod diff;
pub mod domain;
pub mod notify;
pub mod poller;
pub mod remote;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use diff::{PointerDiffResult, PointerEvent, RepoFetch, diff_commit_pointers, diff_reference_lists, diff_repo};
pub use domain::{
    CommitPointer, DiffEntry, DiffSnapshot, Link, ListDiff, PointerDiff, PointerMove, RepoDiff, RepoState, TrackedRepo,
    UserConfig, UserKey,
};
pub use notify::{Channel, ChannelOutcome, DispatchReport, NotificationDispatcher, NotifyError};
pub use poller::{Poller, RunReport};
pub use remote::{FetchError, Provider, RefKind, RefSource, RemoteRef, SourceSet};
pub use scheduler::{
    FireOutcome, JobRunner, PauseReason, Schedule, ScheduleError, ScheduleManager, ScheduleRequest, SchedulerConfig,
    UpsertOutcome,
};
pub use store::{SnapshotId, SnapshotSummary, StateStore, StoreError};
