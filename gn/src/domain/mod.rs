//! Domain types
//!
//! User settings, per-repository reference state, and the immutable diff
//! snapshots produced by each poll.

mod snapshot;
mod state;
mod user;

pub use snapshot::{CommitPointer, DiffEntry, DiffSnapshot, Link, ListDiff, PointerDiff, PointerMove, RepoDiff};
pub use state::RepoState;
pub use user::{Identity, NotifySettings, TrackedRepo, UserConfig, UserKey, WebhookKind, is_valid_email};
