//! Change detection between polls

mod engine;

pub use engine::{PointerDiffResult, PointerEvent, RepoFetch, diff_commit_pointers, diff_reference_lists, diff_repo};
