//! Last observed reference state for one repository

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of what the remote looked like on the previous poll
///
/// `None` for a list means the aspect has never been observed (or is not
/// tracked), which is different from an observed empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Watched reference name to last known commit id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub commits: BTreeMap<String, String>,
}
