//! Diff snapshot types
//!
//! A `DiffSnapshot` is the immutable output of one poll. It is archived as
//! compressed JSON and posted verbatim to generic webhooks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A rendered hyperlink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
    #[serde(default)]
    pub title: String,
}

impl Link {
    pub fn new(text: impl Into<String>, href: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            href: href.into(),
            title: title.into(),
        }
    }
}

/// Where a watched reference points on the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPointer {
    Commit(String),
    /// The reference no longer exists on the remote
    NotFound,
}

impl CommitPointer {
    pub fn sha(&self) -> Option<&str> {
        match self {
            Self::Commit(sha) => Some(sha),
            Self::NotFound => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for CommitPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit(sha) => write!(f, "{}", short_sha(sha)),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// First seven characters of a commit id
pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Added branches or tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDiff {
    pub title: Link,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub added: Vec<Link>,
}

/// A watched reference that moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerMove {
    pub name: String,
    pub old: String,
    pub new: CommitPointer,
    /// Before/after link (compare view, or the repository when gone)
    pub link: Link,
}

/// Moved commit pointers for watched references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDiff {
    pub title: Link,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub moved: Vec<PointerMove>,
}

/// One aspect of a repository's diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum DiffEntry {
    Branches(ListDiff),
    Tags(ListDiff),
    CommitTracking(PointerDiff),
}

impl DiffEntry {
    pub fn title(&self) -> &Link {
        match self {
            Self::Branches(d) | Self::Tags(d) => &d.title,
            Self::CommitTracking(d) => &d.title,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Branches(d) | Self::Tags(d) => d.error.as_deref(),
            Self::CommitTracking(d) => d.error.as_deref(),
        }
    }

    pub fn changed(&self) -> bool {
        match self {
            Self::Branches(d) | Self::Tags(d) => !d.added.is_empty(),
            Self::CommitTracking(d) => !d.moved.is_empty(),
        }
    }

    /// Links for every concrete change in this entry
    pub fn change_links(&self) -> Vec<&Link> {
        match self {
            Self::Branches(d) | Self::Tags(d) => d.added.iter().collect(),
            Self::CommitTracking(d) => d.moved.iter().map(|m| &m.link).collect(),
        }
    }

    pub fn change_type(&self) -> &'static str {
        match self {
            Self::Branches(_) => "branches",
            Self::Tags(_) => "tags",
            Self::CommitTracking(_) => "commit_tracking",
        }
    }
}

/// Diff for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDiff {
    pub repo: Link,
    pub changed: bool,
    pub entries: Vec<DiffEntry>,
}

impl RepoDiff {
    /// Build a repository diff; `changed` is derived from the entries
    pub fn new(repo: Link, entries: Vec<DiffEntry>) -> Self {
        let changed = entries.iter().any(DiffEntry::changed);
        Self { repo, changed, entries }
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.error().is_some())
    }
}

/// Output of one poll across all of a user's repositories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffSnapshot {
    pub repos: Vec<RepoDiff>,
}

impl DiffSnapshot {
    pub fn new(repos: Vec<RepoDiff>) -> Self {
        Self { repos }
    }

    /// At least one repository changed
    pub fn has_changes(&self) -> bool {
        self.repos.iter().any(|r| r.changed)
    }

    pub fn error_count(&self) -> usize {
        self.repos
            .iter()
            .flat_map(|r| r.entries.iter())
            .filter(|e| e.error().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiffSnapshot {
        DiffSnapshot::new(vec![RepoDiff::new(
            Link::new("acme/widgets", "https://github.com/acme/widgets", ""),
            vec![
                DiffEntry::Branches(ListDiff {
                    title: Link::new("New branches", "https://github.com/acme/widgets/branches", "New branches"),
                    error: None,
                    added: vec![Link::new(
                        "feature-x",
                        "https://github.com/acme/widgets/tree/feature-x",
                        "",
                    )],
                }),
                DiffEntry::Tags(ListDiff {
                    title: Link::new("New tags", "https://github.com/acme/widgets/tags", "New tags"),
                    error: Some("API error 502".to_string()),
                    added: vec![],
                }),
                DiffEntry::CommitTracking(PointerDiff {
                    title: Link::new("Tracked references", "https://github.com/acme/widgets", ""),
                    error: None,
                    moved: vec![PointerMove {
                        name: "release".to_string(),
                        old: "abc123".to_string(),
                        new: CommitPointer::NotFound,
                        link: Link::new("release: abc123 → not found", "https://github.com/acme/widgets", ""),
                    }],
                }),
            ],
        )])
    }

    #[test]
    fn test_repo_changed_is_derived() {
        let snapshot = sample();
        assert!(snapshot.repos[0].changed);
        assert!(snapshot.has_changes());
        assert_eq!(snapshot.error_count(), 1);

        let quiet = RepoDiff::new(Link::default(), vec![DiffEntry::Tags(ListDiff::default())]);
        assert!(!quiet.changed);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        // transparent: the archive is a plain array of repositories
        let repos = json.as_array().unwrap();
        let entries = repos[0]["entries"].as_array().unwrap();
        assert_eq!(entries[0]["change_type"], "branches");
        assert_eq!(entries[1]["error"], "API error 502");
        assert_eq!(entries[2]["change_type"], "commit_tracking");
        assert_eq!(entries[2]["moved"][0]["new"], "not_found");
        assert!(entries[0].get("error").is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let snapshot = sample();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: DiffSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_commit_pointer_display() {
        assert_eq!(
            CommitPointer::Commit("0123456789abcdef".to_string()).to_string(),
            "0123456"
        );
        assert_eq!(CommitPointer::Commit("abc".to_string()).to_string(), "abc");
        assert_eq!(CommitPointer::NotFound.to_string(), "not found");
    }
}
