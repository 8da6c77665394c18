//! Reference diffing
//!
//! Branch and tag lists only ever report additions. Watched references report
//! pointer moves, including moves to and from `CommitPointer::NotFound`.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::domain::{CommitPointer, DiffEntry, Link, ListDiff, PointerDiff, PointerMove, RepoDiff, RepoState, TrackedRepo};
use crate::remote::{Provider, RemoteRef};

/// Names in `new` that are absent from `old`, in `new` order, without duplicates
pub fn diff_reference_lists(old: &[String], new: &[String]) -> Vec<String> {
    let old: HashSet<&str> = old.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    new.iter()
        .filter(|name| !old.contains(name.as_str()) && seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// A watched reference whose commit changed since the previous poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerEvent {
    pub name: String,
    pub old: String,
    pub new: CommitPointer,
}

/// Output of `diff_commit_pointers`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerDiffResult {
    /// Every tracked name with its resolved pointer, `NotFound` included
    pub current: BTreeMap<String, CommitPointer>,
    /// What gets written back to state: tracked names that resolved to a commit
    pub persisted: BTreeMap<String, String>,
    pub events: Vec<PointerEvent>,
}

/// Resolve each tracked name against the remote and compare with the prior pointers
///
/// A name with no prior pointer is recorded without an event. Names that are
/// not tracked any more are left out of `persisted`, as are names that
/// resolved to `NotFound`.
pub fn diff_commit_pointers(
    tracked: &[String],
    remote: &[RemoteRef],
    prior: &BTreeMap<String, String>,
) -> PointerDiffResult {
    debug!(tracked = tracked.len(), remote = remote.len(), "diff_commit_pointers: called");
    let mut result = PointerDiffResult::default();

    for name in tracked {
        if result.current.contains_key(name) {
            continue;
        }

        let pointer = match remote.iter().find(|r| &r.name == name) {
            Some(r) => CommitPointer::Commit(r.commit.clone()),
            None => CommitPointer::NotFound,
        };

        if let Some(old) = prior.get(name)
            && pointer.sha() != Some(old.as_str())
        {
            debug!(%name, %old, new = %pointer, "diff_commit_pointers: pointer moved");
            result.events.push(PointerEvent {
                name: name.clone(),
                old: old.clone(),
                new: pointer.clone(),
            });
        }

        if let CommitPointer::Commit(sha) = &pointer {
            result.persisted.insert(name.clone(), sha.clone());
        }
        result.current.insert(name.clone(), pointer);
    }

    result
}

/// What was fetched for one repository
///
/// `None` means the aspect was not requested; `Some(Err(_))` carries the
/// fetch error text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoFetch {
    pub branches: Option<Result<Vec<RemoteRef>, String>>,
    pub tags: Option<Result<Vec<RemoteRef>, String>>,
}

impl RepoFetch {
    /// Every requested aspect failed with the same error
    pub fn failed(tracked: &TrackedRepo, message: impl Into<String>) -> Self {
        let message = message.into();
        let wants_branches = tracked.branches || tracked.tracks_commits();
        let wants_tags = tracked.tags || tracked.tracks_commits();
        Self {
            branches: wants_branches.then(|| Err(message.clone())),
            tags: wants_tags.then(|| Err(message)),
        }
    }
}

fn names(refs: &[RemoteRef]) -> Vec<String> {
    refs.iter().map(|r| r.name.clone()).collect()
}

fn fetched<'a>(aspect: &'a Option<Result<Vec<RemoteRef>, String>>) -> Result<&'a [RemoteRef], String> {
    match aspect {
        Some(Ok(refs)) => Ok(refs),
        Some(Err(e)) => Err(e.clone()),
        None => Err("not fetched".to_string()),
    }
}

/// Added branches or tags for one list aspect, plus the list to store
fn diff_list(
    title: Link,
    prior: Option<&Vec<String>>,
    fetch: &Option<Result<Vec<RemoteRef>, String>>,
    link_for: impl Fn(&str) -> String,
) -> (ListDiff, Option<Vec<String>>) {
    match fetched(fetch) {
        Ok(refs) => {
            let current = names(refs);
            // First observation of a list records it without reporting additions
            let added = prior
                .map(|old| diff_reference_lists(old, &current))
                .unwrap_or_default()
                .into_iter()
                .map(|name| {
                    let href = link_for(&name);
                    Link::new(name.clone(), href, name)
                })
                .collect();
            (ListDiff { title, error: None, added }, Some(current))
        }
        Err(error) => (
            ListDiff {
                title,
                error: Some(error),
                added: Vec::new(),
            },
            prior.cloned(),
        ),
    }
}

fn move_link(provider: Provider, repo: &str, event: &PointerEvent) -> Link {
    let text = format!("{}: {} → {}", event.name, CommitPointer::Commit(event.old.clone()), event.new);
    let href = match &event.new {
        CommitPointer::Commit(sha) => provider.compare_url(repo, &event.old, sha),
        CommitPointer::NotFound => provider.repo_url(repo),
    };
    Link::new(text, href, event.name.clone())
}

/// Diff one repository and compute the state to store for it
///
/// The returned state replaces the prior one wholesale. An aspect whose fetch
/// failed keeps its prior value so the next successful poll diffs against it.
pub fn diff_repo(
    tracked: &TrackedRepo,
    prior: Option<&RepoState>,
    fetch: &RepoFetch,
    provider: Provider,
) -> (RepoDiff, RepoState) {
    debug!(repo = %tracked.repo, %provider, has_prior = prior.is_some(), "diff_repo: called");
    let repo = tracked.repo.as_str();
    let empty = RepoState::default();
    let prior = prior.unwrap_or(&empty);

    let mut entries = Vec::new();
    let mut state = RepoState::default();

    if tracked.branches {
        let title = Link::new("New branches", provider.branches_url(repo), format!("New branches in {}", repo));
        let (entry, list) = diff_list(title, prior.branches.as_ref(), &fetch.branches, |name| {
            provider.branch_url(repo, name)
        });
        entries.push(DiffEntry::Branches(entry));
        state.branches = list;
    }

    if tracked.tags {
        let title = Link::new("New tags", provider.tags_url(repo), format!("New tags in {}", repo));
        let (entry, list) = diff_list(title, prior.tags.as_ref(), &fetch.tags, |name| provider.tag_url(repo, name));
        entries.push(DiffEntry::Tags(entry));
        state.tags = list;
    }

    if tracked.tracks_commits() {
        let title = Link::new(
            "Tracked references",
            provider.repo_url(repo),
            format!("Tracked references in {}", repo),
        );

        match (fetched(&fetch.branches), fetched(&fetch.tags)) {
            (Ok(branches), Ok(tags)) => {
                // A branch and a tag with the same name resolve to the branch
                let remote: Vec<RemoteRef> = branches.iter().chain(tags.iter()).cloned().collect();
                let result = diff_commit_pointers(&tracked.refs, &remote, &prior.commits);
                let moved = result
                    .events
                    .iter()
                    .map(|event| PointerMove {
                        name: event.name.clone(),
                        old: event.old.clone(),
                        new: event.new.clone(),
                        link: move_link(provider, repo, event),
                    })
                    .collect();
                entries.push(DiffEntry::CommitTracking(PointerDiff {
                    title,
                    error: None,
                    moved,
                }));
                state.commits = result.persisted;
            }
            (Err(error), _) | (_, Err(error)) => {
                entries.push(DiffEntry::CommitTracking(PointerDiff {
                    title,
                    error: Some(error),
                    moved: Vec::new(),
                }));
                state.commits = prior
                    .commits
                    .iter()
                    .filter(|(name, _)| tracked.refs.contains(name))
                    .map(|(name, sha)| (name.clone(), sha.clone()))
                    .collect();
            }
        }
    }

    let diff = RepoDiff::new(Link::new(repo, provider.repo_url(repo), repo), entries);
    debug!(repo = %tracked.repo, changed = diff.changed, errors = diff.has_errors(), "diff_repo: done");
    (diff, state)
}
