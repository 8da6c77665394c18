//! File-backed state store
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/<provider>/<username>/settings.yml
//! <root>/<provider>/<username>/diff/<unix-seconds>.json.gz
//! ```
//!
//! Every write goes to a temporary file in the same directory and is renamed
//! into place, so a crash never leaves a half-written file under a real name.

mod error;

pub use error::StoreError;

use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::domain::{DiffSnapshot, UserConfig, UserKey};

const SETTINGS_FILE: &str = "settings.yml";
const DIFF_DIR: &str = "diff";
const SNAPSHOT_EXT: &str = ".json.gz";

/// Identifier of an archived snapshot: the run time in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub i64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// One entry of the snapshot listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    /// Run time rendered in the user's timezone
    pub label: String,
    pub id: SnapshotId,
}

/// Render a snapshot id as "02 Jan 2006 | 15 Hrs" in `tz`
pub fn snapshot_label(id: SnapshotId, tz: Tz) -> String {
    match Utc.timestamp_opt(id.0, 0).single() {
        Some(at) => at.with_timezone(&tz).format("%d %b %Y | %H Hrs").to_string(),
        None => id.to_string(),
    }
}

fn valid_component(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('.') && !s.contains(['/', '\\']) && !s.chars().any(char::is_control)
}

fn encode_snapshot(snapshot: &DiffSnapshot) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(snapshot).map_err(|e| StoreError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| StoreError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode_snapshot(path: &Path, bytes: &[u8]) -> Result<DiffSnapshot, StoreError> {
    let decode_err = |message: String| StoreError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| decode_err(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| decode_err(e.to_string()))
}

/// Write `bytes` to `path` via a temporary sibling and a rename
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    debug!(?path, len = bytes.len(), "write_atomic: called");
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::io(path, std::io::Error::other("path has no parent")))?;
    fs::create_dir_all(dir).await.map_err(|e| StoreError::io(dir, e))?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(&tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

/// Per-user settings and snapshot archive rooted at a data directory
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "StateStore::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by one user; rejects keys that would escape the root
    pub fn user_dir(&self, key: &UserKey) -> Result<PathBuf, StoreError> {
        if !valid_component(&key.provider) || !valid_component(&key.username) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(&key.provider).join(&key.username))
    }

    fn settings_path(&self, key: &UserKey) -> Result<PathBuf, StoreError> {
        Ok(self.user_dir(key)?.join(SETTINGS_FILE))
    }

    fn snapshot_path(&self, key: &UserKey, id: SnapshotId) -> Result<PathBuf, StoreError> {
        Ok(self.user_dir(key)?.join(DIFF_DIR).join(format!("{}{}", id, SNAPSHOT_EXT)))
    }

    /// Load a user's settings; a missing file means a fresh user
    pub async fn load_settings(&self, key: &UserKey) -> Result<Option<UserConfig>, StoreError> {
        debug!(%key, "StateStore::load_settings: called");
        let path = self.settings_path(key)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "StateStore::load_settings: no settings file");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let conf = serde_yaml::from_str(&content).map_err(|source| StoreError::Settings { path, source })?;
        Ok(Some(conf))
    }

    pub async fn save_settings(&self, key: &UserKey, conf: &UserConfig) -> Result<(), StoreError> {
        debug!(%key, repos = conf.repos.len(), "StateStore::save_settings: called");
        let path = self.settings_path(key)?;
        let yaml = serde_yaml::to_string(conf).map_err(|e| StoreError::Encode(e.to_string()))?;
        write_atomic(&path, yaml.as_bytes()).await
    }

    /// Every user with a settings file, sorted
    pub async fn list_users(&self) -> Result<Vec<UserKey>, StoreError> {
        debug!(root = ?self.root, "StateStore::list_users: called");
        let mut users = Vec::new();

        let mut providers = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(users),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        while let Some(provider) = providers
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let provider_path = provider.path();
            if !provider_path.is_dir() {
                continue;
            }
            let Some(provider_name) = provider.file_name().to_str().map(String::from) else {
                continue;
            };

            let mut accounts = fs::read_dir(&provider_path)
                .await
                .map_err(|e| StoreError::io(&provider_path, e))?;
            while let Some(account) = accounts
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&provider_path, e))?
            {
                let Some(username) = account.file_name().to_str().map(String::from) else {
                    continue;
                };
                let key = UserKey::new(&provider_name, username);
                if self.user_dir(&key).is_ok() && account.path().join(SETTINGS_FILE).is_file() {
                    users.push(key);
                }
            }
        }

        users.sort();
        debug!(count = users.len(), "StateStore::list_users: done");
        Ok(users)
    }

    /// Archive a snapshot under the run time, moving to the next free second on collision
    pub async fn save_snapshot(
        &self,
        key: &UserKey,
        snapshot: &DiffSnapshot,
        at: DateTime<Utc>,
    ) -> Result<SnapshotId, StoreError> {
        debug!(%key, repos = snapshot.repos.len(), %at, "StateStore::save_snapshot: called");
        let bytes = encode_snapshot(snapshot)?;

        let mut id = SnapshotId(at.timestamp());
        let mut path = self.snapshot_path(key, id)?;
        while fs::try_exists(&path).await.map_err(|e| StoreError::io(&path, e))? {
            debug!(%id, "StateStore::save_snapshot: id taken, bumping");
            id = SnapshotId(id.0 + 1);
            path = self.snapshot_path(key, id)?;
        }

        write_atomic(&path, &bytes).await?;
        info!(%key, %id, "Snapshot archived");
        Ok(id)
    }

    pub async fn load_snapshot(&self, key: &UserKey, id: SnapshotId) -> Result<DiffSnapshot, StoreError> {
        debug!(%key, %id, "StateStore::load_snapshot: called");
        let path = self.snapshot_path(key, id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::SnapshotNotFound(id.0)),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        decode_snapshot(&path, &bytes)
    }

    /// Archived snapshots, newest first, labelled in `tz`
    pub async fn list_snapshots(&self, key: &UserKey, tz: Tz) -> Result<Vec<SnapshotSummary>, StoreError> {
        debug!(%key, %tz, "StateStore::list_snapshots: called");
        let dir = self.user_dir(key)?.join(DIFF_DIR);

        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match name.strip_suffix(SNAPSHOT_EXT).map(str::parse::<SnapshotId>) {
                Some(Ok(id)) => ids.push(id),
                Some(Err(_)) => warn!(%name, "Ignoring unexpected file in snapshot archive"),
                None => {}
            }
        }

        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids
            .into_iter()
            .map(|id| SnapshotSummary {
                label: snapshot_label(id, tz),
                id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiffEntry, Link, ListDiff, RepoDiff, RepoState, TrackedRepo};
    use tempfile::TempDir;

    fn alice() -> UserKey {
        UserKey::new("github", "alice")
    }

    fn sample_snapshot() -> DiffSnapshot {
        DiffSnapshot::new(vec![RepoDiff::new(
            Link::new("acme/widgets", "https://github.com/acme/widgets", "acme/widgets"),
            vec![DiffEntry::Branches(ListDiff {
                title: Link::new("New branches", "https://github.com/acme/widgets/branches", ""),
                error: None,
                added: vec![Link::new(
                    "feature-x",
                    "https://github.com/acme/widgets/tree/feature-x",
                    "feature-x",
                )],
            })],
        )])
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_missing_settings_is_fresh_start() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_settings(&alice()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        let mut conf = UserConfig::default();
        conf.identity.provider = "github".to_string();
        conf.identity.username = "alice".to_string();
        conf.repos.push(TrackedRepo {
            repo: "acme/widgets".to_string(),
            branches: true,
            tags: false,
            refs: vec!["release".to_string()],
        });
        conf.state.insert(
            "acme/widgets".to_string(),
            RepoState {
                branches: Some(vec!["main".to_string()]),
                ..Default::default()
            },
        );

        store.save_settings(&alice(), &conf).await.unwrap();
        let loaded = store.load_settings(&alice()).await.unwrap().unwrap();
        assert_eq!(loaded, conf);

        // no temp files left behind
        let names: Vec<_> = std::fs::read_dir(store.user_dir(&alice()).unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("settings.yml")]);
    }

    #[tokio::test]
    async fn test_invalid_settings_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let user_dir = store.user_dir(&alice()).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("settings.yml"), "repos: [[[").unwrap();

        assert!(matches!(
            store.load_settings(&alice()).await,
            Err(StoreError::Settings { .. })
        ));
    }

    #[test]
    fn test_user_dir_rejects_traversal() {
        let store = StateStore::new("/data");
        assert_eq!(
            store.user_dir(&alice()).unwrap(),
            PathBuf::from("/data/github/alice")
        );
        assert!(store.user_dir(&UserKey::new("github", "..")).is_err());
        assert!(store.user_dir(&UserKey::new("..", "alice")).is_err());
        assert!(store.user_dir(&UserKey::new("github", "a/b")).is_err());
        assert!(store.user_dir(&UserKey::new("github", "")).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let snapshot = sample_snapshot();

        let id = store.save_snapshot(&alice(), &snapshot, at(1_700_000_000)).await.unwrap();
        assert_eq!(id, SnapshotId(1_700_000_000));
        assert!(dir.path().join("github/alice/diff/1700000000.json.gz").is_file());

        let loaded = store.load_snapshot(&alice(), id).await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_snapshot_id_collision_bumps() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let snapshot = sample_snapshot();

        let first = store.save_snapshot(&alice(), &snapshot, at(100)).await.unwrap();
        let second = store.save_snapshot(&alice(), &snapshot, at(100)).await.unwrap();
        assert_eq!(first, SnapshotId(100));
        assert_eq!(second, SnapshotId(101));
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(
            store.load_snapshot(&alice(), SnapshotId(42)).await,
            Err(StoreError::SnapshotNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_to_decode() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let id = store.save_snapshot(&alice(), &sample_snapshot(), at(200)).await.unwrap();

        // truncate the archive mid-stream
        let path = dir.path().join("github/alice/diff/200.json.gz");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            store.load_snapshot(&alice(), id).await,
            Err(StoreError::Decode { .. })
        ));

        std::fs::write(&path, b"not gzip at all").unwrap();
        assert!(matches!(
            store.load_snapshot(&alice(), id).await,
            Err(StoreError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_snapshots_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let snapshot = sample_snapshot();

        // 2024-01-01 09:00 UTC and 2024-01-08 09:00 UTC
        store.save_snapshot(&alice(), &snapshot, at(1_704_099_600)).await.unwrap();
        store.save_snapshot(&alice(), &snapshot, at(1_704_704_400)).await.unwrap();
        std::fs::write(dir.path().join("github/alice/diff/notes.txt"), "x").unwrap();

        let list = store.list_snapshots(&alice(), Tz::Asia__Kolkata).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, SnapshotId(1_704_704_400));
        assert_eq!(list[0].label, "08 Jan 2024 | 14 Hrs");
        assert_eq!(list[1].label, "01 Jan 2024 | 14 Hrs");
    }

    #[tokio::test]
    async fn test_list_snapshots_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.list_snapshots(&alice(), Tz::UTC).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_users() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.list_users().await.unwrap().is_empty());

        store.save_settings(&UserKey::new("gitlab", "bob"), &UserConfig::default()).await.unwrap();
        store.save_settings(&alice(), &UserConfig::default()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("github/no-settings")).unwrap();

        assert_eq!(
            store.list_users().await.unwrap(),
            vec![alice(), UserKey::new("gitlab", "bob")]
        );
    }
}
