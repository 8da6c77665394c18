//! One poll-and-notify run for a user
//!
//! Loads settings and state, fetches every tracked repository with a per
//! repository timeout, diffs, persists the new state and the snapshot, then
//! hands the snapshot to the dispatcher. Fetch failures become error entries
//! in the snapshot; persistence failures are logged and skip the remaining
//! persistence but not the dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Context, Result, eyre};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diff::{RepoFetch, diff_repo};
use crate::domain::{DiffSnapshot, RepoState, TrackedRepo, UserConfig, UserKey};
use crate::notify::{DispatchReport, NotificationDispatcher};
use crate::remote::{FetchError, Provider, RefKind, RefSource, RemoteRef, SourceSet};
use crate::scheduler::{JobRunner, ScheduleRequest};
use crate::store::{SnapshotId, StateStore};

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub user: UserKey,
    pub snapshot: DiffSnapshot,
    /// None when persistence failed
    pub snapshot_id: Option<SnapshotId>,
    pub dispatch: DispatchReport,
}

impl RunReport {
    pub fn persisted(&self) -> bool {
        self.snapshot_id.is_some()
    }
}

pub struct Poller {
    store: StateStore,
    sources: SourceSet,
    dispatcher: Arc<NotificationDispatcher>,
    fetch_timeout: Duration,
}

impl Poller {
    pub fn new(
        store: StateStore,
        sources: SourceSet,
        dispatcher: Arc<NotificationDispatcher>,
        fetch_timeout: Duration,
    ) -> Self {
        debug!(?fetch_timeout, "Poller::new: called");
        Self {
            store,
            sources,
            dispatcher,
            fetch_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        debug!("Poller::from_config: called");
        let sources = SourceSet::from_config(&config.remote).context("Failed to create remote sources")?;
        let dispatcher = NotificationDispatcher::from_config(config).context("Failed to create notifier")?;
        Ok(Self::new(
            StateStore::new(&config.storage.data_dir),
            sources,
            Arc::new(dispatcher),
            config.remote.fetch_timeout(),
        ))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Schedule inputs for `conf`
    ///
    /// An address alone counts as a channel, so an email-only user is still
    /// scheduled when mail is not configured. That case is logged because its
    /// runs notify nobody.
    pub fn schedule_request(&self, conf: &UserConfig) -> ScheduleRequest {
        let request = ScheduleRequest::from_config(conf);
        if request.enabled && request.has_channel && !self.dispatcher.can_reach(conf) {
            warn!(user = %conf.key(), "Email is the only channel but mail is not configured; runs will notify nobody");
        }
        request
    }

    async fn list(
        source: &dyn RefSource,
        repo: &str,
        kind: RefKind,
        token: &str,
        wanted: bool,
    ) -> Option<Result<Vec<RemoteRef>, String>> {
        if !wanted {
            return None;
        }
        match source.list_refs(repo, kind, token).await {
            Ok(refs) => Some(Ok(refs)),
            Err(e) => {
                if e.is_transient() {
                    warn!(%repo, %kind, error = %e, "Fetch failed");
                } else {
                    error!(%repo, %kind, error = %e, "Fetch failed");
                }
                Some(Err(e.to_string()))
            }
        }
    }

    /// Fetch what `tracked` needs, bounded by the fetch timeout
    async fn fetch_repo(&self, source: &dyn RefSource, tracked: &TrackedRepo, token: &str) -> RepoFetch {
        debug!(repo = %tracked.repo, "Poller::fetch_repo: called");
        let want_branches = tracked.branches || tracked.tracks_commits();
        let want_tags = tracked.tags || tracked.tracks_commits();

        let fetch = async {
            let (branches, tags) = tokio::join!(
                Self::list(source, &tracked.repo, RefKind::Branches, token, want_branches),
                Self::list(source, &tracked.repo, RefKind::Tags, token, want_tags),
            );
            RepoFetch { branches, tags }
        };

        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(fetch) => fetch,
            Err(_) => {
                let e = FetchError::Timeout(self.fetch_timeout);
                warn!(repo = %tracked.repo, error = %e, "Fetch timed out");
                RepoFetch::failed(tracked, e.to_string())
            }
        }
    }

    pub async fn poll_user(&self, user: &UserKey) -> Result<RunReport> {
        self.poll_user_at(user, Utc::now()).await
    }

    /// Run once for `user`, archiving the snapshot under `now`
    pub async fn poll_user_at(&self, user: &UserKey, now: DateTime<Utc>) -> Result<RunReport> {
        debug!(%user, %now, "Poller::poll_user_at: called");
        let mut conf = self
            .store
            .load_settings(user)
            .await?
            .ok_or_else(|| eyre!("No settings found for {}", user))?;

        let provider: Provider = user.provider.parse()?;
        let source = self.sources.get(provider)?;
        let token = conf.identity.token.clone();

        let fetches = join_all(
            conf.repos
                .iter()
                .map(|tracked| self.fetch_repo(source.as_ref(), tracked, &token)),
        )
        .await;

        let mut repos = Vec::with_capacity(conf.repos.len());
        let mut state: BTreeMap<String, RepoState> = BTreeMap::new();
        for (tracked, fetch) in conf.repos.iter().zip(fetches) {
            let (diff, repo_state) = diff_repo(tracked, conf.state.get(&tracked.repo), &fetch, provider);
            repos.push(diff);
            state.insert(tracked.repo.clone(), repo_state);
        }
        conf.state = state;
        let snapshot = DiffSnapshot::new(repos);

        let snapshot_id = self.persist(user, &conf, &snapshot, now).await;
        let dispatch = self.dispatcher.dispatch(&snapshot, &conf, snapshot_id, now).await;

        info!(
            %user,
            repos = snapshot.repos.len(),
            changed = snapshot.has_changes(),
            errors = snapshot.error_count(),
            "Run complete"
        );
        Ok(RunReport {
            user: user.clone(),
            snapshot,
            snapshot_id,
            dispatch,
        })
    }

    /// Save state then archive the snapshot; stops at the first failure
    async fn persist(
        &self,
        user: &UserKey,
        conf: &crate::domain::UserConfig,
        snapshot: &DiffSnapshot,
        now: DateTime<Utc>,
    ) -> Option<SnapshotId> {
        if let Err(e) = self.store.save_settings(user, conf).await {
            error!(%user, error = %e, "Failed to save state, skipping snapshot archive");
            return None;
        }
        match self.store.save_snapshot(user, snapshot, now).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(%user, error = %e, "Failed to archive snapshot");
                None
            }
        }
    }
}

#[async_trait]
impl JobRunner for Poller {
    async fn run(&self, user: &UserKey) {
        if let Err(e) = self.poll_user(user).await {
            error!(%user, error = %e, "Run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommitPointer, DiffEntry, UserConfig};
    use crate::notify::webhook_mock::RecordingWebhook;
    use crate::notify::{Channel, ChannelOutcome, TemplateRenderer};
    use crate::remote::mock::MockRefSource;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        source: Arc<MockRefSource>,
        webhook: Arc<RecordingWebhook>,
        poller: Poller,
    }

    fn fixture_with(source: MockRefSource, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source);
        let webhook = Arc::new(RecordingWebhook::default());

        let mut sources = SourceSet::new();
        sources.insert(Provider::Github, source.clone());

        let dispatcher = NotificationDispatcher::new(
            None,
            webhook.clone(),
            TemplateRenderer::embedded_only(),
            "",
            "gitnotify",
        );
        let poller = Poller::new(StateStore::new(dir.path()), sources, Arc::new(dispatcher), timeout);

        Fixture {
            _dir: dir,
            source,
            webhook,
            poller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockRefSource::new(), Duration::from_secs(5))
    }

    fn alice() -> UserKey {
        UserKey::new("github", "alice")
    }

    fn settings(repos: Vec<TrackedRepo>) -> UserConfig {
        let mut conf = UserConfig::default();
        conf.identity.provider = "github".to_string();
        conf.identity.username = "alice".to_string();
        conf.notify.webhook_url = "https://example.com/hook".to_string();
        conf.repos = repos;
        conf
    }

    fn widgets(branches: bool, refs: &[&str]) -> TrackedRepo {
        TrackedRepo {
            repo: "acme/widgets".to_string(),
            branches,
            tags: false,
            refs: refs.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_branch_added() {
        let fx = fixture();
        let mut conf = settings(vec![widgets(true, &[])]);
        conf.state.insert(
            "acme/widgets".to_string(),
            RepoState {
                branches: Some(vec!["main".to_string()]),
                ..Default::default()
            },
        );
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source
            .set("acme/widgets", RefKind::Branches, &[("main", "a1"), ("feature-x", "b2")]);

        let report = fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        assert!(report.snapshot.repos[0].changed);
        let DiffEntry::Branches(entry) = &report.snapshot.repos[0].entries[0] else {
            panic!("expected branches entry");
        };
        assert_eq!(entry.added[0].text, "feature-x");
        assert_eq!(report.snapshot_id, Some(SnapshotId(now().timestamp())));
        assert_eq!(
            report.dispatch.outcome(Channel::GenericWebhook),
            Some(&ChannelOutcome::Delivered)
        );

        let saved = fx.poller.store().load_settings(&alice()).await.unwrap().unwrap();
        assert_eq!(
            saved.state["acme/widgets"].branches,
            Some(vec!["main".to_string(), "feature-x".to_string()])
        );
        let archived = fx
            .poller
            .store()
            .load_snapshot(&alice(), SnapshotId(now().timestamp()))
            .await
            .unwrap();
        assert_eq!(archived, report.snapshot);
        assert_eq!(fx.webhook.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tracked_ref_gone_from_remote() {
        let fx = fixture();
        let mut conf = settings(vec![widgets(false, &["release"])]);
        conf.state.insert(
            "acme/widgets".to_string(),
            RepoState {
                commits: BTreeMap::from([("release".to_string(), "abc123".to_string())]),
                ..Default::default()
            },
        );
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source.set("acme/widgets", RefKind::Branches, &[("main", "a1")]);
        fx.source.set("acme/widgets", RefKind::Tags, &[]);

        let report = fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        let DiffEntry::CommitTracking(entry) = &report.snapshot.repos[0].entries[0] else {
            panic!("expected commit tracking entry");
        };
        assert_eq!(entry.moved[0].old, "abc123");
        assert_eq!(entry.moved[0].new, CommitPointer::NotFound);

        let saved = fx.poller.store().load_settings(&alice()).await.unwrap().unwrap();
        assert!(!saved.state["acme/widgets"].commits.contains_key("release"));
    }

    #[tokio::test]
    async fn test_fetch_error_does_not_abort_other_repos() {
        let fx = fixture();
        let broken = TrackedRepo {
            repo: "acme/broken".to_string(),
            branches: true,
            ..Default::default()
        };
        let conf = settings(vec![broken, widgets(true, &[])]);
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source.fail("acme/broken", RefKind::Branches, "boom");
        fx.source.set("acme/widgets", RefKind::Branches, &[("main", "a1")]);

        let report = fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        assert_eq!(report.snapshot.repos.len(), 2);
        assert_eq!(report.snapshot.repos[0].entries[0].error(), Some("API error 500: boom"));
        assert!(report.snapshot.repos[1].entries[0].error().is_none());
        assert!(report.persisted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_recorded_as_error() {
        let fx = fixture_with(MockRefSource::with_delay(Duration::from_secs(60)), Duration::from_millis(50));
        let conf = settings(vec![widgets(true, &[])]);
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source.set("acme/widgets", RefKind::Branches, &[("main", "a1")]);

        let report = fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        assert_eq!(report.snapshot.repos[0].entries[0].error(), Some("Timeout after 50ms"));
        assert!(!report.snapshot.has_changes());
    }

    #[tokio::test]
    async fn test_untracked_repo_state_dropped() {
        let fx = fixture();
        let mut conf = settings(vec![widgets(true, &[])]);
        conf.state.insert("acme/old".to_string(), RepoState::default());
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source.set("acme/widgets", RefKind::Branches, &[("main", "a1")]);

        fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        let saved = fx.poller.store().load_settings(&alice()).await.unwrap().unwrap();
        assert_eq!(saved.state.keys().collect::<Vec<_>>(), vec!["acme/widgets"]);
    }

    #[tokio::test]
    async fn test_archive_failure_still_dispatches() {
        let fx = fixture();
        let conf = settings(vec![widgets(true, &[])]);
        fx.poller.store().save_settings(&alice(), &conf).await.unwrap();
        fx.source.set("acme/widgets", RefKind::Branches, &[("main", "a1")]);

        // a plain file where the archive directory should be
        let user_dir = fx.poller.store().user_dir(&alice()).unwrap();
        std::fs::write(user_dir.join("diff"), "not a directory").unwrap();

        let report = fx.poller.poll_user_at(&alice(), now()).await.unwrap();

        assert!(!report.persisted());
        assert_eq!(fx.webhook.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_settings() {
        let fx = fixture();
        assert!(fx.poller.poll_user_at(&alice(), now()).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let fx = fixture();
        let bob = UserKey::new("bitbucket", "bob");
        fx.poller.store().save_settings(&bob, &UserConfig::default()).await.unwrap();
        assert!(fx.poller.poll_user_at(&bob, now()).await.is_err());
    }

    #[test]
    fn test_email_only_user_scheduled_without_mailer() {
        let fx = fixture();
        let mut conf = settings(vec![widgets(true, &[])]);
        conf.notify.webhook_url.clear();
        conf.notify.email = "alice@example.com".to_string();
        conf.notify.hour = "9".to_string();
        conf.notify.weekday = "1".to_string();
        conf.notify.timezone = "UTC".to_string();

        let request = fx.poller.schedule_request(&conf);
        assert_eq!(request, ScheduleRequest::from_config(&conf));
        assert!(request.resolve().is_ok());
        assert!(!fx.poller.dispatcher().can_reach(&conf));
    }
}
