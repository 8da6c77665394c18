//! GitLab REST implementation of RefSource

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::paging::collect_pages;
use super::{FetchError, RefKind, RefSource, RemoteRef};
use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
struct GitlabCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GitlabRef {
    name: String,
    commit: GitlabCommit,
}

/// Project paths are addressed as a single url-encoded segment
fn encode_project(repo: &str) -> String {
    repo.replace('/', "%2F")
}

/// Lists branches and tags through the GitLab v4 API
pub struct GitlabSource {
    http: Client,
    api_base: String,
    per_page: u32,
    max_pages: u32,
}

impl GitlabSource {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, FetchError> {
        debug!(api = %config.gitlab_api_url, "GitlabSource::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .user_agent(concat!("gitnotify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.gitlab_api_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            max_pages: config.max_pages,
        })
    }

    fn page_url(&self, repo: &str, kind: RefKind, page: u32) -> String {
        format!(
            "{}/projects/{}/repository/{}?per_page={}&page={}",
            self.api_base,
            encode_project(repo),
            kind,
            self.per_page,
            page
        )
    }

    async fn fetch_page(&self, repo: &str, kind: RefKind, token: &str, page: u32) -> Result<Vec<RemoteRef>, FetchError> {
        let mut request = self.http.get(self.page_url(repo, kind, page));
        if !token.is_empty() {
            request = request.header("PRIVATE-TOKEN", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%repo, page, status = status.as_u16(), "GitlabSource::fetch_page: error status");
            return Err(FetchError::from_status(status.as_u16(), repo, body));
        }

        let batch: Vec<GitlabRef> = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        Ok(batch.into_iter().map(|r| RemoteRef::new(r.name, r.commit.id)).collect())
    }
}

#[async_trait]
impl RefSource for GitlabSource {
    async fn list_refs(&self, repo: &str, kind: RefKind, token: &str) -> Result<Vec<RemoteRef>, FetchError> {
        debug!(%repo, %kind, "GitlabSource::list_refs: called");
        let refs = collect_pages(repo, kind, self.per_page, self.max_pages, move |page| {
            self.fetch_page(repo, kind, token, page)
        })
        .await?;
        debug!(%repo, %kind, count = refs.len(), "GitlabSource::list_refs: done");
        Ok(refs)
    }
}
