//! GitHub REST implementation of RefSource

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::paging::collect_pages;
use super::{FetchError, RefKind, RefSource, RemoteRef};
use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GithubRef {
    name: String,
    commit: GithubCommit,
}

/// Lists branches and tags through `api.github.com`
pub struct GithubSource {
    http: Client,
    api_base: String,
    per_page: u32,
    max_pages: u32,
}

impl GithubSource {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, FetchError> {
        debug!(api = %config.github_api_url, "GithubSource::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .user_agent(concat!("gitnotify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.github_api_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            max_pages: config.max_pages,
        })
    }

    fn page_url(&self, repo: &str, kind: RefKind, page: u32) -> String {
        format!(
            "{}/repos/{}/{}?per_page={}&page={}",
            self.api_base, repo, kind, self.per_page, page
        )
    }

    async fn fetch_page(&self, repo: &str, kind: RefKind, token: &str, page: u32) -> Result<Vec<RemoteRef>, FetchError> {
        let mut request = self
            .http
            .get(self.page_url(repo, kind, page))
            .header("Accept", "application/vnd.github+json");
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%repo, page, status = status.as_u16(), "GithubSource::fetch_page: error status");
            return Err(FetchError::from_status(status.as_u16(), repo, body));
        }

        let batch: Vec<GithubRef> = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        Ok(batch.into_iter().map(|r| RemoteRef::new(r.name, r.commit.sha)).collect())
    }
}

#[async_trait]
impl RefSource for GithubSource {
    async fn list_refs(&self, repo: &str, kind: RefKind, token: &str) -> Result<Vec<RemoteRef>, FetchError> {
        debug!(%repo, %kind, "GithubSource::list_refs: called");
        let refs = collect_pages(repo, kind, self.per_page, self.max_pages, move |page| {
            self.fetch_page(repo, kind, token, page)
        })
        .await?;
        debug!(%repo, %kind, count = refs.len(), "GithubSource::list_refs: done");
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        let config = RemoteConfig {
            github_api_url: "https://api.github.com/".to_string(),
            per_page: 50,
            ..Default::default()
        };
        let source = GithubSource::from_config(&config).unwrap();
        assert_eq!(
            source.page_url("acme/widgets", RefKind::Tags, 2),
            "https://api.github.com/repos/acme/widgets/tags?per_page=50&page=2"
        );
    }

    #[test]
    fn test_parse_refs() {
        let body = r#"[{"name":"main","commit":{"sha":"abc123","url":"x"},"protected":true}]"#;
        let refs: Vec<GithubRef> = serde_json::from_str(body).unwrap();
        assert_eq!(refs[0].name, "main");
        assert_eq!(refs[0].commit.sha, "abc123");
    }
}
