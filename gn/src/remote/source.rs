//! RefSource trait and provider link building

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use super::FetchError;

/// Which listing to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Branches,
    Tags,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branches => "branches",
            Self::Tags => "tags",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named reference and the commit it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub commit: String,
}

impl RemoteRef {
    pub fn new(name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
        }
    }
}

/// Lists branches or tags of a remote repository
///
/// Implementations are stateless with respect to users: the token is passed
/// per call so one source serves every user of a provider.
#[async_trait]
pub trait RefSource: Send + Sync {
    async fn list_refs(&self, repo: &str, kind: RefKind, token: &str) -> Result<Vec<RemoteRef>, FetchError>;
}

/// Hosting provider, also used to build web links for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Github,
    Gitlab,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    fn web_base(&self) -> &'static str {
        match self {
            Self::Github => "https://github.com",
            Self::Gitlab => "https://gitlab.com",
        }
    }

    pub fn repo_url(&self, repo: &str) -> String {
        format!("{}/{}", self.web_base(), repo)
    }

    pub fn branches_url(&self, repo: &str) -> String {
        match self {
            Self::Github => format!("{}/branches", self.repo_url(repo)),
            Self::Gitlab => format!("{}/-/branches", self.repo_url(repo)),
        }
    }

    pub fn tags_url(&self, repo: &str) -> String {
        match self {
            Self::Github => format!("{}/tags", self.repo_url(repo)),
            Self::Gitlab => format!("{}/-/tags", self.repo_url(repo)),
        }
    }

    pub fn branch_url(&self, repo: &str, branch: &str) -> String {
        match self {
            Self::Github => format!("{}/tree/{}", self.repo_url(repo), branch),
            Self::Gitlab => format!("{}/-/tree/{}", self.repo_url(repo), branch),
        }
    }

    pub fn tag_url(&self, repo: &str, tag: &str) -> String {
        match self {
            Self::Github => format!("{}/releases/tag/{}", self.repo_url(repo), tag),
            Self::Gitlab => format!("{}/-/tags/{}", self.repo_url(repo), tag),
        }
    }

    pub fn compare_url(&self, repo: &str, old: &str, new: &str) -> String {
        match self {
            Self::Github => format!("{}/compare/{}...{}", self.repo_url(repo), old, new),
            Self::Gitlab => format!("{}/-/compare/{}...{}", self.repo_url(repo), old, new),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "Provider::from_str: called");
        match s.to_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            other => Err(FetchError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory source for unit tests
    #[derive(Default)]
    pub struct MockRefSource {
        refs: Mutex<HashMap<(String, RefKind), Result<Vec<RemoteRef>, String>>>,
        delay: Option<Duration>,
    }

    impl MockRefSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn set(&self, repo: &str, kind: RefKind, refs: &[(&str, &str)]) {
            let refs = refs.iter().map(|(n, c)| RemoteRef::new(*n, *c)).collect();
            self.refs.lock().unwrap().insert((repo.to_string(), kind), Ok(refs));
        }

        pub fn fail(&self, repo: &str, kind: RefKind, message: &str) {
            self.refs
                .lock()
                .unwrap()
                .insert((repo.to_string(), kind), Err(message.to_string()));
        }
    }

    #[async_trait]
    impl RefSource for MockRefSource {
        async fn list_refs(&self, repo: &str, kind: RefKind, _token: &str) -> Result<Vec<RemoteRef>, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let found = self.refs.lock().unwrap().get(&(repo.to_string(), kind)).cloned();
            match found {
                Some(Ok(refs)) => Ok(refs),
                Some(Err(message)) => Err(FetchError::ApiError { status: 500, message }),
                None => Err(FetchError::NotFound(repo.to_string())),
            }
        }
    }
}
