//! Remote repository sources
//!
//! Lists branches and tags (with their commits) from hosting providers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

mod error;
mod github;
mod gitlab;
mod paging;
mod source;

pub use error::FetchError;
pub use github::GithubSource;
pub use gitlab::GitlabSource;
pub use source::{Provider, RefKind, RefSource, RemoteRef};

#[cfg(test)]
pub use source::mock;

use crate::config::RemoteConfig;

/// Create the RefSource for a provider
pub fn create_source(provider: Provider, config: &RemoteConfig) -> Result<Arc<dyn RefSource>, FetchError> {
    debug!(%provider, "create_source: called");
    match provider {
        Provider::Github => Ok(Arc::new(GithubSource::from_config(config)?)),
        Provider::Gitlab => Ok(Arc::new(GitlabSource::from_config(config)?)),
    }
}

/// One RefSource per provider, shared by every user's runs
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: HashMap<Provider, Arc<dyn RefSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources for every supported provider
    pub fn from_config(config: &RemoteConfig) -> Result<Self, FetchError> {
        let mut set = Self::new();
        for provider in [Provider::Github, Provider::Gitlab] {
            set.insert(provider, create_source(provider, config)?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, provider: Provider, source: Arc<dyn RefSource>) {
        self.sources.insert(provider, source);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn RefSource>, FetchError> {
        self.sources
            .get(&provider)
            .cloned()
            .ok_or_else(|| FetchError::UnsupportedProvider(provider.to_string()))
    }
}
