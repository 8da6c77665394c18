//! Page-number pagination shared by the REST sources

use std::future::Future;

use tracing::debug;

use super::{FetchError, RefKind, RemoteRef};

/// Collect every page of a listing
///
/// Stops at the first short page. If `max_pages` pages all come back full,
/// one more page is requested: empty means the listing ended exactly on the
/// limit, anything else fails with `TooManyRefs` rather than returning a
/// truncated list.
pub(crate) async fn collect_pages<F, Fut>(
    repo: &str,
    kind: RefKind,
    per_page: u32,
    max_pages: u32,
    mut fetch_page: F,
) -> Result<Vec<RemoteRef>, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<RemoteRef>, FetchError>>,
{
    let per_page = per_page.max(1) as usize;
    let max_pages = max_pages.max(1);
    let mut refs = Vec::new();

    for page in 1..=max_pages {
        let batch = fetch_page(page).await?;
        let full = batch.len() >= per_page;
        refs.extend(batch);
        if !full {
            return Ok(refs);
        }
        debug!(%repo, %kind, page, "collect_pages: full page, fetching next");
    }

    if fetch_page(max_pages + 1).await?.is_empty() {
        return Ok(refs);
    }
    Err(FetchError::TooManyRefs {
        repo: repo.to_string(),
        kind: kind.to_string(),
        limit: refs.len(),
    })
}
