//! Version allocation.
//!
//! The version directories themselves are the record of which labels exist.
//! Anything in an article directory that isn't a `v<N>` directory (the
//! `current` pointer, temporary files, strays dropped there by hand) is
//! ignored.

use std::path::Path;
use tokio::fs;

use crate::error::{ErrorKind, Result};
use crate::version::VersionLabel;

/// Every version label present in `article_dir`, newest first.
///
/// A missing article directory has no versions.
pub(crate) async fn list_versions(article_dir: &Path) -> Result<Vec<VersionLabel>> {
    let mut entries = match fs::read_dir(article_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => exn::bail!(ErrorKind::io(e, article_dir)),
    };
    let mut versions = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::io(e, article_dir))? {
        let Some(label) = entry.file_name().to_str().and_then(|name| name.parse::<VersionLabel>().ok()) else {
            continue;
        };
        // `file_type()` does not follow symlinks, so `current` can never
        // count as a version even if someone names a version after it.
        let file_type = entry.file_type().await.map_err(|e| ErrorKind::io(e, &entry.path()))?;
        if file_type.is_dir() {
            versions.push(label);
        }
    }
    versions.sort_unstable_by(|a, b| b.cmp(a));
    versions.dedup();
    Ok(versions)
}

/// The label the next stored version of this article should get.
///
/// Read-only: never creates the article directory. Only meaningful while the
/// caller holds the article lock, otherwise two callers can be handed the
/// same label.
pub(crate) async fn next_version(article_dir: &Path) -> Result<VersionLabel> {
    match list_versions(article_dir).await?.first() {
        Some(latest) => latest.next(),
        None => Ok(VersionLabel::FIRST),
    }
}
