//! The `current` pointer of an article.
//!
//! On Unix the pointer is a relative symlink `current -> v<N>`, so web
//! servers can serve `current/article.pdf` straight off disk. Elsewhere it is
//! a small file containing the label. Either way a new pointer is first
//! created under a temporary name and then renamed over the old one: rename
//! replaces the destination atomically, so a concurrent reader sees the old
//! version or the new version and never a missing pointer.
//!
//! Only a bare label is a valid pointer: `current -> ../other/v1` is not
//! this article's `v1`.

use std::path::{Component, Path};
use tokio::fs;

use crate::error::{ErrorKind, Result};
use crate::fs::is_dir;
use crate::layout::CURRENT;
use crate::version::VersionLabel;

/// Point `current` at `version`.
///
/// Fails with [`NotFound`](ErrorKind::NotFound) if the version directory does
/// not exist; the existing pointer is left untouched in that case.
pub(crate) async fn set_current(article_dir: &Path, version: &VersionLabel) -> Result<()> {
    let label = version.to_string();
    let version_dir = article_dir.join(&label);
    if !is_dir(&version_dir).await? {
        exn::bail!(ErrorKind::NotFound(version_dir));
    }
    swap(article_dir, label).await?;
    tracing::info!(article = %article_dir.display(), %version, "Swapped current pointer");
    Ok(())
}

#[cfg(unix)]
async fn swap(article_dir: &Path, label: String) -> Result<()> {
    let article_dir = article_dir.to_path_buf();
    crate::fs::blocking(move || {
        let pointer = article_dir.join(CURRENT);
        // Removed again on drop unless persisted.
        let link = tempfile::Builder::new()
            .prefix(".current.")
            .suffix(".tmp")
            .make_in(&article_dir, |temp| std::os::unix::fs::symlink(&label, temp))
            .map_err(|e| ErrorKind::io(e, &article_dir))?;
        link.persist(&pointer).map_err(|e| ErrorKind::io(e.error, &pointer))?;
        crate::fs::sync_dir(&article_dir)
    })
    .await
}

#[cfg(not(unix))]
async fn swap(article_dir: &Path, label: String) -> Result<()> {
    crate::fs::atomic_write(&article_dir.join(CURRENT), label.as_bytes()).await
}

/// The version `current` points at.
///
/// `Ok(None)` when there is no pointer yet. A pointer that doesn't name an
/// existing version directory is also `Ok(None)` (with a warning): readers
/// get "not available" rather than a broken path.
pub(crate) async fn resolve_current(article_dir: &Path) -> Result<Option<VersionLabel>> {
    let pointer = article_dir.join(CURRENT);
    let meta = match fs::symlink_metadata(&pointer).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => exn::bail!(ErrorKind::io(e, &pointer)),
    };
    let named = if meta.file_type().is_symlink() {
        let link = fs::read_link(&pointer).await.map_err(|e| ErrorKind::io(e, &pointer))?;
        let mut components = link.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name.to_string_lossy().into_owned(),
            _ => link.to_string_lossy().into_owned(),
        }
    } else if meta.is_file() {
        let contents = fs::read_to_string(&pointer).await.map_err(|e| ErrorKind::io(e, &pointer))?;
        contents.trim().to_string()
    } else {
        tracing::warn!(pointer = %pointer.display(), "Current pointer is neither a symlink nor a file");
        return Ok(None);
    };
    let Ok(version) = named.parse::<VersionLabel>() else {
        tracing::warn!(pointer = %pointer.display(), named = %named, "Current pointer does not name a version");
        return Ok(None);
    };
    if !is_dir(&article_dir.join(version.to_string())).await? {
        tracing::warn!(pointer = %pointer.display(), %version, "Current pointer names a missing version");
        return Ok(None);
    }
    Ok(Some(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: u64) -> VersionLabel {
        VersionLabel::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_no_pointer_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), None);
        assert_eq!(resolve_current(&dir.path().join("missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v1")).await.unwrap();
        fs::create_dir(dir.path().join("v2")).await.unwrap();
        set_current(dir.path(), &v(1)).await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), Some(v(1)));
        set_current(dir.path(), &v(2)).await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), Some(v(2)));
        // Swapping back is just another swap.
        set_current(dir.path(), &v(1)).await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), Some(v(1)));
    }

    #[tokio::test]
    async fn test_missing_target_leaves_pointer_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v1")).await.unwrap();
        set_current(dir.path(), &v(1)).await.unwrap();
        let err = set_current(dir.path(), &v(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(resolve_current(dir.path()).await.unwrap(), Some(v(1)));
    }

    #[tokio::test]
    async fn test_no_temporary_pointers_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v1")).await.unwrap();
        set_current(dir.path(), &v(1)).await.unwrap();
        set_current(dir.path(), &v(1)).await.unwrap();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec!["current".to_string(), "v1".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pointer_is_relative_symlink() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v1")).await.unwrap();
        fs::write(dir.path().join("v1/article.pdf"), b"pdf").await.unwrap();
        set_current(dir.path(), &v(1)).await.unwrap();
        let link = fs::read_link(dir.path().join("current")).await.unwrap();
        assert_eq!(link, Path::new("v1"));
        // Resolves through the filesystem too.
        assert_eq!(fs::read(dir.path().join("current/article.pdf")).await.unwrap(), b"pdf");
    }

    #[tokio::test]
    async fn test_reads_pointer_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v3")).await.unwrap();
        fs::write(dir.path().join("current"), b"v3\n").await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), Some(v(3)));
    }

    #[tokio::test]
    async fn test_dangling_or_garbage_pointer_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("current"), b"v9").await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), None);
        fs::write(dir.path().join("current"), b"latest").await.unwrap();
        assert_eq!(resolve_current(dir.path()).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pointer_into_another_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let article = dir.path().join("art-1");
        fs::create_dir_all(article.join("v1")).await.unwrap();
        fs::create_dir_all(dir.path().join("art-2/v1")).await.unwrap();
        fs::symlink("../art-2/v1", article.join("current")).await.unwrap();
        assert_eq!(resolve_current(&article).await.unwrap(), None);
        fs::remove_file(article.join("current")).await.unwrap();
        fs::symlink(article.join("v1"), article.join("current")).await.unwrap();
        assert_eq!(resolve_current(&article).await.unwrap(), None);
    }
}
