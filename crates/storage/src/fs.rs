//! Filesystem helpers shared by the store, pointer and ledger.

use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{ErrorKind, Result};

/// Write `data` to a temporary file next to `target`, fsync it, rename it
/// over `target` and fsync the directory. Readers see either the old
/// contents or the new contents.
pub(crate) async fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let target = target.to_path_buf();
    let data = data.to_vec();
    blocking(move || write_and_persist(&target, &data)).await
}

fn write_and_persist(target: &Path, data: &[u8]) -> Result<()> {
    let dir = parent_dir(target);
    // Dot-prefixed, so it never parses as a version label.
    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| ErrorKind::io(e, &dir))?;
    temp.write_all(data).map_err(|e| ErrorKind::io(e, temp.path()))?;
    temp.as_file().sync_all().map_err(|e| ErrorKind::io(e, temp.path()))?;
    temp.persist(target).map_err(|e| ErrorKind::io(e.error, target))?;
    sync_dir(&dir)
}

/// Flush a directory entry change (create, rename) to disk.
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    std::fs::File::open(dir)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| ErrorKind::io(e, dir))?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Run synchronous filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))?
}

/// `Ok(false)` for missing paths instead of an error.
pub(crate) async fn is_dir(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => exn::bail!(ErrorKind::io(e, path)),
    }
}

/// `Ok(false)` for missing paths instead of an error.
pub(crate) async fn is_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => exn::bail!(ErrorKind::io(e, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn names(dir: &Path) -> Vec<String> {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("ledger.json");
        atomic_write(&target, b"[]").await.unwrap();
        atomic_write(&target, b"[1]").await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"[1]");
        // No temporary files left behind.
        assert_eq!(names(dir.path()).await, vec!["ledger.json".to_string()]);
    }

    #[tokio::test]
    async fn test_atomic_write_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let err = atomic_write(&dir.path().join("nope/ledger.json"), b"[]").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(names(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory can't be replaced by a file.
        let target = dir.path().join("metadata.json");
        fs::create_dir(&target).await.unwrap();
        fs::write(target.join("keep"), b"x").await.unwrap();
        assert!(atomic_write(&target, b"{}").await.is_err());
        assert_eq!(names(dir.path()).await, vec!["metadata.json".to_string()]);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("/a/b/current")), Path::new("/a/b"));
        assert_eq!(parent_dir(Path::new("current")), Path::new("."));
    }

    #[tokio::test]
    async fn test_is_dir_and_is_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_dir(dir.path()).await.unwrap());
        assert!(!is_file(dir.path()).await.unwrap());
        assert!(!is_dir(&dir.path().join("missing")).await.unwrap());
        assert!(!is_file(&dir.path().join("missing")).await.unwrap());
        let file = dir.path().join("file");
        fs::write(&file, b"x").await.unwrap();
        assert!(!is_dir(&file).await.unwrap());
        assert!(is_file(&file).await.unwrap());
    }
}
