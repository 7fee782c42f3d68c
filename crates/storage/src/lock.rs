//! Per-article write locks.
//!
//! Allocating a version label and creating its directory is a
//! check-then-act sequence, so every mutation of an article runs while
//! holding that article's lock. The ledger file is keyed by article id
//! alone and shared between journals, so rewriting it takes a second lock
//! keyed by article id. Article lock first, ledger lock second.
//!
//! Within a process a lock is an async mutex. When several processes share
//! a storage root it is additionally an exclusive `flock` on a lock file.
//!
//! Readers never lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Article { journal: String, article: String },
    Ledger { article: String },
}

#[derive(Debug, Default)]
pub(crate) struct ArticleLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Dropping it releases both the in-process and the file lock.
#[derive(Debug)]
pub(crate) struct LockGuard {
    #[cfg(unix)]
    _file: Option<FileLock>,
    _local: OwnedMutexGuard<()>,
}

impl ArticleLocks {
    /// Wait for exclusive access to an article.
    ///
    /// `lock_file` adds a cross-process lock on top of the in-process one.
    /// It is ignored on non-Unix platforms.
    pub(crate) async fn article(
        &self,
        journal_id: &str,
        article_id: &str,
        lock_file: Option<&Path>,
    ) -> Result<LockGuard> {
        let key = LockKey::Article {
            journal: journal_id.to_string(),
            article: article_id.to_string(),
        };
        let guard = self.acquire(key, lock_file).await?;
        tracing::debug!(journal = journal_id, article = article_id, "Acquired article lock");
        Ok(guard)
    }

    /// Wait for exclusive access to the ledger of an article id, across all
    /// journals.
    pub(crate) async fn ledger(&self, article_id: &str, lock_file: Option<&Path>) -> Result<LockGuard> {
        let key = LockKey::Ledger {
            article: article_id.to_string(),
        };
        let guard = self.acquire(key, lock_file).await?;
        tracing::debug!(article = article_id, "Acquired ledger lock");
        Ok(guard)
    }

    async fn acquire(&self, key: LockKey, lock_file: Option<&Path>) -> Result<LockGuard> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map holds idle entries; waiters and holders keep a clone.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            locks.entry(key).or_default().clone()
        };
        let local = mutex.lock_owned().await;

        #[cfg(unix)]
        let file = match lock_file {
            Some(path) => Some(FileLock::acquire(path).await?),
            None => None,
        };
        #[cfg(not(unix))]
        if lock_file.is_some() {
            tracing::debug!("Lock files are only supported on Unix");
        }

        Ok(LockGuard {
            #[cfg(unix)]
            _file: file,
            _local: local,
        })
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Tasks holding or waiting for an article's lock.
    #[cfg(test)]
    pub(crate) fn contenders(&self, journal_id: &str, article_id: &str) -> usize {
        let key = LockKey::Article {
            journal: journal_id.to_string(),
            article: article_id.to_string(),
        };
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(&key).map_or(0, |mutex| Arc::strong_count(mutex) - 1)
    }
}

/// Exclusive advisory lock on a file, released when the file is closed.
#[cfg(unix)]
#[derive(Debug)]
struct FileLock {
    _file: std::fs::File,
}

#[cfg(unix)]
impl FileLock {
    async fn acquire(path: &Path) -> Result<Self> {
        use exn::ResultExt;
        use nix::fcntl::{FlockArg, flock};
        use std::os::unix::io::AsRawFd;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(e, parent))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| ErrorKind::io(e, path))?
            .into_std()
            .await;
        // flock(2) blocks the calling thread until the other holder lets go.
        let file = tokio::task::spawn_blocking(move || flock(file.as_raw_fd(), FlockArg::LockExclusive).map(|()| file))
            .await
            .or_raise(|| ErrorKind::Lock)?
            .or_raise(|| ErrorKind::Lock)?;
        tracing::debug!(path = %path.display(), "Acquired lock file");
        Ok(Self { _file: file })
    }
}
