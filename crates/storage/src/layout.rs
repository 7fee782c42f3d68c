//! On-disk layout.
//!
//! ```text
//! <storage_root>/journals/<journal>/articles/<article>/
//!     current -> v<N>
//!     v1/article.<ext>
//!     v1/metadata.json
//! <data_root>/versions/<article>-versions.json
//! <data_root>/locks/articles/<journal>/<article>.lock
//! <data_root>/locks/ledgers/<article>.lock
//! ```
//!
//! Lock files live under the data root so no identifier can name one.
//!
//! Identifiers must already have passed [`validate_identifier`](crate::validate_identifier).

use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};
use crate::version::VersionLabel;

pub(crate) const CURRENT: &str = "current";
pub(crate) const METADATA_FILE: &str = "metadata.json";
pub(crate) const STORED_STEM: &str = "article";

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    storage_root: PathBuf,
    data_root: PathBuf,
}
impl Layout {
    /// Both roots must be absolute; they are not created here.
    pub(crate) fn new(storage_root: impl AsRef<Path>, data_root: impl AsRef<Path>) -> Result<Self> {
        let storage_root = storage_root.as_ref().to_path_buf();
        let data_root = data_root.as_ref().to_path_buf();
        for root in [&storage_root, &data_root] {
            if !root.is_absolute() {
                exn::bail!(ErrorKind::InvalidPath(root.clone()));
            }
        }
        Ok(Self { storage_root, data_root })
    }

    pub(crate) fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub(crate) fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn articles_dir(&self, journal_id: &str) -> PathBuf {
        self.storage_root.join("journals").join(journal_id).join("articles")
    }

    pub(crate) fn article_dir(&self, journal_id: &str, article_id: &str) -> PathBuf {
        self.articles_dir(journal_id).join(article_id)
    }

    pub(crate) fn article_lock(&self, journal_id: &str, article_id: &str) -> PathBuf {
        self.locks_dir().join("articles").join(journal_id).join(format!("{article_id}.lock"))
    }

    /// The ledger is shared by every journal using the article id.
    pub(crate) fn ledger_lock(&self, article_id: &str) -> PathBuf {
        self.locks_dir().join("ledgers").join(format!("{article_id}.lock"))
    }

    fn locks_dir(&self) -> PathBuf {
        self.data_root.join("locks")
    }

    pub(crate) fn version_dir(&self, journal_id: &str, article_id: &str, version: &VersionLabel) -> PathBuf {
        self.article_dir(journal_id, article_id).join(version.to_string())
    }

    pub(crate) fn ledger_path(&self, article_id: &str) -> PathBuf {
        self.data_root.join("versions").join(format!("{article_id}-versions.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new("/srv/quire/storage", "/srv/quire/data").unwrap()
    }

    #[test]
    fn test_requires_absolute_roots() {
        let err = Layout::new("relative/storage", "/data").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(p) if p == Path::new("relative/storage")));
        let err = Layout::new("/storage", "./data").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_paths() {
        let layout = layout();
        let v2 = VersionLabel::new(2).unwrap();
        assert_eq!(
            layout.article_dir("jim", "art-42"),
            Path::new("/srv/quire/storage/journals/jim/articles/art-42")
        );
        assert_eq!(
            layout.version_dir("jim", "art-42", &v2),
            Path::new("/srv/quire/storage/journals/jim/articles/art-42/v2")
        );
        assert_eq!(
            layout.article_lock("jim", "art-42"),
            Path::new("/srv/quire/data/locks/articles/jim/art-42.lock")
        );
        assert_eq!(layout.ledger_lock("art-42"), Path::new("/srv/quire/data/locks/ledgers/art-42.lock"));
        // An article named like another article's lock file gets its own directory.
        assert_ne!(
            layout.article_dir("jim", "art-42.lock"),
            layout.article_lock("jim", "art-42")
        );
        assert_eq!(layout.ledger_path("art-42"), Path::new("/srv/quire/data/versions/art-42-versions.json"));
    }
}
