//! The article store.
//!
//! [`ArticleStore`] is the only thing that writes article bytes. A store
//! runs, under the article lock:
//!
//! 1. allocate the next version label,
//! 2. create `v<N>/`, copy the upload into it, checksum the copy and write
//!    `metadata.json`,
//! 3. swap the `current` pointer,
//! 4. rewrite the ledger, under the ledger lock as well.
//!
//! If step 2 fails the half-written version directory is removed again and
//! neither pointer nor ledger is touched, so the label is reused by the next
//! store. Reads never lock; they resolve the pointer once and then only look
//! at an immutable version directory.

use exn::ResultExt;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tracing::instrument;

use crate::checksum::{ChecksumAlgorithm, checksum_file, verify_file};
use crate::error::{ErrorKind, Result};
use crate::fs::{atomic_write, is_dir, is_file};
use crate::layout::{Layout, METADATA_FILE, STORED_STEM};
use crate::lock::{ArticleLocks, LockGuard};
use crate::models::{FileMetadata, LedgerEntry, StorageResult, StoreHints, StoredFile};
use crate::path::{public_path, validate_identifier};
use crate::version::VersionLabel;
use crate::{allocator, ledger, pointer};

const DEFAULT_EXTENSION: &str = "pdf";
const DEFAULT_ORIGINAL_NAME: &str = "article.pdf";
const MAX_EXTENSION_LEN: usize = 10;

/// Versioned storage for article files.
///
/// Construct one per storage root and share it (it is `Send + Sync`); the
/// per-article locks only serialize writers that go through the same
/// instance, or through the lock files when those are enabled.
///
/// # Examples
///
/// ```no_run
/// use quire_storage::{ArticleStore, StoreHints};
///
/// # async fn example() -> quire_storage::error::Result<()> {
/// let store = ArticleStore::new("/srv/quire/storage", "/srv/quire/data")?;
/// let hints = StoreHints::default().with_original_name("paper-v1.pdf").with_uploaded_by("editor@example.org");
/// let stored = store.store("investment-management", "art-42", "/tmp/upload-1234", hints).await?;
/// println!("stored {} at {}", stored.version, stored.url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ArticleStore {
    layout: Layout,
    checksum: ChecksumAlgorithm,
    lock_files: bool,
    locks: ArticleLocks,
}

impl ArticleStore {
    /// Create a store rooted at two absolute directories, creating them if
    /// needed.
    ///
    /// Defaults to SHA-256 checksums and, on Unix, cross-process lock files.
    pub fn new(storage_root: impl AsRef<Path>, data_root: impl AsRef<Path>) -> Result<Self> {
        let layout = Layout::new(storage_root, data_root)?;
        for root in [layout.storage_root(), layout.data_root()] {
            if root.exists() {
                if !root.is_dir() {
                    exn::bail!(ErrorKind::AlreadyExists(root.to_path_buf()));
                }
            } else {
                // Use non-async here; it only happens once at startup and
                // isn't worth making the constructor async.
                std::fs::create_dir_all(root).map_err(|e| ErrorKind::io(e, root))?;
            }
        }
        Ok(Self {
            layout,
            checksum: ChecksumAlgorithm::default(),
            lock_files: cfg!(unix),
            locks: ArticleLocks::default(),
        })
    }

    /// Algorithm used for newly stored versions. Existing versions keep the
    /// algorithm recorded in their metadata.
    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = algorithm;
        self
    }

    /// Whether writers also take a lock file, for storage roots shared
    /// between processes.
    pub fn with_lock_files(mut self, enabled: bool) -> Self {
        self.lock_files = enabled;
        self
    }

    pub fn storage_root(&self) -> &Path {
        self.layout.storage_root()
    }

    pub fn data_root(&self) -> &Path {
        self.layout.data_root()
    }

    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.checksum
    }

    /// Store `source` as the next version of an article and make it current.
    ///
    /// # Errors
    /// - [`InvalidIdentifier`](ErrorKind::InvalidIdentifier) for bad ids,
    /// - [`NotFound`](ErrorKind::NotFound) / [`Io`](ErrorKind::Io) and
    ///   friends when the source can't be read or the copy can't be written;
    ///   nothing is left behind in that case,
    /// - [`VersionCollision`](ErrorKind::VersionCollision) if the allocated
    ///   version directory already exists. This means something wrote to the
    ///   article without holding its lock, and is [fatal](ErrorKind::is_fatal).
    #[instrument(skip(self, source, hints), fields(upload = %source.as_ref().display()))]
    pub async fn store(
        &self,
        journal_id: &str,
        article_id: &str,
        source: impl AsRef<Path>,
        hints: StoreHints,
    ) -> Result<StorageResult> {
        let journal_id = validate_identifier(journal_id)?;
        let article_id = validate_identifier(article_id)?;
        let source = source.as_ref();
        if !is_file(source).await? {
            exn::bail!(ErrorKind::NotFound(source.to_path_buf()));
        }

        let _guard = self.lock(journal_id, article_id).await?;
        let article_dir = self.layout.article_dir(journal_id, article_id);
        let version = allocator::next_version(&article_dir).await?;
        tracing::debug!(%version, "Allocated version");

        fs::create_dir_all(&article_dir).await.map_err(|e| ErrorKind::io(e, &article_dir))?;
        let version_dir = self.layout.version_dir(journal_id, article_id, &version);
        match fs::create_dir(&version_dir).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::error!(
                    journal = journal_id,
                    article = article_id,
                    %version,
                    "Version directory already exists; refusing to overwrite"
                );
                exn::bail!(ErrorKind::VersionCollision(format!("{journal_id}/{article_id}/{version}")));
            },
            Err(e) => exn::bail!(ErrorKind::io(e, &version_dir)),
        }

        let metadata = match self.persist(source, &version_dir, version, &hints).await {
            Ok(metadata) => metadata,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&version_dir).await {
                    tracing::warn!(
                        path = %version_dir.display(),
                        error = %cleanup,
                        "Could not remove partially written version"
                    );
                }
                return Err(e);
            },
        };

        pointer::set_current(&article_dir, &version).await?;
        {
            let _ledger = self.ledger_lock(article_id).await?;
            let entry = LedgerEntry::for_metadata(journal_id, &metadata, &hints);
            ledger::record(&self.layout.ledger_path(article_id), entry).await?;
        }

        let url = public_path(journal_id, article_id, Some(&version))?;
        tracing::info!(
            journal = journal_id,
            article = article_id,
            %version,
            size = metadata.size,
            checksum = %metadata.checksum,
            "Stored article version"
        );
        Ok(StorageResult {
            version,
            path: version_dir.join(&metadata.filename),
            url,
            metadata,
        })
    }

    /// Copy, fingerprint and describe the upload inside a fresh version
    /// directory.
    async fn persist(
        &self,
        source: &Path,
        version_dir: &Path,
        version: VersionLabel,
        hints: &StoreHints,
    ) -> Result<FileMetadata> {
        let extension = stored_extension(hints.original_name.as_deref(), source);
        let filename = format!("{STORED_STEM}.{extension}");
        let target = version_dir.join(&filename);

        copy_into(source, &target).await?;
        fs::File::open(&target)
            .await
            .map_err(|e| ErrorKind::io(e, &target))?
            .sync_all()
            .await
            .map_err(|e| ErrorKind::io(e, &target))?;
        // Fingerprint the copy, not the source: a corrupted copy must not
        // inherit the source's checksum.
        let checksum = checksum_file(&target, self.checksum).await?;
        let size = fs::metadata(&target).await.map_err(|e| ErrorKind::io(e, &target))?.len();

        let metadata = FileMetadata {
            filename,
            original_name: original_name(hints.original_name.as_deref(), source),
            mime_type: hints.mime_type.clone().unwrap_or_else(|| mime_type_for(&extension).to_string()),
            size,
            checksum,
            uploaded_at: OffsetDateTime::now_utc(),
            uploaded_by: hints.uploaded_by.clone(),
            version,
        };
        let json = serde_json::to_vec_pretty(&metadata).or_raise(|| ErrorKind::Serialization)?;
        atomic_write(&version_dir.join(METADATA_FILE), &json).await?;
        Ok(metadata)
    }

    /// Make an existing version current again.
    ///
    /// Swaps the pointer and re-flags the ledger. No version is created or
    /// removed. Fails with [`NotFound`](ErrorKind::NotFound) when the version
    /// doesn't exist, leaving the pointer as it was.
    #[instrument(skip(self))]
    pub async fn rollback(&self, journal_id: &str, article_id: &str, version: &VersionLabel) -> Result<()> {
        let journal_id = validate_identifier(journal_id)?;
        let article_id = validate_identifier(article_id)?;
        let _guard = self.lock(journal_id, article_id).await?;

        let version_dir = self.layout.version_dir(journal_id, article_id, version);
        if !is_dir(&version_dir).await? {
            exn::bail!(ErrorKind::NotFound(version_dir));
        }
        pointer::set_current(&self.layout.article_dir(journal_id, article_id), version).await?;

        let entry = match read_metadata(&version_dir).await? {
            Some(metadata) => LedgerEntry::for_metadata(journal_id, &metadata, &StoreHints::default()),
            None => LedgerEntry {
                version: *version,
                journal: journal_id.to_string(),
                created_at: OffsetDateTime::now_utc(),
                created_by: None,
                is_current: true,
                reason: None,
                changes: None,
            },
        };
        let _ledger = self.ledger_lock(article_id).await?;
        ledger::mark_current(&self.layout.ledger_path(article_id), entry).await?;
        tracing::info!(journal = journal_id, article = article_id, %version, "Rolled back article");
        Ok(())
    }

    /// The version the `current` pointer resolves to.
    pub async fn current(&self, journal_id: &str, article_id: &str) -> Result<Option<VersionLabel>> {
        pointer::resolve_current(&self.article_dir(journal_id, article_id)?).await
    }

    /// Locate a stored file: the current version when `version` is `None`,
    /// otherwise that specific version.
    ///
    /// `Ok(None)` when the article, version, pointer or file doesn't exist.
    pub async fn locate(
        &self,
        journal_id: &str,
        article_id: &str,
        version: Option<&VersionLabel>,
    ) -> Result<Option<StoredFile>> {
        let article_dir = self.article_dir(journal_id, article_id)?;
        let version = match version {
            Some(version) => *version,
            None => match pointer::resolve_current(&article_dir).await? {
                Some(version) => version,
                None => return Ok(None),
            },
        };
        let version_dir = article_dir.join(version.to_string());
        if !is_dir(&version_dir).await? {
            return Ok(None);
        }
        let metadata = read_metadata(&version_dir).await?;
        let filename = match &metadata {
            Some(metadata) => Some(metadata.filename.clone()),
            None => find_stored_file(&version_dir).await?,
        };
        let Some(filename) = filename else {
            return Ok(None);
        };
        let path = version_dir.join(filename);
        if !is_file(&path).await? {
            return Ok(None);
        }
        Ok(Some(StoredFile { version, path, metadata }))
    }

    /// Read a stored file's bytes. See [`locate`](Self::locate).
    pub async fn read(
        &self,
        journal_id: &str,
        article_id: &str,
        version: Option<&VersionLabel>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(file) = self.locate(journal_id, article_id, version).await? else {
            return Ok(None);
        };
        match fs::read(&file.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => exn::bail!(ErrorKind::io(e, &file.path)),
        }
    }

    /// Metadata of the current or a specific version.
    pub async fn metadata(
        &self,
        journal_id: &str,
        article_id: &str,
        version: Option<&VersionLabel>,
    ) -> Result<Option<FileMetadata>> {
        Ok(self.locate(journal_id, article_id, version).await?.and_then(|file| file.metadata))
    }

    /// Every stored version, newest first, as found on disk.
    pub async fn versions(&self, journal_id: &str, article_id: &str) -> Result<Vec<VersionLabel>> {
        allocator::list_versions(&self.article_dir(journal_id, article_id)?).await
    }

    /// The article's version ledger, newest first.
    pub async fn history(&self, journal_id: &str, article_id: &str) -> Result<Vec<LedgerEntry>> {
        let journal_id = validate_identifier(journal_id)?;
        let article_id = validate_identifier(article_id)?;
        ledger::read(&self.layout.ledger_path(article_id), journal_id).await
    }

    /// Recompute a stored file's checksum and compare it to its metadata.
    ///
    /// `Ok(None)` when there is nothing to verify: no such file, or no
    /// readable metadata to compare against.
    pub async fn verify(
        &self,
        journal_id: &str,
        article_id: &str,
        version: Option<&VersionLabel>,
    ) -> Result<Option<bool>> {
        let Some(StoredFile {
            version,
            path,
            metadata: Some(metadata),
        }) = self.locate(journal_id, article_id, version).await?
        else {
            return Ok(None);
        };
        let intact = verify_file(&path, &metadata.checksum).await?;
        if !intact {
            tracing::warn!(
                journal = journal_id,
                article = article_id,
                %version,
                expected = %metadata.checksum,
                "Stored file does not match its recorded checksum"
            );
        }
        Ok(Some(intact))
    }

    /// Public path of the current or a specific version.
    pub fn public_path(&self, journal_id: &str, article_id: &str, version: Option<&VersionLabel>) -> Result<String> {
        public_path(journal_id, article_id, version)
    }

    fn article_dir(&self, journal_id: &str, article_id: &str) -> Result<PathBuf> {
        let journal_id = validate_identifier(journal_id)?;
        let article_id = validate_identifier(article_id)?;
        Ok(self.layout.article_dir(journal_id, article_id))
    }

    async fn lock(&self, journal_id: &str, article_id: &str) -> Result<LockGuard> {
        let lock_file = self.lock_files.then(|| self.layout.article_lock(journal_id, article_id));
        self.locks.article(journal_id, article_id, lock_file.as_deref()).await
    }

    /// Only ever taken while holding an article lock.
    async fn ledger_lock(&self, article_id: &str) -> Result<LockGuard> {
        let lock_file = self.lock_files.then(|| self.layout.ledger_lock(article_id));
        self.locks.ledger(article_id, lock_file.as_deref()).await
    }
}

/// Copy an upload into a version directory. A failure is blamed on the
/// source only when the source can't be opened.
async fn copy_into(source: &Path, target: &Path) -> Result<u64> {
    match fs::copy(source, target).await {
        Ok(size) => Ok(size),
        Err(e) => {
            let culprit = match fs::File::open(source).await {
                Ok(_) => target,
                Err(_) => source,
            };
            exn::bail!(ErrorKind::io(e, culprit))
        },
    }
}

/// `metadata.json` of a version. Missing or unreadable metadata is `None`.
async fn read_metadata(version_dir: &Path) -> Result<Option<FileMetadata>> {
    let path = version_dir.join(METADATA_FILE);
    let data = match fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => exn::bail!(ErrorKind::io(e, &path)),
    };
    match serde_json::from_slice::<FileMetadata>(&data) {
        // The filename ends up joined onto a path; it must stay inside the
        // version directory.
        Ok(metadata) if validate_identifier(&metadata.filename).is_ok() => Ok(Some(metadata)),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable version metadata");
            Ok(None)
        },
    }
}

/// Fallback for versions without usable metadata: the `article.*` file.
async fn find_stored_file(version_dir: &Path) -> Result<Option<String>> {
    let mut entries = fs::read_dir(version_dir).await.map_err(|e| ErrorKind::io(e, version_dir))?;
    let mut candidates = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::io(e, version_dir))? {
        let path = entry.path();
        let is_stored = path.file_stem().is_some_and(|stem| stem == STORED_STEM) && path.extension().is_some();
        if is_stored && entry.file_type().await.map_err(|e| ErrorKind::io(e, &path))?.is_file() {
            candidates.extend(entry.file_name().to_str().map(str::to_string));
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Extension for the stored `article.<ext>`: from the uploaded name, then
/// from the source path, then `pdf`.
fn stored_extension(original_name: Option<&str>, source: &Path) -> String {
    let candidates = [original_name.map(Path::new), Some(source)];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|path| path.extension()?.to_str())
        .map(str::to_ascii_lowercase)
        .find(|ext| {
            !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn original_name(hint: Option<&str>, source: &Path) -> String {
    hint.filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| source.file_name().and_then(|name| name.to_str()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_ORIGINAL_NAME.to_string())
}

fn mime_type_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
