//! Storage models.
//!
//! These types are both the on-disk JSON documents (per-version metadata and
//! the ledger) and the values handed back to callers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

use crate::checksum::Checksum;
use crate::version::VersionLabel;

/// Per-version metadata, persisted as `v<N>/metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Stored filename inside the version directory (`article.<ext>`)
    pub filename: String,
    /// Filename as uploaded
    pub original_name: String,
    pub mime_type: String,
    /// File size in bytes
    pub size: u64,
    pub checksum: Checksum,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    pub uploaded_by: Option<String>,
    pub version: VersionLabel,
}

/// One row of an article's version ledger.
///
/// Ledger files are named after the article id alone, so each row records
/// the journal it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub version: VersionLabel,
    pub journal: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: Option<String>,
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<String>,
}
impl LedgerEntry {
    /// Ledger row describing a freshly stored version.
    pub fn for_metadata(journal_id: &str, metadata: &FileMetadata, hints: &StoreHints) -> Self {
        Self {
            version: metadata.version,
            journal: journal_id.to_string(),
            created_at: metadata.uploaded_at,
            created_by: metadata.uploaded_by.clone(),
            is_current: true,
            reason: hints.reason.clone(),
            changes: hints.changes.clone(),
        }
    }
}

/// Caller-supplied details about an upload. Everything is optional; missing
/// values are derived from the source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreHints {
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub uploaded_by: Option<String>,
    /// Why this version was uploaded (ledger only)
    pub reason: Option<String>,
    /// Summary of what changed (ledger only)
    pub changes: Option<String>,
}
impl StoreHints {
    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_uploaded_by(mut self, user: impl Into<String>) -> Self {
        self.uploaded_by = Some(user.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_changes(mut self, changes: impl Into<String>) -> Self {
        self.changes = Some(changes.into());
        self
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResult {
    pub version: VersionLabel,
    /// Absolute path of the stored file
    pub path: PathBuf,
    /// Public path of this specific version
    pub url: String,
    pub metadata: FileMetadata,
}

/// A stored file located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub version: VersionLabel,
    /// Absolute path of the stored file
    pub path: PathBuf,
    /// `None` when the version directory has no readable `metadata.json`
    pub metadata: Option<FileMetadata>,
}
