//! Versioned storage for article files.
//!
//! Every upload of an article becomes an immutable version directory
//! (`v1`, `v2`, ...) holding the file and its `metadata.json`. A `current`
//! pointer names the version that is served, and a JSON ledger per article
//! records the history. See [`ArticleStore`].

mod allocator;
pub mod checksum;
pub mod error;
mod fs;
mod layout;
mod ledger;
mod lock;
mod models;
mod path;
mod pointer;
mod store;
mod version;

pub use crate::checksum::{Checksum, ChecksumAlgorithm, checksum_file, verify_file};
pub use crate::models::{FileMetadata, LedgerEntry, StorageResult, StoreHints, StoredFile};
pub use crate::path::{public_path, validate_identifier};
pub use crate::store::ArticleStore;
pub use crate::version::VersionLabel;
