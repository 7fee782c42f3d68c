//! Per-article version ledger.
//!
//! A JSON array of [`LedgerEntry`], newest first, used for browsing history.
//! It is an index, not the source of truth: the `current` pointer decides
//! which version is served. The file is named after the article id alone,
//! so journals reusing an article id share it; every row carries its
//! journal, and reads and rewrites only ever look at the caller's journal.
//! Rows of other journals are written back untouched. Rewrites happen under
//! the ledger lock and go through a temporary file and rename.
//!
//! A ledger that fails to parse is treated as empty and gets rewritten on
//! the next store. The version directories are untouched, so the history can
//! be rebuilt from their `metadata.json` files; the warning is the only
//! trace left of the old contents.

use exn::ResultExt;
use std::path::Path;
use tokio::fs;

use crate::error::{ErrorKind, Result};
use crate::fs::atomic_write;
use crate::models::LedgerEntry;

/// One journal's rows of a ledger.
pub(crate) async fn read(path: &Path, journal_id: &str) -> Result<Vec<LedgerEntry>> {
    let mut entries = read_all(path).await?;
    entries.retain(|entry| entry.journal == journal_id);
    Ok(entries)
}

/// Every row. Missing and unparseable files are both empty ledgers.
async fn read_all(path: &Path) -> Result<Vec<LedgerEntry>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => exn::bail!(ErrorKind::io(e, path)),
    };
    match serde_json::from_slice::<Vec<LedgerEntry>>(&data) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            tracing::warn!(
                ledger = %path.display(),
                error = %e,
                "Version ledger is corrupt; treating it as empty and discarding its history"
            );
            Ok(vec![])
        },
    }
}

/// Append `entry` as the one current version of its journal's article and
/// rewrite the ledger. Returns that journal's rows.
///
/// Every existing row of the journal loses its current flag. An existing row
/// for the same label (left over from an interrupted store) is replaced.
pub(crate) async fn record(path: &Path, mut entry: LedgerEntry) -> Result<Vec<LedgerEntry>> {
    let mut entries = read_all(path).await?;
    entries.retain(|existing| existing.journal != entry.journal || existing.version != entry.version);
    for existing in entries.iter_mut().filter(|existing| existing.journal == entry.journal) {
        existing.is_current = false;
    }
    entry.is_current = true;
    let journal = entry.journal.clone();
    entries.push(entry);
    write(path, entries, &journal).await
}

/// Flag `entry.version` as the only current version of its journal's
/// article, adding `entry` if the ledger has no row for that version yet.
pub(crate) async fn mark_current(path: &Path, entry: LedgerEntry) -> Result<Vec<LedgerEntry>> {
    let mut entries = read_all(path).await?;
    let mine = |existing: &LedgerEntry| existing.journal == entry.journal;
    if !entries.iter().any(|existing| mine(existing) && existing.version == entry.version) {
        entries.push(entry.clone());
    }
    for existing in entries.iter_mut().filter(|existing| mine(existing)) {
        existing.is_current = existing.version == entry.version;
    }
    write(path, entries, &entry.journal).await
}

async fn write(path: &Path, mut entries: Vec<LedgerEntry>, journal_id: &str) -> Result<Vec<LedgerEntry>> {
    // Stable: rows sharing a label (other journals, hand-edited files) keep
    // their relative order.
    entries.sort_by(|a, b| b.version.cmp(&a.version));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(e, parent))?;
    }
    let json = serde_json::to_vec_pretty(&entries).or_raise(|| ErrorKind::Serialization)?;
    atomic_write(path, &json).await?;
    entries.retain(|entry| entry.journal == journal_id);
    Ok(entries)
}
