//! Identifier validation and public path resolution.
//!
//! Journal and article identifiers become path segments on disk, so they are
//! checked before they ever get joined onto the storage root. Public paths
//! are what the upload layer hands back to browsers; building them is pure
//! string work and never touches the filesystem.

use std::path::{Component, Path};

use crate::error::{ErrorKind, Result};
use crate::version::VersionLabel;

/// Validates a journal or article identifier.
///
/// An identifier must be exactly one normal path segment: non-empty, no
/// separators, no `.`/`..`, no null bytes.
///
/// # Examples
///
/// ```
/// use quire_storage::validate_identifier;
/// assert!(validate_identifier("investment-management").is_ok());
/// assert!(validate_identifier("art-42").is_ok());
/// assert!(validate_identifier("").is_err());
/// assert!(validate_identifier("..").is_err());
/// assert!(validate_identifier("a/b").is_err());
/// ```
pub fn validate_identifier(id: &str) -> Result<&str> {
    if id.is_empty() || id.contains(['/', '\\', '\0']) {
        exn::bail!(ErrorKind::InvalidIdentifier(id.to_string()));
    }
    // Anything that isn't a single `Normal` component (".", "..", prefixes)
    // would resolve somewhere other than a child of its parent directory.
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(id),
        _ => exn::bail!(ErrorKind::InvalidIdentifier(id.to_string())),
    }
}

/// Maps an article (and optionally one of its versions) to its public path.
///
/// Without a version the path goes through the `current` pointer, so the
/// same URL keeps working as new versions are stored.
///
/// # Examples
///
/// ```
/// use quire_storage::{VersionLabel, public_path};
/// assert_eq!(
///     public_path("investment-management", "art-42", None).unwrap(),
///     "/storage/journals/investment-management/articles/art-42/current/file",
/// );
/// assert_eq!(
///     public_path("investment-management", "art-42", Some(&VersionLabel::new(2).unwrap())).unwrap(),
///     "/storage/journals/investment-management/articles/art-42/v2/file",
/// );
/// ```
pub fn public_path(journal_id: &str, article_id: &str, version: Option<&VersionLabel>) -> Result<String> {
    let journal_id = validate_identifier(journal_id)?;
    let article_id = validate_identifier(article_id)?;
    let segment = match version {
        Some(version) => version.to_string(),
        None => "current".to_string(),
    };
    Ok(format!("/storage/journals/{journal_id}/articles/{article_id}/{segment}/file"))
}
