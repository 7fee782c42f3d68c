use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::num::NonZeroU64;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

/// Label of an immutable stored snapshot: `v1`, `v2`, ...
///
/// Ordering follows the version number, so `v10 > v9`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("v{_0}")]
pub struct VersionLabel(NonZeroU64);

impl VersionLabel {
    /// The first version of every article.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Returns `None` for zero; version numbers start at one.
    pub fn new(number: u64) -> Option<Self> {
        NonZeroU64::new(number).map(Self)
    }

    pub fn number(&self) -> u64 {
        self.0.get()
    }

    /// The label allocated after this one.
    pub fn next(&self) -> Result<Self> {
        match self.0.checked_add(1) {
            Some(n) => Ok(Self(n)),
            None => exn::bail!(ErrorKind::InvalidVersion(self.to_string())),
        }
    }
}

impl FromStr for VersionLabel {
    type Err = Error;

    /// Parses `v<digits>`. Leading zeros are tolerated (`v01` is `v1`), zero
    /// and anything else are rejected.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidVersion(s.to_string());
        let Some(digits) = s.strip_prefix('v') else {
            exn::bail!(invalid());
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            exn::bail!(invalid());
        }
        match digits.parse::<u64>().ok().and_then(Self::new) {
            Some(label) => Ok(label),
            None => exn::bail!(invalid()),
        }
    }
}

impl Serialize for VersionLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| serde::de::Error::custom(format!("invalid version label `{s}`")))
    }
}
