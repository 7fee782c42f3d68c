//! Layered configuration for quire.
//!
//! Values come from, in increasing priority:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, picked by extension),
//! 3. `QUIRE_`-prefixed environment variables, e.g. `QUIRE_STORAGE_ROOT`.
//!
//! Without an explicit file, `config.toml` in the platform configuration
//! directory is used when it exists.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use quire_storage::{ArticleStore, ChecksumAlgorithm};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "QUIRE_";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the public storage tree (`journals/<journal>/articles/...`).
    pub storage_root: PathBuf,
    /// Root for private bookkeeping such as the version ledgers.
    pub data_root: PathBuf,
    /// Checksum algorithm for newly stored versions.
    pub checksum: ChecksumAlgorithm,
    /// Take a lock file per article while writing, so that several
    /// processes can share one storage root.
    pub lock_files: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            data_root: PathBuf::from("data"),
            checksum: ChecksumAlgorithm::default(),
            lock_files: true,
        }
    }
}

impl Config {
    /// Load configuration and resolve relative roots against the current
    /// directory.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().or_raise(|| ErrorKind::Load)?;
        Ok(Self::from_figment(&Self::figment(file)?)?.resolve_relative(&cwd))
    }

    /// All providers, merged in priority order.
    ///
    /// An explicit `file` must exist; the default file is optional.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        let figment = match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                merge_file(figment, path)?
            },
            None => match default_file().filter(|path| path.is_file()) {
                Some(path) => merge_file(figment, &path)?,
                None => figment,
            },
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.storage_root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("storage_root must not be empty".to_string()));
        }
        if self.data_root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("data_root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Make relative roots absolute by joining them onto `base`.
    pub fn resolve_relative(mut self, base: &Path) -> Self {
        if self.storage_root.is_relative() {
            self.storage_root = base.join(&self.storage_root);
        }
        if self.data_root.is_relative() {
            self.data_root = base.join(&self.data_root);
        }
        self
    }

    /// Build the article store this configuration describes.
    pub fn open_store(&self) -> quire_storage::error::Result<ArticleStore> {
        Ok(ArticleStore::new(&self.storage_root, &self.data_root)?
            .with_checksum(self.checksum)
            .with_lock_files(self.lock_files))
    }
}

/// `config.toml` in the platform configuration directory, e.g.
/// `~/.config/quire/config.toml` on Linux.
pub fn default_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "quire").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    tracing::debug!(path = %path.display(), "Loading configuration file");
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::Invalid(format!(
            "unsupported configuration file format: {}",
            path.display()
        ))),
    })
}
