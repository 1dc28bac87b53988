// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that datapin uses to simplify
//! the process of serialization and deserialization. Configuration is always
//! passed around as an explicit [`Config`] value, never as process-wide state,
//! so several stores and remotes can be used side by side in one process.
//!
//! # Sources
//!
//! Two files are consulted, both optional:
//!
//! 1. User configuration at `$XDG_CONFIG_HOME/datapin/config.toml`.
//! 2. Project configuration at `<project>/.datapin/config.toml`.
//!
//! Project values take precedence over user values. Remotes are merged by
//! name, so a user can keep shared remotes in one place and a project can
//! still override any of them.
//!
//! # General Layout
//!
//! ```toml
//! [core]
//! store = ".datapin/cache"
//! remote = "origin"
//! jobs = 4
//! autoignore = true
//!
//! [remote.origin]
//! url = "/mnt/shared/datapin"
//! ```

use crate::path::{user_config_path, DATAPIN_DIR};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Name of configuration file inside metadata directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Default store location relative to project root.
pub const DEFAULT_STORE_DIR: &str = ".datapin/cache";

/// Default number of parallel transfers.
pub const DEFAULT_JOBS: usize = 4;

/// Datapin configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Core settings.
    #[serde(default)]
    pub core: CoreSettings,

    /// Remote stores by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote: BTreeMap<String, RemoteSettings>,
}

impl Config {
    /// Load merged user and project configuration, shell expanded.
    ///
    /// Missing files are treated as empty configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if an existing file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if a file cannot be parsed.
    /// - Return [`ConfigError::ShellExpansion`] if a value cannot be expanded.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self> {
        let user = match user_config_path() {
            Ok(path) => Self::load_file(path)?,
            Err(err) => {
                debug!("skip user configuration: {err}");
                None
            }
        };
        let project = Self::load_file(Self::project_path(project_root))?;

        let merged = match (user, project) {
            (Some(user), Some(project)) => user.merge(project),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => Self::default(),
        };

        merged.expand()
    }

    /// Load configuration from a single file if it exists.
    ///
    /// Values are kept exactly as written, so the result can be saved back
    /// without baking in machine specific paths.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file cannot be parsed.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ConfigError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })
            }
        };

        debug!("load configuration from {:?}", path.display());
        Ok(Some(data.parse()?))
    }

    /// Write configuration to project configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if serialization fails.
    /// - Return [`ConfigError::Write`] if file cannot be written.
    pub fn save(&self, project_root: impl AsRef<Path>) -> Result<()> {
        let path = Self::project_path(project_root);
        let data = toml::ser::to_string_pretty(self)?;
        fs::write(&path, data).map_err(|err| ConfigError::Write { source: err, path })
    }

    /// Perform shell expansion on every path-like field.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a value cannot be expanded.
    pub fn expand(mut self) -> Result<Self> {
        if let Some(store) = &self.core.store {
            self.core.store = Some(PathBuf::from(expand(store.to_string_lossy().as_ref())?));
        }
        for settings in self.remote.values_mut() {
            settings.url = expand(&settings.url)?;
        }

        Ok(self)
    }

    /// Path to project configuration file.
    pub fn project_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(DATAPIN_DIR).join(CONFIG_FILE)
    }

    /// Merge other configuration on top of this one.
    ///
    /// Values set in `other` win. Remotes are merged by name.
    pub fn merge(mut self, other: Self) -> Self {
        self.core = CoreSettings {
            store: other.core.store.or(self.core.store),
            remote: other.core.remote.or(self.core.remote),
            jobs: other.core.jobs.or(self.core.jobs),
            autoignore: other.core.autoignore.or(self.core.autoignore),
        };
        self.remote.extend(other.remote);
        self
    }

    /// Absolute path to local content store for project.
    pub fn store_dir(&self, project_root: impl AsRef<Path>) -> PathBuf {
        let store = self
            .core
            .store
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
        project_root.as_ref().join(store)
    }

    /// Number of parallel transfers to use, at least one.
    pub fn jobs(&self) -> usize {
        self.core.jobs.unwrap_or(DEFAULT_JOBS).max(1)
    }

    /// Check if tracked files should be added to gitignore files.
    pub fn autoignore(&self) -> bool {
        self.core.autoignore.unwrap_or(true)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(toml::de::from_str(data)?)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(data: &str) -> Result<String> {
    Ok(shellexpand::full(data)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// Core settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoreSettings {
    /// Local content store directory, relative to project root unless absolute.
    pub store: Option<PathBuf>,

    /// Name of default remote.
    pub remote: Option<String>,

    /// Number of parallel transfers during push and fetch.
    pub jobs: Option<usize>,

    /// Add tracked files to sibling gitignore files.
    pub autoignore: Option<bool>,
}

/// Remote store settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSettings {
    /// Location of remote store.
    pub url: String,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration file cannot be read from.
    #[error("failed to read configuration at {:?}", .path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration file cannot be written to.
    #[error("failed to write configuration at {:?}", .path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
