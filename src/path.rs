// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Name of metadata directory that marks a project root.
pub const DATAPIN_DIR: &str = ".datapin";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to user configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/datapin/config.toml`,
/// falling back to `~/.config/datapin/config.toml` on platforms without a
/// config directory. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn user_config_path() -> Result<PathBuf> {
    let config_dir = match dirs::config_dir() {
        Some(path) => path,
        None => home_dir()?.join(".config"),
    };

    Ok(config_dir.join("datapin").join("config.toml"))
}

/// Find project root by walking up from target directory.
///
/// The project root is the closest ancestor (including `start` itself) that
/// contains a `.datapin` directory.
pub fn find_project_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .find(|dir| dir.join(DATAPIN_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
