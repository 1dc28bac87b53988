// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote store adapter.
//!
//! A __remote__ is just another content store that lives somewhere the
//! tracker can reach through a transport. Push and fetch reconcile the local
//! store against a remote by digest, never by path.
//!
//! # Transports
//!
//! Only file system transport is supported right now. A remote URL may be:
//!
//! - `file:///abs/path` for an explicit file URL.
//! - `/abs/path` for a plain absolute path.
//! - `rel/path` for a path relative to the project root.
//!
//! Anything carrying another scheme, e.g., `s3://bucket` or `ssh://host`, is
//! rejected. Transport timeouts, if any ever show up, belong here and not in
//! the tracker.

use crate::{
    config::{Config, RemoteSettings},
    digest::Digest,
    store::{self, ContentStore, FsStore},
};

use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// How a remote store is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Directory on a reachable file system.
    Local(PathBuf),
}

impl Transport {
    /// Parse transport from remote URL.
    ///
    /// Relative paths are resolved against `project_root`.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::UnsupportedTransport`] if URL names a scheme
    ///   other than `file`.
    pub fn parse(url: &str, project_root: impl AsRef<Path>) -> Result<Self> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if let Some((scheme, _)) = url.split_once("://") {
            return Err(RemoteError::UnsupportedTransport {
                scheme: scheme.into(),
            });
        }

        Ok(Self::Local(project_root.as_ref().join(url)))
    }
}

/// Content store reachable through a transport.
#[derive(Debug, Clone)]
pub struct RemoteStore<S = FsStore>
where
    S: ContentStore,
{
    name: String,
    inner: S,
}

impl RemoteStore<FsStore> {
    /// Open remote store from its settings.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::UnsupportedTransport`] if remote URL cannot
    ///   be reached.
    pub fn open(
        name: impl Into<String>,
        settings: &RemoteSettings,
        project_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let name = name.into();
        let Transport::Local(root) = Transport::parse(&settings.url, project_root)?;
        debug!("open remote {name:?} at {:?}", root.display());

        Ok(Self::new(name, FsStore::new(root)))
    }

    /// Open remote by name, or the configured default remote.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::NoDefault`] if no name is given and no default
    ///   remote is configured.
    /// - Return [`RemoteError::UnknownRemote`] if remote is not configured.
    /// - Return [`RemoteError::UnsupportedTransport`] if remote URL cannot
    ///   be reached.
    pub fn from_config(
        config: &Config,
        name: Option<&str>,
        project_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let name = name
            .or(config.core.remote.as_deref())
            .ok_or(RemoteError::NoDefault)?;
        let settings = config
            .remote
            .get(name)
            .ok_or_else(|| RemoteError::UnknownRemote { name: name.into() })?;

        Self::open(name, settings, project_root)
    }
}

impl<S> RemoteStore<S>
where
    S: ContentStore,
{
    /// Wrap existing store as a named remote.
    pub fn new(name: impl Into<String>, inner: S) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Name of remote.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> ContentStore for RemoteStore<S>
where
    S: ContentStore,
{
    #[instrument(skip(self, bytes), fields(remote = %self.name), level = "debug")]
    fn put(&self, digest: &Digest, bytes: &[u8]) -> store::Result<()> {
        self.inner.put(digest, bytes)
    }

    #[instrument(skip(self), fields(remote = %self.name), level = "debug")]
    fn get(&self, digest: &Digest) -> store::Result<Vec<u8>> {
        self.inner.get(digest)
    }

    fn has(&self, digest: &Digest) -> bool {
        self.inner.has(digest)
    }

    fn list(&self) -> store::Result<Vec<Digest>> {
        self.inner.list()
    }
}

/// Remote store error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Remote URL names a transport that cannot be used.
    #[error("unsupported transport {scheme:?} for remote")]
    UnsupportedTransport { scheme: String },

    /// Remote is not configured.
    #[error("remote {name:?} is not configured")]
    UnknownRemote { name: String },

    /// No remote given, and no default remote configured.
    #[error("no remote given and no default remote configured")]
    NoDefault,
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
