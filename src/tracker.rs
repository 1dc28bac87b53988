// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Artifact tracking.
//!
//! The __tracker__ ties a project's working tree to a local content store.
//! Adding a working file hashes it, stores its bytes as a blob, and writes a
//! pointer file next to it. Checking out a pointer materializes the blob back
//! at its working path. The pointer files are what the external revision
//! control system commits; the tracker never touches commit history itself.
//!
//! # Tracked Path Lifecycle
//!
//! ```text
//! Untracked --add--> Tracked(D1) --add (after edit)--> Tracked(D2)
//! Tracked(D) --checkout--> Materialized(D) --edit--> Modified
//! ```
//!
//! Nothing is terminal, a path may cycle through these states forever.
//! Divergence from a pointer is only ever detected by [`Tracker::status`],
//! never corrected automatically.
//!
//! # Concurrency
//!
//! Two concurrent adds on the same working path race, and the last pointer
//! written wins. Ordering pointer updates is left to the revision control
//! system. Store access itself is safe to share between trackers.

use crate::{
    config::Config,
    digest::{hash_bytes, hash_file, Digest, HashError},
    path::DATAPIN_DIR,
    pointer::{is_pointer_path, pointer_path_for, PointerError, PointerFile},
    store::{ContentStore, FsStore, StoreError},
    sync::{self, TransferFailure},
};

use ignore::WalkBuilder;
use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// State of a working path relative to its pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Working file matches pointer.
    Clean,

    /// Working file diverged from pointer.
    Modified,

    /// Working file does not exist.
    Missing,
}

/// Tracker of working files in a project.
#[derive(Debug)]
pub struct Tracker<S = FsStore>
where
    S: ContentStore,
{
    root: PathBuf,
    store: S,
    store_dir: Option<PathBuf>,
    jobs: usize,
    autoignore: bool,
}

impl Tracker<FsStore> {
    /// Open tracker for project using its configuration.
    ///
    /// Local store is placed wherever the configuration says.
    pub fn open(root: impl Into<PathBuf>, config: &Config) -> Self {
        let root = root.into();
        let store_dir = config.store_dir(&root);
        let mut tracker = Self::new(root, FsStore::new(&store_dir));
        tracker.store_dir = Some(store_dir);
        tracker.jobs = config.jobs();
        tracker.autoignore = config.autoignore();
        tracker
    }
}

impl<S> Tracker<S>
where
    S: ContentStore,
{
    /// Construct new tracker over project root and local store.
    pub fn new(root: impl Into<PathBuf>, store: S) -> Self {
        Self {
            root: root.into(),
            store,
            store_dir: None,
            jobs: crate::config::DEFAULT_JOBS,
            autoignore: true,
        }
    }

    /// Set whether tracked files are added to sibling gitignore files.
    pub fn with_autoignore(mut self, autoignore: bool) -> Self {
        self.autoignore = autoignore;
        self
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local content store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Track working file.
    ///
    /// Hashes the working file, stores it in the local store, and writes its
    /// pointer file next to it. Calling this again on an unchanged file
    /// yields the same pointer without writing to the store again.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::FileNotFound`] if working file is absent.
    /// - Return [`TrackerError::NotAFile`] if working path is not a file.
    /// - Return [`TrackerError::OutsideProject`] if working path is not
    ///   inside project root.
    /// - Return [`TrackerError::ReadError`] if working file cannot be read.
    /// - Return [`TrackerError::Store`] if blob cannot be stored.
    /// - Return [`TrackerError::Pointer`] if pointer file cannot be written.
    #[instrument(skip(self, working_path), fields(path = ?working_path.as_ref()), level = "debug")]
    pub fn add(&self, working_path: impl AsRef<Path>) -> Result<PointerFile> {
        let relative = self.relative(working_path.as_ref())?;
        let absolute = self.root.join(&relative);

        let bytes = match fs::read(&absolute) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(TrackerError::FileNotFound { path: absolute })
            }
            Err(_) if absolute.is_dir() => return Err(TrackerError::NotAFile { path: absolute }),
            Err(err) => {
                return Err(TrackerError::ReadError(HashError::Read {
                    source: err,
                    path: absolute,
                }))
            }
        };

        let digest = hash_bytes(&bytes);
        if self.store.has(&digest) {
            debug!("blob {digest} already stored");
        } else {
            self.store.put(&digest, &bytes)?;
        }

        let pointer_path = self.root.join(pointer_path_for(&relative));
        let mut pointer = PointerFile::new(&relative, digest, bytes.len() as u64);

        // INVARIANT: Keep user metadata across re-adds of the same path.
        match PointerFile::load(&pointer_path) {
            Ok(previous) => pointer.meta = previous.meta,
            Err(PointerError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("replace unreadable pointer {:?}: {err}", pointer_path.display()),
        }

        pointer.save(&pointer_path)?;
        if self.autoignore {
            self.ignore_working_file(&relative)?;
        }

        info!("track {:?} as {digest}", relative.display());
        Ok(pointer)
    }

    /// Materialize blob of pointer at its working path.
    ///
    /// Any existing content at the working path is replaced. The written file
    /// is re-hashed to make sure it matches the pointer.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::BlobMissing`] if blob is not in local store.
    ///   Fetch it first.
    /// - Return [`TrackerError::CorruptWrite`] if written file does not hash
    ///   to pointer digest.
    /// - Return [`TrackerError::Store`] if blob cannot be read.
    /// - Return [`TrackerError::Io`] if working file cannot be written.
    #[instrument(skip(self, pointer), fields(path = ?pointer.path), level = "debug")]
    pub fn checkout(&self, pointer: &PointerFile) -> Result<()> {
        if !self.store.has(&pointer.digest) {
            return Err(TrackerError::BlobMissing {
                digest: pointer.digest,
            });
        }

        let relative = self.relative(&pointer.path)?;
        if self.status(&relative, pointer)? == Status::Clean {
            debug!("{:?} already matches {}", relative.display(), pointer.digest);
            return Ok(());
        }

        let bytes = self.store.get(&pointer.digest)?;
        let absolute = self.root.join(&relative);
        let parent = absolute.parent().unwrap_or(&self.root).to_path_buf();
        let io_err = |source| TrackerError::Io {
            source,
            path: absolute.clone(),
        };

        // INVARIANT: Replace working file in one step.
        //   - Readers see either the old file or the complete new one.
        fs::create_dir_all(&parent).map_err(io_err)?;
        let mut staged = NamedTempFile::new_in(&parent).map_err(io_err)?;
        staged.write_all(&bytes).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist(&absolute).map_err(|err| io_err(err.error))?;

        let written = hash_file(&absolute)?;
        if written != pointer.digest {
            return Err(TrackerError::CorruptWrite {
                path: absolute,
                expected: pointer.digest,
                actual: written,
            });
        }

        info!("checkout {:?} at {}", relative.display(), pointer.digest);
        Ok(())
    }

    /// Compare working file against pointer.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::ReadError`] if working file exists but
    ///   cannot be read.
    /// - Return [`TrackerError::OutsideProject`] if working path is not
    ///   inside project root.
    pub fn status(&self, working_path: impl AsRef<Path>, pointer: &PointerFile) -> Result<Status> {
        let absolute = self.root.join(self.relative(working_path.as_ref())?);
        match hash_file(&absolute) {
            Ok(digest) if digest == pointer.digest => Ok(Status::Clean),
            Ok(_) => Ok(Status::Modified),
            Err(HashError::NotFound { .. }) => Ok(Status::Missing),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy blobs referenced by pointers to remote store.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Transfer`] if any digest fails to transfer.
    pub fn push<R>(&self, pointers: &[PointerFile], remote: &R) -> Result<BTreeSet<Digest>>
    where
        R: ContentStore + ?Sized,
    {
        self.in_pool(|| sync::push(pointers, &self.store, remote))
    }

    /// Copy blobs referenced by pointers from remote store.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Transfer`] if any digest fails to transfer.
    pub fn fetch<R>(&self, pointers: &[PointerFile], remote: &R) -> Result<BTreeSet<Digest>>
    where
        R: ContentStore + ?Sized,
    {
        self.in_pool(|| sync::fetch(pointers, &self.store, remote))
    }

    /// Fetch every blob referenced by pointers, then check them all out.
    ///
    /// Every pointer whose blob is available gets checked out, even when
    /// others are lost. Pointers whose blob exists in neither store are
    /// reported together at the end. Nothing recovers them.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Transfer`] if any digest fails to transfer
    ///   for a reason other than being absent from the remote.
    /// - Return [`TrackerError::BlobsMissing`] if some blobs exist in neither
    ///   store.
    /// - Return any other error [`Tracker::checkout`] can return.
    pub fn pull<R>(&self, pointers: &[PointerFile], remote: &R) -> Result<BTreeSet<Digest>>
    where
        R: ContentStore + ?Sized,
    {
        let fetched = match self.fetch(pointers, remote) {
            Ok(fetched) => fetched,
            Err(TrackerError::Transfer(failure)) => {
                // INVARIANT: Report lost blobs through checkout, not transfer.
                let lost = failure
                    .failed
                    .iter()
                    .all(|(_, err)| matches!(err, StoreError::NotFound { .. }));
                if !lost {
                    return Err(TrackerError::Transfer(failure));
                }
                failure.completed
            }
            Err(err) => return Err(err),
        };

        let mut missing = BTreeSet::new();
        for pointer in pointers {
            match self.checkout(pointer) {
                Ok(()) => {}
                Err(TrackerError::BlobMissing { digest }) => {
                    warn!("blob {digest} for {:?} is lost", pointer.path.display());
                    missing.insert(digest);
                }
                Err(err) => return Err(err),
            }
        }

        if !missing.is_empty() {
            return Err(TrackerError::BlobsMissing { digests: missing });
        }

        Ok(fetched)
    }

    /// Discover all pointer files in project.
    ///
    /// The `.datapin` and `.git` directories, and the local store, are
    /// skipped. Other hidden files and directories are searched like any
    /// other. Results are sorted by working path.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Walk`] if project tree cannot be walked.
    /// - Return [`TrackerError::Pointer`] if a pointer file is malformed.
    pub fn pointers(&self) -> Result<Vec<PointerFile>> {
        let mut pointers = Vec::new();
        let store_dir = self.store_dir.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_exclude(false)
            .git_global(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
                let metadata = entry.depth() > 0
                    && (entry.file_name() == DATAPIN_DIR || entry.file_name() == ".git");
                let store = store_dir.as_deref() == Some(entry.path());
                !(is_dir && (metadata || store))
            })
            .build();

        for entry in walker {
            let entry = entry?;
            let is_file = entry.file_type().is_some_and(|kind| kind.is_file());
            if is_file && is_pointer_path(entry.path()) {
                pointers.push(PointerFile::load(entry.path())?);
            }
        }

        pointers.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(pointers)
    }

    fn in_pool<F>(&self, transfer: F) -> Result<BTreeSet<Digest>>
    where
        F: FnOnce() -> sync::Result<BTreeSet<Digest>> + Send,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()?;
        Ok(pool.install(transfer)?)
    }

    fn relative(&self, working_path: &Path) -> Result<PathBuf> {
        let outside = || TrackerError::OutsideProject {
            path: working_path.to_path_buf(),
        };

        let relative = if working_path.is_absolute() {
            let root = normalize(&self.root).unwrap_or_else(|| self.root.clone());
            normalize(working_path)
                .ok_or_else(outside)?
                .strip_prefix(&root)
                .map_err(|_| outside())?
                .to_path_buf()
        } else {
            normalize(working_path).ok_or_else(outside)?
        };

        // INVARIANT: Working path must name something below root, not root.
        if relative.as_os_str().is_empty() {
            return Err(outside());
        }

        Ok(relative)
    }

    fn ignore_working_file(&self, relative: &Path) -> Result<()> {
        let Some(name) = relative.file_name() else {
            return Ok(());
        };
        let parent = self.root.join(relative.parent().unwrap_or(Path::new("")));
        let gitignore = parent.join(".gitignore");
        let rule = format!("/{}", escape_gitignore(&name.to_string_lossy()));
        let io_err = |source| TrackerError::Io {
            source,
            path: gitignore.clone(),
        };

        let current = match fs::read_to_string(&gitignore) {
            Ok(current) => current,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_err(err)),
        };
        if current.lines().any(|line| line.trim_end_matches('\r') == rule) {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&gitignore)
            .map_err(io_err)?;
        if !current.is_empty() && !current.ends_with('\n') {
            file.write_all(b"\n").map_err(io_err)?;
        }
        file.write_all(format!("{rule}\n").as_bytes())
            .map_err(io_err)?;

        debug!("ignore {rule:?} in {:?}", gitignore.display());
        Ok(())
    }
}

/// Resolve `.` and `..` lexically.
///
/// Returns `None` if the path climbs above where it starts.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normal = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normal.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1)?;
                normal.pop();
            }
            Component::Normal(name) => {
                depth += 1;
                normal.push(name);
            }
        }
    }

    Some(normal)
}

/// Escape file name so gitignore matches it literally.
fn escape_gitignore(name: &str) -> String {
    let trailing = name.len() - name.trim_end_matches(' ').len();
    let (body, spaces) = name.split_at(name.len() - trailing);

    let mut escaped = String::with_capacity(name.len() + trailing);
    for ch in body.chars() {
        if matches!(ch, '[' | ']' | '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    for _ in spaces.chars() {
        escaped.push_str("\\ ");
    }

    escaped
}

/// Tracker error types.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Working file to add does not exist.
    #[error("no file to track at {:?}", .path.display())]
    FileNotFound { path: PathBuf },

    /// Working path names something other than a regular file.
    #[error("{:?} is not a regular file", .path.display())]
    NotAFile { path: PathBuf },

    /// Working path is not inside project root.
    #[error("{:?} is outside of project root", .path.display())]
    OutsideProject { path: PathBuf },

    /// Working file cannot be read for hashing.
    #[error(transparent)]
    ReadError(#[from] HashError),

    /// Blob is not in local store. Fetch it first.
    #[error("blob {digest} missing from local store, fetch it first")]
    BlobMissing { digest: Digest },

    /// Some blobs exist in neither local nor remote store.
    #[error("{} blobs missing from both local and remote store", .digests.len())]
    BlobsMissing { digests: BTreeSet<Digest> },

    /// Materialized working file does not match its pointer.
    #[error("wrote {:?} but it hashes to {actual} instead of {expected}", .path.display())]
    CorruptWrite {
        path: PathBuf,
        expected: Digest,
        actual: Digest,
    },

    /// Some blobs failed to transfer.
    #[error(transparent)]
    Transfer(#[from] TransferFailure),

    /// Content store operation fails.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Pointer file handling fails.
    #[error(transparent)]
    Pointer(#[from] PointerError),

    /// Project tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Transfer thread pool cannot be built.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Working tree file operation fails.
    #[error("I/O failed at {:?}", .path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
