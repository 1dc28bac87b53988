// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content store management.
//!
//! A __content store__ maps a [`Digest`] to an immutable blob. Blobs are
//! written once and never mutated, so writing the same digest twice is
//! harmless. Writing _different_ bytes under an existing digest means either
//! the hasher or the store is broken, and that is treated as an integrity
//! violation rather than silently overwritten.
//!
//! # Store Layout
//!
//! [`FsStore`] keeps each blob in a directory tree keyed by its digest. The
//! first two hex characters of the digest name a shard directory, and the
//! remaining 62 characters name the blob file inside it. So, blob
//! `af1349b9...3262` lives at `<root>/af/1349b9...3262`. In-flight writes are
//! staged in `<root>/tmp` on the same file system, and then moved into place
//! without clobbering whatever another writer may have finished first.
//!
//! The layout is internal to datapin, and makes no attempt to be compatible
//! with any other tool.

use crate::digest::{hash_bytes, Digest, DIGEST_HEX_LEN};

use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tempfile::NamedTempFile;
use tracing::{debug, error, instrument};

/// Key-value store from digest to immutable blob.
///
/// Implementations must tolerate concurrent use by multiple trackers. Making
/// [`ContentStore::put`] idempotent is what allows identical concurrent
/// writes to proceed without any coordination.
pub trait ContentStore: Send + Sync {
    /// Store blob under its digest.
    ///
    /// Writing the same bytes twice is a no-op.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::IntegrityViolation`] if `bytes` do not hash to
    ///   `digest`, or differ from the blob already stored under `digest`.
    fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<()>;

    /// Fetch blob stored under digest.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if no blob exists for `digest`.
    fn get(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Check if blob exists for digest.
    fn has(&self, digest: &Digest) -> bool;

    /// List digests of all stored blobs in no particular order.
    fn list(&self) -> Result<Vec<Digest>>;
}

/// Content store backed by a directory tree.
///
/// Clones share the same poison flag, so an integrity violation seen through
/// one handle halts writes through all of them.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
    poisoned: Arc<AtomicBool>,
}

impl FsStore {
    /// Construct store rooted at target directory.
    ///
    /// Nothing is created on disk until the first blob is written.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Path to root directory of store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if store refuses further writes.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Path that blob with given digest occupies.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (shard, rest) = hex.split_at(2);
        self.root.join(shard).join(rest)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn violation(&self, digest: &Digest, reason: impl Into<String>) -> StoreError {
        let reason = reason.into();
        error!("integrity violation on {digest} in {:?}: {reason}", self.root.display());
        self.poisoned.store(true, Ordering::SeqCst);
        StoreError::IntegrityViolation {
            digest: *digest,
            reason,
        }
    }

    fn compare_existing(&self, digest: &Digest, path: &Path, bytes: &[u8]) -> Result<()> {
        let existing = fs::read(path).map_err(|err| StoreError::Io {
            source: err,
            path: path.to_path_buf(),
        })?;

        if existing != bytes {
            return Err(self.violation(digest, "stored blob differs from incoming bytes"));
        }

        debug!("blob {digest} already stored");
        Ok(())
    }
}

impl ContentStore for FsStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), level = "debug")]
    fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<()> {
        if self.is_poisoned() {
            return Err(StoreError::Poisoned {
                root: self.root.clone(),
            });
        }

        let computed = hash_bytes(bytes);
        if &computed != digest {
            return Err(self.violation(digest, format!("incoming bytes hash to {computed}")));
        }

        let path = self.blob_path(digest);
        if path.is_file() {
            return self.compare_existing(digest, &path, bytes);
        }

        let shard = path.parent().unwrap_or(&self.root).to_path_buf();
        let tmp_dir = self.tmp_dir();
        for dir in [&shard, &tmp_dir] {
            fs::create_dir_all(dir).map_err(|err| StoreError::Io {
                source: err,
                path: dir.clone(),
            })?;
        }

        let io_err = |source| StoreError::Io {
            source,
            path: path.clone(),
        };

        // INVARIANT: Blob must be durable before it becomes visible.
        //   - Stage in tmp, fsync, then move into place.
        //   - Never clobber, another writer may have beaten us to it.
        let mut staged = NamedTempFile::new_in(&tmp_dir).map_err(io_err)?;
        staged.write_all(bytes).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;

        match staged.persist_noclobber(&path) {
            Ok(_) => {
                sync_dir(&shard).map_err(io_err)?;
                debug!("stored blob {digest} at {:?}", path.display());
                Ok(())
            }
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                self.compare_existing(digest, &path, bytes)
            }
            Err(err) => Err(io_err(err.error)),
        }
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound { digest: *digest },
            _ => StoreError::Io {
                source: err,
                path: path.clone(),
            },
        })?;

        // INVARIANT: Never hand out bytes that do not match their address.
        let computed = hash_bytes(&bytes);
        if &computed != digest {
            return Err(self.violation(digest, format!("stored blob hashes to {computed}")));
        }

        Ok(bytes)
    }

    fn has(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    fn list(&self) -> Result<Vec<Digest>> {
        let mut digests = Vec::new();
        let shards = match fs::read_dir(&self.root) {
            Ok(shards) => shards,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(digests),
            Err(err) => {
                return Err(StoreError::Io {
                    source: err,
                    path: self.root.clone(),
                })
            }
        };

        for shard in shards {
            let shard = shard.map_err(|err| StoreError::Io {
                source: err,
                path: self.root.clone(),
            })?;
            let shard_name = shard.file_name().to_string_lossy().into_owned();

            // INVARIANT: Skip tmp and anything else that is not a shard.
            if shard_name.len() != 2 || !shard.path().is_dir() {
                continue;
            }

            let entries = fs::read_dir(shard.path()).map_err(|err| StoreError::Io {
                source: err,
                path: shard.path(),
            })?;
            for entry in entries {
                let entry = entry.map_err(|err| StoreError::Io {
                    source: err,
                    path: shard.path(),
                })?;
                let name = format!("{shard_name}{}", entry.file_name().to_string_lossy());
                if name.len() != DIGEST_HEX_LEN {
                    continue;
                }

                if let Ok(digest) = name.parse::<Digest>() {
                    digests.push(digest);
                }
            }
        }

        Ok(digests)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Content store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No blob stored under digest.
    #[error("blob {digest} not found in store")]
    NotFound { digest: Digest },

    /// Blob bytes do not agree with their digest.
    #[error("integrity violation for blob {digest}: {reason}")]
    IntegrityViolation { digest: Digest, reason: String },

    /// Store saw an integrity violation earlier and refuses to write.
    #[error("store at {:?} is halted after an integrity violation", .root.display())]
    Poisoned { root: PathBuf },

    /// File system operation on store failed.
    #[error("store I/O failed at {:?}", .path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{collections::BTreeSet, thread};
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().join("cache"));
        (dir, store)
    }

    #[test]
    fn put_then_get_returns_same_bytes() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"hello world");

        store.put(&digest, b"hello world")?;
        assert!(store.has(&digest));
        assert_eq!(store.get(&digest)?, b"hello world");

        Ok(())
    }

    #[test]
    fn put_uses_sharded_layout() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"sharded");
        store.put(&digest, b"sharded")?;

        let hex = digest.to_hex();
        let expect = store.root().join(&hex[..2]).join(&hex[2..]);
        assert_eq!(store.blob_path(&digest), expect);
        assert!(expect.is_file());

        Ok(())
    }

    #[test]
    fn put_is_idempotent() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"twice");

        store.put(&digest, b"twice")?;
        store.put(&digest, b"twice")?;
        assert_eq!(store.list()?, vec![digest]);

        Ok(())
    }

    #[test]
    fn put_rejects_bytes_that_do_not_match_digest() {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"original");

        let result = store.put(&digest, b"impostor");
        assert!(matches!(result, Err(StoreError::IntegrityViolation { .. })));
        assert!(!store.has(&digest));
    }

    #[test]
    fn put_rejects_different_bytes_for_existing_blob() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"original");
        store.put(&digest, b"original")?;

        // Simulate a broken blob already sitting under the digest.
        fs::write(store.blob_path(&digest), b"tampered")?;
        let result = store.put(&digest, b"original");
        assert!(matches!(result, Err(StoreError::IntegrityViolation { .. })));

        Ok(())
    }

    #[test]
    fn integrity_violation_poisons_every_clone() {
        let (_dir, store) = setup_store();
        let other = store.clone();
        let _ = store.put(&hash_bytes(b"a"), b"b");

        assert!(other.is_poisoned());
        let result = other.put(&hash_bytes(b"c"), b"c");
        assert!(matches!(result, Err(StoreError::Poisoned { .. })));
    }

    #[test]
    fn get_missing_blob_is_not_found() {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"absent");

        assert!(!store.has(&digest));
        assert!(matches!(store.get(&digest), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn get_detects_corrupt_blob_on_disk() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"fragile");
        store.put(&digest, b"fragile")?;
        fs::write(store.blob_path(&digest), b"bit rot")?;

        assert!(matches!(
            store.get(&digest),
            Err(StoreError::IntegrityViolation { .. })
        ));

        Ok(())
    }

    #[test]
    fn empty_blob_round_trips() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let digest = hash_bytes(b"");
        store.put(&digest, b"")?;
        assert_eq!(store.get(&digest)?, Vec::<u8>::new());

        Ok(())
    }

    #[test]
    fn list_skips_junk_and_temp_files() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let first = hash_bytes(b"blob 1");
        let second = hash_bytes(b"blob 2");
        store.put(&first, b"blob 1")?;
        store.put(&second, b"blob 2")?;

        fs::write(store.root().join("tmp").join(".orphan"), b"junk")?;
        fs::create_dir_all(store.root().join("zz"))?;
        fs::write(store.root().join("zz").join("short"), b"junk")?;

        let result = store.list()?.into_iter().collect::<BTreeSet<_>>();
        let expect = BTreeSet::from([first, second]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn list_on_missing_root_is_empty() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        assert!(store.list()?.is_empty());

        Ok(())
    }

    #[test]
    fn concurrent_identical_puts_agree() -> anyhow::Result<()> {
        let (_dir, store) = setup_store();
        let content = b"concurrent content".to_vec();
        let digest = hash_bytes(&content);

        let handles = (0..8)
            .map(|_| {
                let store = store.clone();
                let content = content.clone();
                thread::spawn(move || store.put(&digest, &content))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("writer thread panicked")?;
        }

        assert_eq!(store.list()?, vec![digest]);
        assert_eq!(store.get(&digest)?, content);

        Ok(())
    }
}
