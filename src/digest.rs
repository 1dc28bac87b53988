// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content hashing.
//!
//! Every blob that datapin manages is addressed by the BLAKE3 digest of its
//! exact bytes. Identical bytes always produce an identical [`Digest`], so the
//! digest doubles as the blob's storage key and as the value recorded inside
//! pointer files.
//!
//! # See Also
//!
//! - [BLAKE3](https://github.com/BLAKE3-team/BLAKE3)

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Length of a digest in raw bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of a digest in its canonical hex form.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

const READ_CHUNK: usize = 64 * 1024;

/// Fixed-size fingerprint of a blob's exact byte content.
///
/// Displayed and serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Construct digest from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Canonical lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Digest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.to_hex())
    }
}

impl Debug for Digest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        if data.len() != DIGEST_HEX_LEN {
            return Err(DigestParseError::Length(data.len()));
        }

        // INVARIANT: Only accept canonical lowercase hex.
        //   - hex::decode happily takes uppercase, which would give one
        //     digest two spellings in version control.
        if let Some(bad) = data.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(DigestParseError::Alphabet(bad));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(data, &mut bytes).map_err(DigestParseError::Hex)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = String::deserialize(deserializer)?;
        data.parse().map_err(de::Error::custom)
    }
}

/// Hashing algorithm recorded in pointer files.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Blake3,
}

/// Hash arbitrary bytes.
#[inline]
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

/// Hash file contents by streaming it in fixed size chunks.
///
/// # Errors
///
/// - Return [`HashError::NotFound`] if there is no file at `path`.
/// - Return [`HashError::Read`] if the file cannot be opened or read.
pub fn hash_file(path: impl AsRef<Path>) -> Result<Digest> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|err| read_error(err, path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|err| read_error(err, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Digest(*hasher.finalize().as_bytes()))
}

fn read_error(err: std::io::Error, path: &Path) -> HashError {
    match err.kind() {
        ErrorKind::NotFound => HashError::NotFound {
            path: path.to_path_buf(),
        },
        _ => HashError::Read {
            source: err,
            path: path.to_path_buf(),
        },
    }
}

/// Digest text could not be parsed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must be 64 hex characters, got {0}")]
    Length(usize),

    #[error("digest contains non lowercase hex character {0:?}")]
    Alphabet(char),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

/// File hashing error types.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Nothing to hash at target path.
    #[error("no file to hash at {:?}", .path.display())]
    NotFound { path: PathBuf },

    /// File exists but reading it failed part way.
    #[error("failed to read {:?} for hashing", .path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = HashError> = std::result::Result<T, E>;
