// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pointer file layout.
//!
//! A __pointer file__ is the small text record that stands in for a large
//! tracked file inside the external revision control system. It maps a
//! working path to the digest and size of the blob that belongs there. The
//! blob itself lives in a content store; only the pointer gets committed.
//!
//! # General Layout
//!
//! Pointer files are TOML with a fixed field order, one field per line, so
//! that line based history in the revision control system stays readable:
//!
//! ```toml
//! path = "data/customer.csv"
//! algorithm = "blake3"
//! digest = "<64 lowercase hex characters>"
//! size = 25514
//!
//! [meta]
//! owner = "analytics"
//! ```
//!
//! The `[meta]` table is optional free form metadata, and is left out
//! entirely when empty. The pointer for `data/customer.csv` is stored right
//! next to it as `data/customer.csv.ptr`.

use crate::digest::{Algorithm, Digest};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

/// File extension of pointer files.
pub const POINTER_EXT: &str = "ptr";

/// Record mapping a working path to the blob that belongs there.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PointerFile {
    /// Working path relative to project root.
    pub path: PathBuf,

    /// Algorithm that produced digest.
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Digest of blob content.
    pub digest: Digest,

    /// Size of blob content in bytes.
    pub size: u64,

    /// Optional free form metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl PointerFile {
    /// Construct new pointer without metadata.
    pub fn new(path: impl Into<PathBuf>, digest: Digest, size: u64) -> Self {
        Self {
            path: path.into(),
            algorithm: Algorithm::Blake3,
            digest,
            size,
            meta: BTreeMap::new(),
        }
    }

    /// Serialize pointer into its text form.
    ///
    /// # Errors
    ///
    /// - Return [`PointerError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        toml::ser::to_string(self).map_err(PointerError::Encode)
    }

    /// Parse pointer from its text form.
    ///
    /// # Errors
    ///
    /// - Return [`PointerError::Malformed`] if text is not a valid pointer.
    pub fn decode(text: &str) -> Result<Self> {
        let pointer: PointerFile =
            toml::de::from_str(text).map_err(|err| PointerError::Malformed(err.to_string()))?;

        // INVARIANT: Working path must stay inside project root.
        if pointer.path.as_os_str().is_empty() {
            return Err(PointerError::Malformed("empty working path".into()));
        }
        if !is_contained(&pointer.path) {
            return Err(PointerError::Malformed(format!(
                "working path {:?} escapes project root",
                pointer.path.display()
            )));
        }

        Ok(pointer)
    }

    /// Load pointer from file.
    ///
    /// # Errors
    ///
    /// - Return [`PointerError::Read`] if pointer file cannot be read.
    /// - Return [`PointerError::Malformed`] if contents are not a valid
    ///   pointer.
    pub fn load(pointer_path: impl AsRef<Path>) -> Result<Self> {
        let pointer_path = pointer_path.as_ref();
        let text = fs::read_to_string(pointer_path).map_err(|err| PointerError::Read {
            source: err,
            pointer_path: pointer_path.to_path_buf(),
        })?;

        Self::decode(&text)
    }

    /// Save pointer to file, replacing any previous revision.
    ///
    /// # Errors
    ///
    /// - Return [`PointerError::Encode`] if serialization fails.
    /// - Return [`PointerError::Write`] if pointer file cannot be written.
    pub fn save(&self, pointer_path: impl AsRef<Path>) -> Result<()> {
        let pointer_path = pointer_path.as_ref();
        fs::write(pointer_path, self.encode()?).map_err(|err| PointerError::Write {
            source: err,
            pointer_path: pointer_path.to_path_buf(),
        })
    }
}

impl FromStr for PointerFile {
    type Err = PointerError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::decode(data)
    }
}

impl Display for PointerFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.encode().map_err(|_| FmtError)?.as_str())
    }
}

/// Determine path of pointer file for target working path.
///
/// Appends the pointer extension, so `data/customer.csv` is tracked by
/// `data/customer.csv.ptr`.
pub fn pointer_path_for(working_path: impl AsRef<Path>) -> PathBuf {
    let mut name = working_path.as_ref().as_os_str().to_os_string();
    name.push(".");
    name.push(POINTER_EXT);
    PathBuf::from(name)
}

/// Check if path names a pointer file.
pub fn is_pointer_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext == POINTER_EXT)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Pointer file error types.
#[derive(Debug, thiserror::Error)]
pub enum PointerError {
    /// Pointer text cannot be parsed.
    #[error("malformed pointer: {0}")]
    Malformed(String),

    /// Pointer cannot be serialized.
    #[error(transparent)]
    Encode(#[from] toml::ser::Error),

    /// Pointer file cannot be read from.
    #[error("failed to read pointer file at {:?}", .pointer_path.display())]
    Read {
        #[source]
        source: std::io::Error,
        pointer_path: PathBuf,
    },

    /// Pointer file cannot be written to.
    #[error("failed to write pointer file at {:?}", .pointer_path.display())]
    Write {
        #[source]
        source: std::io::Error,
        pointer_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PointerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::hash_bytes;
    use indoc::{formatdoc, indoc};
    use simple_test_case::test_case;
    use tempfile::TempDir;

    const DIGEST: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    #[test]
    fn encode_pointer_file() -> anyhow::Result<()> {
        let result = PointerFile::new("data/customer.csv", DIGEST.parse()?, 25514).encode()?;
        let expect = formatdoc! {r#"
            path = "data/customer.csv"
            algorithm = "blake3"
            digest = "{digest}"
            size = 25514
        "#, digest = DIGEST};
        pretty_assertions::assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn decode_pointer_file() -> anyhow::Result<()> {
        let result: PointerFile = formatdoc! {r#"
            path = "data/customer.csv"
            algorithm = "blake3"
            digest = "{digest}"
            size = 25514

            [meta]
            owner = "analytics"
        "#, digest = DIGEST}
        .parse()?;

        let mut expect = PointerFile::new("data/customer.csv", DIGEST.parse()?, 25514);
        expect.meta.insert("owner".into(), "analytics".into());
        pretty_assertions::assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn pointer_round_trips_with_metadata() -> anyhow::Result<()> {
        let mut pointer = PointerFile::new("models/weights.bin", hash_bytes(b"w"), 1);
        pointer.meta.insert("stage".into(), "train".into());
        pointer.meta.insert("owner".into(), "ml".into());

        pretty_assertions::assert_eq!(PointerFile::decode(&pointer.encode()?)?, pointer);

        Ok(())
    }

    #[test]
    fn algorithm_defaults_to_blake3() -> anyhow::Result<()> {
        let result = PointerFile::decode(&formatdoc! {r#"
            path = "a.csv"
            digest = "{digest}"
            size = 0
        "#, digest = DIGEST})?;
        pretty_assertions::assert_eq!(result.algorithm, Algorithm::Blake3);

        Ok(())
    }

    #[test_case(indoc! {r#"
        path = "a.csv"
        digest = "deadbeef"
        size = 1
    "#}; "short digest")]
    #[test_case(indoc! {r#"
        path = "a.csv"
        digest = "AF1349B9F5F9A1A6A0404DEA36DCC9499BCB25C9ADC112B7CC9A93CAE41F3262"
        size = 1
    "#}; "uppercase digest")]
    #[test_case(indoc! {r#"
        path = "a.csv"
        algorithm = "md5"
        digest = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        size = 1
    "#}; "unknown algorithm")]
    #[test_case(indoc! {r#"
        path = "a.csv"
        digest = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        size = -4
    "#}; "negative size")]
    #[test_case(indoc! {r#"
        path = "../outside.csv"
        digest = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        size = 1
    "#}; "escaping path")]
    #[test_case(indoc! {r#"
        path = "/etc/passwd"
        digest = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        size = 1
    "#}; "absolute path")]
    #[test_case(indoc! {r#"
        path = "a.csv"
        digest = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        size = 1
        colour = "blue"
    "#}; "unknown field")]
    #[test_case("this is not toml"; "garbage")]
    #[test]
    fn decode_rejects_malformed_pointer(text: &str) {
        assert!(matches!(
            PointerFile::decode(text),
            Err(PointerError::Malformed(_))
        ));
    }

    #[test]
    fn pointer_path_appends_extension() {
        let result = pointer_path_for("data/customer.csv");
        pretty_assertions::assert_eq!(result, PathBuf::from("data/customer.csv.ptr"));
        assert!(is_pointer_path(&result));
        assert!(!is_pointer_path("data/customer.csv"));
    }

    #[test]
    fn save_then_load_pointer_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let pointer = PointerFile::new("customer.csv", hash_bytes(b"rows"), 4);
        let pointer_path = dir.path().join(pointer_path_for(&pointer.path));

        pointer.save(&pointer_path)?;
        pretty_assertions::assert_eq!(PointerFile::load(&pointer_path)?, pointer);

        Ok(())
    }

    #[test]
    fn load_missing_pointer_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = PointerFile::load(dir.path().join("gone.ptr"));
        assert!(matches!(result, Err(PointerError::Read { .. })));
    }
}
