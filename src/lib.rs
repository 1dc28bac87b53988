// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content-addressed artifact tracking.
//!
//! Datapin keeps large data files out of a revision control system while
//! still versioning them alongside code. Each tracked file is hashed, its
//! bytes go into a content store keyed by digest, and a small pointer file
//! takes its place in the repository.
//!
//! # Pieces
//!
//! - [`digest`] computes content digests.
//! - [`store`] keeps blobs keyed by digest, verifying them on the way in and
//!   out.
//! - [`pointer`] encodes and decodes pointer files.
//! - [`tracker`] adds working files, checks them back out, and reports their
//!   status.
//! - [`remote`] and [`sync`] move blobs between a local store and a remote
//!   one.
//! - [`config`] and [`path`] locate and describe a project.
//!
//! # Rollback
//!
//! Rolling a data file back to an older version is done by asking the
//! revision control system for an older pointer file, fetching its blob if
//! needed, then checking it out. The store holds every version ever added,
//! so nothing else is required.

pub mod config;
pub mod digest;
pub mod path;
pub mod pointer;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tracker;

pub use config::Config;
pub use digest::{hash_bytes, hash_file, Digest};
pub use pointer::PointerFile;
pub use remote::RemoteStore;
pub use store::{ContentStore, FsStore};
pub use tracker::{Status, Tracker};
