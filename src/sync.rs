// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Store reconciliation.
//!
//! Push and fetch copy blobs between two content stores. Only digests
//! referenced by the given pointers are considered, and of those only the
//! ones missing from the destination are copied. Each digest is an
//! independent unit of work, so transfers run in parallel and a failure for
//! one digest never undoes the ones that already landed. Re-running a
//! transfer simply picks up whatever is still missing.

use crate::{
    digest::Digest,
    pointer::PointerFile,
    store::{ContentStore, StoreError},
};

use rayon::prelude::*;
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, info, instrument, warn};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local store to remote store.
    Push,

    /// Remote store to local store.
    Fetch,
}

impl Display for Direction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Push => fmt.write_str("push"),
            Self::Fetch => fmt.write_str("fetch"),
        }
    }
}

/// Copy blobs referenced by pointers from local store to remote store.
///
/// Returns the set of digests actually transferred. Digests already present
/// remotely are skipped.
///
/// # Errors
///
/// - Return [`TransferFailure`] if any digest fails to transfer. Digests that
///   did transfer stay committed, and are listed in the failure.
pub fn push<'a, L, R>(
    pointers: impl IntoIterator<Item = &'a PointerFile>,
    local: &L,
    remote: &R,
) -> Result<BTreeSet<Digest>>
where
    L: ContentStore + ?Sized,
    R: ContentStore + ?Sized,
{
    transfer(Direction::Push, referenced(pointers), local, remote)
}

/// Copy blobs referenced by pointers from remote store to local store.
///
/// Symmetric inverse of [`push`].
///
/// # Errors
///
/// - Return [`TransferFailure`] if any digest fails to transfer. Digests that
///   did transfer stay committed, and are listed in the failure.
pub fn fetch<'a, L, R>(
    pointers: impl IntoIterator<Item = &'a PointerFile>,
    local: &L,
    remote: &R,
) -> Result<BTreeSet<Digest>>
where
    L: ContentStore + ?Sized,
    R: ContentStore + ?Sized,
{
    transfer(Direction::Fetch, referenced(pointers), remote, local)
}

fn referenced<'a>(pointers: impl IntoIterator<Item = &'a PointerFile>) -> BTreeSet<Digest> {
    pointers.into_iter().map(|pointer| pointer.digest).collect()
}

#[instrument(skip(digests, source, destination), fields(digests = digests.len()), level = "debug")]
fn transfer<S, D>(
    direction: Direction,
    digests: BTreeSet<Digest>,
    source: &S,
    destination: &D,
) -> Result<BTreeSet<Digest>>
where
    S: ContentStore + ?Sized,
    D: ContentStore + ?Sized,
{
    // INVARIANT: Reconcile by set difference on digest, never by path.
    let missing = digests
        .into_iter()
        .filter(|digest| !destination.has(digest))
        .collect::<Vec<_>>();

    if missing.is_empty() {
        info!("{direction}: everything up to date");
        return Ok(BTreeSet::new());
    }

    info!("{direction}: transferring {} blobs", missing.len());
    let outcomes = missing
        .par_iter()
        .map(|digest| {
            let outcome = source
                .get(digest)
                .and_then(|bytes| destination.put(digest, &bytes));
            (*digest, outcome)
        })
        .collect::<Vec<_>>();

    let mut completed = BTreeSet::new();
    let mut failed = Vec::new();
    for (digest, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                debug!("{direction}: transferred {digest}");
                completed.insert(digest);
            }
            Err(err) => {
                warn!("{direction}: failed to transfer {digest}: {err}");
                failed.push((digest, err));
            }
        }
    }

    if failed.is_empty() {
        Ok(completed)
    } else {
        Err(TransferFailure {
            direction,
            completed,
            failed,
        })
    }
}

/// Some digests failed to transfer.
///
/// Transfers are not rolled back, so `completed` lists every digest that did
/// make it to the destination store.
#[derive(Debug, thiserror::Error)]
#[error(
    "{direction} failed for {} of {} blobs",
    .failed.len(),
    .failed.len() + .completed.len()
)]
pub struct TransferFailure {
    pub direction: Direction,
    pub completed: BTreeSet<Digest>,
    pub failed: Vec<(Digest, StoreError)>,
}

/// Friendly result alias :3
pub type Result<T, E = TransferFailure> = std::result::Result<T, E>;
