// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{customer_csv, ProjectFixture, RemoteFixture};

use anyhow::Result;
use datapin::{
    hash_bytes,
    pointer::pointer_path_for,
    store::StoreError,
    tracker::TrackerError,
    ContentStore, FsStore, PointerFile, Status,
};
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, fs};

#[test]
fn rollback_to_earlier_version() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let project = ProjectFixture::new(&remote)?;
    let tracker = project.tracker();

    project.write("data/customer.csv", customer_csv(364))?;
    let v1 = tracker.add("data/customer.csv")?;
    let v1_pointer = project.read(pointer_path_for("data/customer.csv"))?;

    project.write("data/customer.csv", customer_csv(496))?;
    let v2 = tracker.add("data/customer.csv")?;
    assert_ne!(v1.digest, v2.digest);

    // Revision control hands back the older pointer text.
    let older: PointerFile = v1_pointer.parse()?;
    tracker.checkout(&older)?;

    let restored = project.read("data/customer.csv")?;
    assert_eq!(restored.lines().count(), 365);
    assert_eq!(tracker.status("data/customer.csv", &older)?, Status::Clean);
    assert_eq!(tracker.status("data/customer.csv", &v2)?, Status::Modified);

    // Newer version stays available for rolling forward again.
    assert_eq!(tracker.store().get(&v2.digest)?, customer_csv(496).into_bytes());

    Ok(())
}

#[test]
fn fresh_clone_fetches_then_checks_out() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let origin = ProjectFixture::new(&remote)?;
    origin.write("data/customer.csv", customer_csv(496))?;
    origin.write("data/regions.csv", "region\nnorth\nsouth\n")?;
    origin.tracker().add("data/customer.csv")?;
    origin.tracker().add("data/regions.csv")?;

    let pointers = origin.tracker().pointers()?;
    let pushed = origin.tracker().push(&pointers, &origin.remote()?)?;
    assert_eq!(pushed.len(), 2);

    let clone = ProjectFixture::new(&remote)?;
    clone.clone_pointers(&origin)?;
    let tracker = clone.tracker();
    let pointers = tracker.pointers()?;

    let result = tracker.checkout(&pointers[0]);
    assert!(matches!(result, Err(TrackerError::BlobMissing { .. })));

    let fetched = tracker.fetch(&pointers, &clone.remote()?)?;
    let expect = pointers.iter().map(|p| p.digest).collect::<BTreeSet<_>>();
    assert_eq!(fetched, expect);

    for pointer in &pointers {
        tracker.checkout(pointer)?;
        assert_eq!(tracker.status(&pointer.path, pointer)?, Status::Clean);
    }
    assert_eq!(clone.read("data/customer.csv")?, customer_csv(496));
    assert_eq!(clone.read("data/regions.csv")?, "region\nnorth\nsouth\n");

    Ok(())
}

#[test]
fn push_after_push_transfers_nothing() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let project = ProjectFixture::new(&remote)?;
    let tracker = project.tracker();
    project.write("a.csv", "a")?;
    project.write("copy/a.csv", "a")?;
    tracker.add("a.csv")?;
    tracker.add("copy/a.csv")?;

    let pointers = tracker.pointers()?;
    assert_eq!(tracker.push(&pointers, &project.remote()?)?.len(), 1);
    assert!(tracker.push(&pointers, &project.remote()?)?.is_empty());
    assert_eq!(FsStore::new(remote.path()).list()?.len(), 1);

    Ok(())
}

#[test]
fn pull_rejects_corrupted_remote_blob() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let origin = ProjectFixture::new(&remote)?;
    origin.write("a.csv", "pristine")?;
    let pointer = origin.tracker().add("a.csv")?;
    origin.tracker().push(&[pointer.clone()], &origin.remote()?)?;

    let blob = FsStore::new(remote.path()).blob_path(&pointer.digest);
    fs::write(blob, "tampered")?;

    let clone = ProjectFixture::new(&remote)?;
    clone.clone_pointers(&origin)?;
    let tracker = clone.tracker();
    let result = tracker.pull(&tracker.pointers()?, &clone.remote()?);

    let Err(TrackerError::Transfer(failure)) = result else {
        panic!("pull of a tampered blob should fail to transfer");
    };
    assert!(failure.completed.is_empty());
    assert!(matches!(
        failure.failed[0].1,
        StoreError::IntegrityViolation { .. }
    ));
    assert!(!tracker.store().has(&pointer.digest));
    assert!(!clone.path().join("a.csv").exists());

    Ok(())
}

#[test]
fn blob_lost_everywhere_stays_missing() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let project = ProjectFixture::new(&remote)?;
    let lost = PointerFile::new("lost.csv", hash_bytes(b"never stored"), 12);
    lost.save(project.path().join("lost.csv.ptr"))?;

    let tracker = project.tracker();
    let result = tracker.pull(&tracker.pointers()?, &project.remote()?);
    assert!(matches!(
        result,
        Err(TrackerError::BlobsMissing { digests }) if digests.contains(&lost.digest)
    ));

    Ok(())
}

#[test]
fn pointer_text_is_stable_across_adds() -> Result<()> {
    let remote = RemoteFixture::new()?;
    let project = ProjectFixture::new(&remote)?;
    project.write("data/customer.csv", customer_csv(10))?;

    project.tracker().add("data/customer.csv")?;
    let first = project.read("data/customer.csv.ptr")?;
    project.tracker().add("data/customer.csv")?;
    let second = project.read("data/customer.csv.ptr")?;

    assert_eq!(first, second);
    assert_eq!(project.read("data/.gitignore")?, "/customer.csv\n");

    Ok(())
}
