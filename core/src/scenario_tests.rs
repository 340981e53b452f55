//! End-to-end scenario tests, run against the in-memory
//! [fixtures::InMemoryBucket]. Unlike the unit tests living alongside each
//! module, these exercise a whole lookup/listing/write/sync sequence in
//! one place, the way a FUSE integration test exercises a whole request
//! sequence rather than individual helper functions.
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::MountConfig;
use crate::core_descriptor::Type;
use crate::dir_inode::DirInode;
use crate::errors::Error;
use crate::file_inode::FileInode;
use crate::fixtures::InMemoryBucket;
use crate::name::{Name, CONFLICT_MARKER};
use crate::store::Bucket;

fn root_dir(bucket: Arc<InMemoryBucket>) -> DirInode {
    DirInode::new(1, Name::new_root(""), bucket, &MountConfig::default())
}

/// Scenario 1: root with implicit_dirs=true, store has `{a/b/c: "hi"}`.
/// `LookUpChild("a")` returns ImplicitDir; `ReadEntries` returns one entry
/// `a` of type directory.
#[tokio::test]
async fn scenario_1_implicit_dir_surfaces_in_lookup_and_listing() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    bucket.seed("a/b/c", b"hi", HashMap::new());
    let root = root_dir(bucket);

    let core = root.look_up_child("a").await.unwrap().unwrap();
    assert_eq!(core.kind(), Type::ImplicitDir);

    let (entries, unsupported, _token) = root.read_entries(None).await.unwrap();
    assert!(unsupported.is_empty());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].basename, "a");
    assert_eq!(entries[0].core.kind(), Type::ImplicitDir);
}

/// Scenario 2: store has `{foo, foo/bar}`. `LookUpChild("foo")` returns
/// ExplicitDir (directory wins the tie-break); `LookUpChild("foo\n")`
/// returns RegularFile (the conflict marker picks the file arm).
#[tokio::test]
async fn scenario_2_conflict_marker_disambiguates_file_from_dir() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    bucket.seed("foo", b"file contents", HashMap::new());
    bucket.seed("foo/bar", b"x", HashMap::new());
    let root = root_dir(bucket);

    let dir_core = root.look_up_child("foo").await.unwrap().unwrap();
    assert_eq!(dir_core.kind(), Type::ImplicitDir);

    let file_core = root
        .look_up_child(&format!("foo{CONFLICT_MARKER}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file_core.kind(), Type::RegularFile);
    assert_eq!(file_core.name().key(), "foo");
}

/// Scenario 3: file inode on object `doc` with size 4 generation 7.
/// `Write(5, "hello")` is an out-of-order write: promotes to temp-file,
/// content becomes `"taco\0hello"` (local buffer zero-padded), size 10.
#[tokio::test]
async fn scenario_3_out_of_order_write_zero_pads() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    let src = bucket
        .create_object("doc", Bytes::from_static(b"taco"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(src.size, 4);

    let inode = FileInode::new_from_object(
        1,
        Name::new_file(&Name::new_root(""), "doc"),
        bucket,
        crate::attr::Attributes::file(0, 0, 0o644),
        src,
    );

    inode.write(b"hello", 5).await.unwrap();
    let attrs = inode.attributes(false).await.unwrap();
    assert_eq!(attrs.size, 10);

    let mut buf = [0u8; 10];
    let n = inode.read(&mut buf, 0).await.unwrap();
    assert_eq!(n, 10);
    assert_eq!(&buf, b"taco\0hello");
}

/// Scenario 4: file inode with dirty content; between write and sync the
/// remote object advances to a new generation. `Sync` returns Clobbered;
/// the object in the store is unchanged from the remote writer's update.
#[tokio::test]
async fn scenario_4_remote_advance_clobbers_pending_sync() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    let src = bucket
        .create_object("doc", Bytes::from_static(b"taco"), HashMap::new())
        .await
        .unwrap();

    let inode = FileInode::new_from_object(
        1,
        Name::new_file(&Name::new_root(""), "doc"),
        bucket.clone(),
        crate::attr::Attributes::file(0, 0, 0o644),
        src,
    );
    inode.write(b"local edit", 0).await.unwrap();

    // A second writer (out of this inode's view) advances the object.
    let remote_update = bucket
        .sync_object("doc", Bytes::from_static(b"remote edit"), HashMap::new())
        .await
        .unwrap();

    let result = inode.sync().await;
    assert!(matches!(result, Err(Error::Clobbered(_))));

    let still_remote = bucket.stat_object("doc", true).await.unwrap().unwrap();
    assert_eq!(still_remote.generation, remote_update.generation);
}

/// Scenario 5: DirInode on `p/` with implicit_dirs=false, store has
/// `{p/x, p/y/z}` (no `p/y/` placeholder). `ReadEntries` returns one file
/// `x`; the prefix `y/` is NOT promoted to an entry.
#[tokio::test]
async fn scenario_5_implicit_dirs_disabled_hides_prefix_without_placeholder() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    bucket.seed("p/x", b"1", HashMap::new());
    bucket.seed("p/y/z", b"2", HashMap::new());

    let mut config = MountConfig::default();
    config.implicit_dirs = false;
    let dir = DirInode::new(1, Name::new_dir(&Name::new_root(""), "p"), bucket, &config);

    let (entries, _unsupported, _token) = dir.read_entries(None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].basename, "x");
    assert_eq!(entries[0].core.kind(), Type::RegularFile);
}

/// Scenario 6: `DeleteObjects(["p/"])` on a store with `{p/a, p/b/c,
/// p/b/}` removes all three (via recursive list+delete) and finally the
/// prefix itself; a concurrent second call is idempotent (no-ops on
/// NotFound).
#[tokio::test]
async fn scenario_6_delete_objects_is_recursive_and_idempotent_under_concurrency() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    bucket.seed("p/a", b"1", HashMap::new());
    bucket.seed("p/b/c", b"2", HashMap::new());
    bucket.seed("p/b/", b"", HashMap::new());
    bucket.seed("p/", b"", HashMap::new());
    let dir = root_dir(bucket.clone());

    let (first, second) = tokio::join!(
        dir.delete_objects(&["p/".to_string()]),
        dir.delete_objects(&["p/".to_string()])
    );
    first.unwrap();
    second.unwrap();

    assert!(bucket.stat_object("p/a", true).await.unwrap().is_none());
    assert!(bucket.stat_object("p/b/c", true).await.unwrap().is_none());
    assert!(bucket.stat_object("p/b/", true).await.unwrap().is_none());
    assert!(bucket.stat_object("p/", true).await.unwrap().is_none());
}

/// Create-if-absent atomicity: two concurrent `CreateChildFile("x")`
/// calls, exactly one succeeds, the other returns Precondition; the
/// TypeCache ends up with `RegularFile` for `x`.
#[tokio::test]
async fn create_if_absent_atomicity_leaves_type_cache_consistent() {
    let bucket = Arc::new(InMemoryBucket::new(false));
    let dir = root_dir(bucket);
    let t = chrono::Utc::now();

    let (a, b) = tokio::join!(dir.create_child_file("x", t), dir.create_child_file("x", t));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(Error::Precondition(_))))
            .count(),
        1
    );

    // A subsequent lookup is served from the TypeCache without I/O
    // disagreeing with the winner.
    let core = dir.look_up_child("x").await.unwrap().unwrap();
    assert_eq!(core.kind(), Type::RegularFile);
}
