// Archive index integration tests
// Tests SQLite operations in isolation using in-memory database

mod common;

use common::{oid, refs, setup_db};
use gitarchive::blob::BlobStore;
use gitarchive::error::ArchiveError;
use gitarchive::model::{BlacklistState, PackRef, RefMap, WorkItem};
use gitarchive::repository::{audit, DanglingDep, Database, NewFetch, SCHEMA_VERSION};
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

const BOB: &str = "https://github.com/bob/orig.git";
const ALICE: &str = "https://github.com/alice/fork.git";

async fn record(
    db: &Database,
    name: &str,
    parent: &str,
    at: OffsetDateTime,
    refs: &RefMap,
    deps: &[i64],
) -> i64 {
    let pack_ref = PackRef::stored(name, at);
    db.add_fetch(&NewFetch {
        name,
        parent,
        timestamp: at,
        refs,
        pack_ref: &pack_ref,
        deps,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_schema_init() {
    let db = common::create_test_db().await;

    // First init should return true (schema was created)
    assert!(db.init_schema().await.unwrap());

    // Second init should return false (schema exists and version matches)
    assert!(!db.init_schema().await.unwrap());

    let version = db.get_metadata("schema_version").await.unwrap();
    assert_eq!(version.as_deref(), Some(SCHEMA_VERSION));
}

#[tokio::test]
async fn test_schema_version_mismatch_refused() {
    let db = setup_db().await;
    db.set_metadata("schema_version", "0").await.unwrap();

    let err = db.init_schema().await.unwrap_err();
    assert!(matches!(err, ArchiveError::IndexFailed { .. }));
}

#[tokio::test]
async fn test_pack_ids_increase() {
    let db = setup_db().await;
    let r = refs(&[("refs/heads/main", 'a')]);

    let first = record(&db, BOB, "", datetime!(2024-01-01 00:00 UTC), &r, &[]).await;
    let second = record(&db, ALICE, "", datetime!(2023-01-01 00:00 UTC), &r, &[]).await;
    let third = record(&db, BOB, "", datetime!(2022-01-01 00:00 UTC), &r, &[first]).await;

    assert!(first < second && second < third);
}

#[tokio::test]
async fn test_fetch_record_stored() {
    let db = setup_db().await;
    let at = datetime!(2024-03-01 12:00:00.123456789 UTC);
    let r = refs(&[("refs/heads/main", 'a'), ("refs/tags/v1", 'b')]);

    let id = record(&db, ALICE, BOB, at, &r, &[]).await;

    let records = db.fetches_for(ALICE).await.unwrap();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.pack_id, id);
    assert_eq!(rec.parent, BOB);
    assert_eq!(rec.timestamp, at);
    assert_eq!(rec.refs, r);
    assert_eq!(rec.pack_ref, PackRef::stored(ALICE, at));
    assert!(db.deps_of(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_pack_ref_rejected() {
    let db = setup_db().await;
    let at = datetime!(2024-01-01 00:00 UTC);
    let r = refs(&[("refs/heads/main", 'a')]);

    record(&db, BOB, "", at, &r, &[]).await;
    let pack_ref = PackRef::stored(BOB, at);
    let res = db
        .add_fetch(&NewFetch {
            name: BOB,
            parent: "",
            timestamp: at,
            refs: &r,
            pack_ref: &pack_ref,
            deps: &[],
        })
        .await;
    assert!(matches!(res, Err(ArchiveError::IndexFailed { .. })));
    assert_eq!(db.fetches_for(BOB).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_haves_unknown() {
    let db = setup_db().await;
    let haves = db.get_haves(BOB, None).await.unwrap();
    assert!(haves.is_clone());
    assert!(haves.oids.is_empty());
    assert!(haves.deps.is_empty());
}

#[tokio::test]
async fn test_get_haves_uses_latest_record() {
    let db = setup_db().await;
    let old = record(&db, BOB, "", datetime!(2024-01-01 00:00 UTC), &refs(&[("refs/heads/main", 'a')]), &[]).await;
    let new = record(&db, BOB, "", datetime!(2024-01-02 00:00 UTC), &refs(&[("refs/heads/main", 'c')]), &[old]).await;

    let haves = db.get_haves(BOB, None).await.unwrap();
    assert!(!haves.is_clone());
    assert_eq!(haves.deps, vec![new]);
    assert_eq!(haves.oids.into_iter().collect::<Vec<_>>(), vec![oid('c')]);
}

#[tokio::test]
async fn test_get_haves_follows_parent_once() {
    let db = setup_db().await;
    let grandparent = "https://github.com/carol/root.git";
    record(&db, grandparent, "", datetime!(2024-01-01 00:00 UTC), &refs(&[("refs/heads/main", '9')]), &[]).await;
    let bob = record(
        &db,
        BOB,
        grandparent,
        datetime!(2024-01-02 00:00 UTC),
        &refs(&[("refs/heads/main", 'a'), ("refs/heads/dev", 'b')]),
        &[],
    )
    .await;
    let alice = record(&db, ALICE, BOB, datetime!(2024-01-03 00:00 UTC), &refs(&[("refs/heads/main", 'd')]), &[bob]).await;

    let haves = db.get_haves(ALICE, None).await.unwrap();
    // Self before parent; the grandparent is not visited
    assert_eq!(haves.deps, vec![alice, bob]);
    assert_eq!(
        haves.oids.into_iter().collect::<Vec<_>>(),
        vec![oid('a'), oid('b'), oid('d')]
    );
}

#[tokio::test]
async fn test_get_haves_parent_hint_bootstraps_fork() {
    let db = setup_db().await;
    let bob = record(&db, BOB, "", datetime!(2024-01-01 00:00 UTC), &refs(&[("refs/heads/main", 'a')]), &[]).await;

    let haves = db.get_haves(ALICE, Some(BOB)).await.unwrap();
    assert!(haves.is_clone());
    assert_eq!(haves.deps, vec![bob]);
    assert_eq!(haves.oids.into_iter().collect::<Vec<_>>(), vec![oid('a')]);

    // The recorded parent wins over the hint once the fork has a record
    let other = "https://github.com/dave/other.git";
    record(&db, other, "", datetime!(2024-01-01 00:00 UTC), &refs(&[("refs/heads/x", 'e')]), &[]).await;
    let alice = record(&db, ALICE, BOB, datetime!(2024-01-02 00:00 UTC), &refs(&[("refs/heads/main", 'a')]), &[bob]).await;
    let haves = db.get_haves(ALICE, Some(other)).await.unwrap();
    assert_eq!(haves.deps, vec![alice, bob]);
}

#[tokio::test]
async fn test_get_haves_self_parent_ignored() {
    let db = setup_db().await;
    let id = record(&db, BOB, BOB, datetime!(2024-01-01 00:00 UTC), &refs(&[("refs/heads/main", 'a')]), &[]).await;
    let haves = db.get_haves(BOB, None).await.unwrap();
    assert_eq!(haves.deps, vec![id]);
}

#[tokio::test]
async fn test_get_latest() {
    let db = setup_db().await;
    assert_eq!(db.get_latest(BOB).await.unwrap(), OffsetDateTime::UNIX_EPOCH);

    let r = refs(&[("refs/heads/main", 'a')]);
    record(&db, BOB, "", datetime!(2024-05-01 00:00 UTC), &r, &[]).await;
    record(&db, BOB, "", datetime!(2024-06-01 00:00 UTC), &r, &[]).await;
    record(&db, ALICE, "", datetime!(2025-01-01 00:00 UTC), &r, &[]).await;

    assert_eq!(db.get_latest(BOB).await.unwrap(), datetime!(2024-06-01 00:00 UTC));
}

#[tokio::test]
async fn test_blacklist() {
    let db = setup_db().await;
    assert_eq!(db.blacklist_state("spam/repo").await.unwrap(), BlacklistState::Neutral);

    db.add_blacklist("spam/repo").await.unwrap();
    assert_eq!(db.blacklist_state("spam/repo").await.unwrap(), BlacklistState::Blacklisted);
    assert_eq!(db.blacklist_state("good/repo").await.unwrap(), BlacklistState::Neutral);
}

#[tokio::test]
async fn test_queue_fifo() {
    let db = setup_db().await;
    assert_eq!(db.pop_queue().await.unwrap(), None);

    db.enqueue(&WorkItem::new("bob/orig")).await.unwrap();
    db.enqueue(&WorkItem::fork_of("alice/fork", "bob/orig")).await.unwrap();
    assert_eq!(db.queue_len().await.unwrap(), 2);

    assert_eq!(db.pop_queue().await.unwrap(), Some(WorkItem::new("bob/orig")));
    assert_eq!(
        db.pop_queue().await.unwrap(),
        Some(WorkItem::fork_of("alice/fork", "bob/orig"))
    );
    assert_eq!(db.pop_queue().await.unwrap(), None);
    assert_eq!(db.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_audit_index_findings() {
    let db = setup_db().await;
    let r = refs(&[("refs/heads/main", 'a')]);

    let first = record(&db, BOB, "", datetime!(2024-01-01 00:00 UTC), &r, &[]).await;
    // A second fetch with no edge back to the first
    let second = record(&db, BOB, "", datetime!(2024-01-02 00:00 UTC), &r, &[]).await;
    // An edge to a pack that was never recorded
    let third = record(&db, ALICE, "", datetime!(2024-01-03 00:00 UTC), &r, &[99]).await;

    assert_eq!(db.under_linked().await.unwrap(), vec![(second, BOB.to_string())]);
    assert_eq!(db.dangling_deps().await.unwrap(), vec![DanglingDep { id: third, dep: 99 }]);
    assert!(first < second);
}

#[tokio::test]
async fn test_audit_blob_findings() {
    let db = setup_db().await;
    let (_dir, blobs) = common::create_blob_store().await;
    let r = refs(&[("refs/heads/main", 'a')]);

    // Recorded and stored
    let at = datetime!(2024-01-01 00:00 UTC);
    let kept = PackRef::stored(BOB, at);
    let mut w = blobs.new_writer(kept.as_str()).await.unwrap();
    w.write_all(b"PACK").await.unwrap();
    w.close().await.unwrap();
    record(&db, BOB, "", at, &r, &[]).await;

    // Empty-pack sentinel: no blob expected
    let empty = PackRef::empty(ALICE, at);
    db.add_fetch(&NewFetch {
        name: ALICE,
        parent: "",
        timestamp: at,
        refs: &r,
        pack_ref: &empty,
        deps: &[],
    })
    .await
    .unwrap();

    let report = audit(&db, &blobs).await.unwrap();
    assert!(report.is_clean(), "{report:?}");

    // Stored but never recorded
    let mut w = blobs.new_writer("https://github.com/x/y.git|5").await.unwrap();
    w.write_all(b"PACK").await.unwrap();
    w.close().await.unwrap();
    // Recorded but never stored
    let lost_at = datetime!(2024-02-01 00:00 UTC);
    record(&db, ALICE, "", lost_at, &r, &[]).await;

    let report = audit(&db, &blobs).await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.orphan_blobs, vec!["https://github.com/x/y.git|5".to_string()]);
    assert_eq!(report.missing_blobs, vec![PackRef::stored(ALICE, lost_at).to_string()]);
}
