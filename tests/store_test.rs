//! Integration tests for the partition store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use workpool::clock::{Clock, ManualClock};
use workpool::db::{Db, WriteBatch};
use workpool::{Disposition, Error, Partition, PartitionStore};

fn p(name: &str) -> Partition {
    Partition::new(name).unwrap()
}

fn test_store() -> PartitionStore {
    PartitionStore::new(Db::in_memory().expect("failed to create in-memory db"))
}

fn clocked_store() -> (PartitionStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
    ));
    let store = PartitionStore::with_clock(Db::in_memory().unwrap(), clock.clone());
    (store, clock)
}

async fn assert_consistent(store: &PartitionStore, partition: &Partition) {
    let actual = store.find(partition).await.unwrap().len() as u64;
    assert_eq!(
        store.count(partition).await.unwrap(),
        actual,
        "counter for {partition} out of sync"
    );
}

// ---------------------------------------------------------------------------
// put / get / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn put_then_get_preserves_payload_and_stamps_time() {
    let (store, clock) = clocked_store();
    let pending = p("pending");

    store
        .put(&pending, "k1", json!({"kind": "Checker", "data": {"n": 1}}))
        .await
        .unwrap();

    let record = store.get(&pending, "k1").await.unwrap().expect("record");
    assert_eq!(record.id, "k1");
    assert_eq!(record.partition, pending);
    assert_eq!(record.payload, json!({"kind": "Checker", "data": {"n": 1}}));
    assert_eq!(record.created_at, clock.now());
}

#[tokio::test]
async fn get_missing_is_none() {
    let store = test_store();
    assert!(store.get(&p("pending"), "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn put_new_counts_overwrite_does_not() {
    let (store, clock) = clocked_store();
    let a = p("A");

    store.put(&a, "k", json!({"v": 1})).await.unwrap();
    let first = store.get(&a, "k").await.unwrap().unwrap().created_at;
    assert_eq!(store.count(&a).await.unwrap(), 1);

    clock.advance(chrono::Duration::seconds(30));
    store.put(&a, "k", json!({"v": 2})).await.unwrap();
    assert_eq!(store.count(&a).await.unwrap(), 1);

    let record = store.get(&a, "k").await.unwrap().unwrap();
    assert_eq!(record.payload, json!({"v": 2}));
    assert_eq!(record.created_at - first, chrono::Duration::seconds(30));
}

#[tokio::test]
async fn delete_absent_is_a_noop() {
    let store = test_store();
    let a = p("A");
    store.put(&a, "present", json!({})).await.unwrap();

    assert!(!store.delete(&a, "absent").await.unwrap());
    assert_eq!(store.count(&a).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_existing_decrements_count() {
    let store = test_store();
    let a = p("A");
    store.put(&a, "x", json!({})).await.unwrap();
    store.put(&a, "y", json!({})).await.unwrap();

    assert!(store.delete(&a, "x").await.unwrap());
    assert_eq!(store.count(&a).await.unwrap(), 1);
    assert!(store.get(&a, "x").await.unwrap().is_none());
    assert_consistent(&store, &a).await;
}

#[tokio::test]
async fn count_of_untouched_partition_is_zero() {
    let store = test_store();
    assert_eq!(store.count(&p("never")).await.unwrap(), 0);
}

#[tokio::test]
async fn partitions_with_shared_prefix_stay_separate() {
    let store = test_store();
    store.put(&p("A"), "1", json!({})).await.unwrap();
    store.put(&p("AB"), "2", json!({})).await.unwrap();

    let a = store.find(&p("A")).await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].id, "1");
    assert_eq!(store.count(&p("AB")).await.unwrap(), 1);
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    assert!(matches!(
        Partition::new("__count"),
        Err(Error::InvalidPartition(_))
    ));
    let store = test_store();
    let err = store.put(&p("A"), "", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::InvalidId(_)));
    assert_eq!(store.count(&p("A")).await.unwrap(), 0);
}

#[tokio::test]
async fn failed_write_releases_locks_and_applies_nothing() {
    let store = test_store();
    let a = p("A");
    store.put(&a, "k", json!({"v": 1})).await.unwrap();

    let mut batch = WriteBatch::new();
    batch.put("__count:A", b"not a number".to_vec());
    store.db().write(batch, ()).await.unwrap();

    let err = store.delete(&a, "k").await.unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
    let err = store.put(&a, "new", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));

    assert_eq!(store.locks().held_count(), 0);
    let kept = store.get(&a, "k").await.unwrap().expect("record survives failed delete");
    assert_eq!(kept.payload, json!({"v": 1}));
    assert!(store.get(&a, "new").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// move
// ---------------------------------------------------------------------------

#[tokio::test]
async fn move_to_same_partition_is_a_noop() {
    let store = test_store();
    let a = p("A");
    store.put(&a, "k", json!({})).await.unwrap();

    assert!(!store.move_record(&a, "k", &a).await.unwrap());
    assert_eq!(store.count(&a).await.unwrap(), 1);
    assert!(store.get(&a, "k").await.unwrap().is_some());
}

#[tokio::test]
async fn move_of_absent_record_is_a_noop() {
    let store = test_store();
    assert!(!store.move_record(&p("A"), "k", &p("B")).await.unwrap());
    assert_eq!(store.count(&p("B")).await.unwrap(), 0);
    assert_eq!(store.locks().held_count(), 0);
}

#[tokio::test]
async fn move_relocates_and_refreshes_timestamp() {
    let (store, clock) = clocked_store();
    let (a, b) = (p("A"), p("B"));
    store.put(&a, "k", json!({"job": 7})).await.unwrap();

    clock.advance(chrono::Duration::minutes(5));
    assert!(store.move_record(&a, "k", &b).await.unwrap());

    assert!(store.get(&a, "k").await.unwrap().is_none());
    let moved = store.get(&b, "k").await.unwrap().unwrap();
    assert_eq!(moved.payload, json!({"job": 7}));
    assert_eq!(moved.created_at, clock.now());
    assert_eq!(store.count(&a).await.unwrap(), 0);
    assert_eq!(store.count(&b).await.unwrap(), 1);
}

#[tokio::test]
async fn move_onto_existing_destination_overwrites_without_double_count() {
    let store = test_store();
    let (a, b) = (p("A"), p("B"));
    store.put(&a, "k", json!({"from": "a"})).await.unwrap();
    store.put(&a, "other", json!({})).await.unwrap();
    store.put(&b, "k", json!({"from": "b"})).await.unwrap();

    assert!(store.move_record(&a, "k", &b).await.unwrap());

    assert_eq!(store.count(&a).await.unwrap(), 1);
    assert_eq!(store.count(&b).await.unwrap(), 1);
    let record = store.get(&b, "k").await.unwrap().unwrap();
    assert_eq!(record.payload, json!({"from": "a"}));
    assert_consistent(&store, &a).await;
    assert_consistent(&store, &b).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_direction_moves_complete_and_stay_consistent() {
    let store = test_store();
    let (x, y) = (p("X"), p("Y"));
    for i in 0..40 {
        store.put(&x, &format!("x{i:02}"), json!({"i": i})).await.unwrap();
        store.put(&y, &format!("y{i:02}"), json!({"i": i})).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..40 {
        for (from, to, id) in [
            (x.clone(), y.clone(), format!("x{i:02}")),
            (y.clone(), x.clone(), format!("y{i:02}")),
        ] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.move_record(&from, &id, &to).await
            }));
        }
    }

    tokio::time::timeout(Duration::from_secs(30), async {
        for h in handles {
            assert!(h.await.unwrap().unwrap());
        }
    })
    .await
    .expect("opposite-direction moves deadlocked");

    assert_eq!(store.count(&x).await.unwrap(), 40);
    assert_eq!(store.count(&y).await.unwrap(), 40);
    assert!(store.find(&x).await.unwrap().iter().all(|r| r.id.starts_with('y')));
    assert_consistent(&store, &x).await;
    assert_consistent(&store, &y).await;
    assert_eq!(store.locks().held_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_puts_deletes_and_moves_keep_counters_exact() {
    let store = test_store();
    let (a, b) = (p("a"), p("b"));

    let mut handles = Vec::new();
    for round in 0..60 {
        let store = store.clone();
        let (a, b) = (a.clone(), b.clone());
        handles.push(tokio::spawn(async move {
            let id = format!("k{}", round % 7);
            match round % 4 {
                0 => store.put(&a, &id, json!({"r": round})).await.map(|_| ()),
                1 => store.delete(&a, &id).await.map(|_| ()),
                2 => store.move_record(&a, &id, &b).await.map(|_| ()),
                _ => store.move_record(&b, &id, &a).await.map(|_| ()),
            }
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_consistent(&store, &a).await;
    assert_consistent(&store, &b).await;
    assert_eq!(store.locks().held_count(), 0);
}

// ---------------------------------------------------------------------------
// shift
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shift_many_drains_a_short_partition() {
    let store = test_store();
    let q = p("queue");
    for id in ["c", "a", "b"] {
        store.put(&q, id, json!({"id": id})).await.unwrap();
    }

    let taken = store.shift_many(&q, 10, &Disposition::Delete).await.unwrap();
    assert_eq!(
        taken.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        ["a", "b", "c"]
    );
    assert_eq!(store.count(&q).await.unwrap(), 0);
    assert!(store.find(&q).await.unwrap().is_empty());

    let again = store.shift_many(&q, 10, &Disposition::Delete).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn shift_takes_lowest_key_first() {
    let store = test_store();
    let q = p("queue");
    store.put(&q, "m", json!({})).await.unwrap();
    store.put(&q, "b", json!({})).await.unwrap();

    let first = store.shift(&q, &Disposition::Delete).await.unwrap().unwrap();
    assert_eq!(first.id, "b");
    assert_eq!(store.count(&q).await.unwrap(), 1);
}

#[tokio::test]
async fn shift_on_empty_partition_is_none() {
    let store = test_store();
    assert!(store
        .shift(&p("empty"), &Disposition::Delete)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn shift_many_with_zero_count_is_empty() {
    let store = test_store();
    let q = p("queue");
    store.put(&q, "a", json!({})).await.unwrap();
    assert!(store.shift_many(&q, 0, &Disposition::Delete).await.unwrap().is_empty());
    assert_eq!(store.count(&q).await.unwrap(), 1);
}

#[tokio::test]
async fn shift_with_move_relocates_records() {
    let store = test_store();
    let (pending, leased) = (p("pending"), p("leased"));
    for i in 0..3 {
        store.put(&pending, &format!("w{i}"), json!({"i": i})).await.unwrap();
    }

    let taken = store
        .shift_many(&pending, 2, &Disposition::MoveTo(leased.clone()))
        .await
        .unwrap();
    assert_eq!(taken.len(), 2);
    assert!(taken.iter().all(|r| r.partition == pending));
    assert_eq!(store.count(&pending).await.unwrap(), 1);
    assert_eq!(store.count(&leased).await.unwrap(), 2);
    for record in &taken {
        let there = store.get(&leased, &record.id).await.unwrap().unwrap();
        assert_eq!(there.payload, record.payload);
    }
}

#[tokio::test]
async fn shift_into_own_partition_is_rejected() {
    let store = test_store();
    let q = p("queue");
    store.put(&q, "a", json!({})).await.unwrap();
    let err = store
        .shift_many(&q, 1, &Disposition::MoveTo(q.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.count(&q).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shifts_never_hand_out_the_same_record() {
    let store = test_store();
    let q = p("queue");
    for i in 0..50 {
        store.put(&q, &format!("{i:03}"), json!({})).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let q = q.clone();
        handles.push(tokio::spawn(async move {
            store.shift_many(&q, 9, &Disposition::Delete).await
        }));
    }

    let mut seen = HashSet::new();
    for h in handles {
        for record in h.await.unwrap().unwrap() {
            assert!(seen.insert(record.id), "record handed out twice");
        }
    }
    assert_eq!(seen.len(), 50);
    assert_eq!(store.count(&q).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_returns_stale_lease_to_pending() {
    let (store, clock) = clocked_store();
    let (pending, in_progress) = (p("pending"), p("in-progress"));

    clock.advance(chrono::Duration::seconds(-3600));
    store.put(&in_progress, "stuck", json!({"kind": "job"})).await.unwrap();
    clock.advance(chrono::Duration::seconds(3600));

    let reclaimed = store
        .cleanup(
            &in_progress,
            Duration::from_secs(600),
            &Disposition::MoveTo(pending.clone()),
        )
        .await
        .unwrap();

    assert_eq!(reclaimed, 1);
    assert!(store.get(&in_progress, "stuck").await.unwrap().is_none());
    let back = store.get(&pending, "stuck").await.unwrap().unwrap();
    assert_eq!(back.payload, json!({"kind": "job"}));
    assert_eq!(store.count(&in_progress).await.unwrap(), 0);
    assert_eq!(store.count(&pending).await.unwrap(), 1);
}

#[tokio::test]
async fn cleanup_deletes_only_stale_records() {
    let (store, clock) = clocked_store();
    let done = p("completed");

    store.put(&done, "old", json!({})).await.unwrap();
    clock.advance(chrono::Duration::seconds(601));
    store.put(&done, "fresh", json!({})).await.unwrap();

    let reclaimed = store
        .cleanup(&done, Duration::from_secs(600), &Disposition::Delete)
        .await
        .unwrap();
    assert_eq!(reclaimed, 1);
    assert!(store.get(&done, "old").await.unwrap().is_none());
    assert!(store.get(&done, "fresh").await.unwrap().is_some());
    assert_eq!(store.count(&done).await.unwrap(), 1);
}

#[tokio::test]
async fn cleanup_at_exact_threshold_keeps_record() {
    let (store, clock) = clocked_store();
    let done = p("completed");
    store.put(&done, "edge", json!({})).await.unwrap();
    clock.advance(chrono::Duration::seconds(600));

    let reclaimed = store
        .cleanup(&done, Duration::from_secs(600), &Disposition::Delete)
        .await
        .unwrap();
    assert_eq!(reclaimed, 0);
    assert_eq!(store.count(&done).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// batch helpers and iteration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_many_preserves_order_and_gaps() {
    let store = test_store();
    let a = p("A");
    store
        .put_many(&a, vec![("1".to_string(), json!({"n": 1})), ("3".to_string(), json!({"n": 3}))])
        .await
        .unwrap();

    let ids: Vec<String> = ["3", "2", "1"].iter().map(|s| s.to_string()).collect();
    let got = store.get_many(&a, &ids).await.unwrap();
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].as_ref().unwrap().payload, json!({"n": 3}));
    assert!(got[1].is_none());
    assert_eq!(got[2].as_ref().unwrap().payload, json!({"n": 1}));
}

#[tokio::test]
async fn delete_many_reports_what_existed() {
    let store = test_store();
    let a = p("A");
    for id in ["1", "2", "3"] {
        store.put(&a, id, json!({})).await.unwrap();
    }
    let ids: Vec<String> = ["1", "3", "9"].iter().map(|s| s.to_string()).collect();
    assert_eq!(store.delete_many(&a, &ids).await.unwrap(), 2);
    assert_eq!(store.count(&a).await.unwrap(), 1);
}

#[tokio::test]
async fn get_and_delete_returns_the_removed_value() {
    let store = test_store();
    let a = p("A");
    store.put(&a, "k", json!({"v": 1})).await.unwrap();

    let got = store.get_and_delete(&a, "k").await.unwrap().unwrap();
    assert_eq!(got.payload, json!({"v": 1}));
    assert!(store.get(&a, "k").await.unwrap().is_none());
    assert!(store.get_and_delete(&a, "k").await.unwrap().is_none());
    assert_eq!(store.count(&a).await.unwrap(), 0);
}

#[tokio::test]
async fn get_and_delete_many_keeps_input_order() {
    let store = test_store();
    let a = p("A");
    for id in ["1", "2", "3"] {
        store.put(&a, id, json!({"id": id})).await.unwrap();
    }
    let ids: Vec<String> = ["3", "x", "1"].iter().map(|s| s.to_string()).collect();
    let got = store.get_and_delete_many(&a, &ids).await.unwrap();
    assert_eq!(got[0].as_ref().unwrap().id, "3");
    assert!(got[1].is_none());
    assert_eq!(got[2].as_ref().unwrap().id, "1");
    assert_eq!(store.count(&a).await.unwrap(), 1);
}

#[tokio::test]
async fn cursor_pages_in_key_order_and_rewinds() {
    let store = test_store();
    let a = p("A");
    for id in ["e", "c", "a", "d", "b"] {
        store.put(&a, id, json!({})).await.unwrap();
    }

    let mut cursor = store.cursor(&a).page_size(2);
    let mut ids = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        ids.push(record.id);
    }
    assert_eq!(ids, ["a", "b", "c", "d", "e"]);
    assert!(cursor.next().await.unwrap().is_none());

    cursor.rewind();
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "a");
}

#[tokio::test]
async fn cursor_skips_records_deleted_ahead_of_it() {
    let store = test_store();
    let a = p("A");
    for id in ["1", "2", "3", "4"] {
        store.put(&a, id, json!({})).await.unwrap();
    }

    let mut cursor = store.cursor(&a).page_size(1);
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "1");
    store.delete(&a, "2").await.unwrap();
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "3");
}

#[tokio::test]
async fn cursor_stops_at_the_last_key_seen_at_start() {
    let store = test_store();
    let a = p("A");
    for id in ["1", "2", "3"] {
        store.put(&a, id, json!({})).await.unwrap();
    }

    let mut cursor = store.cursor(&a).page_size(1);
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "1");
    store.put(&a, "25", json!({})).await.unwrap();
    store.put(&a, "9", json!({})).await.unwrap();

    let mut rest = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        rest.push(record.id);
    }
    assert_eq!(rest, ["2", "25", "3"]);

    cursor.rewind();
    let mut all = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        all.push(record.id);
    }
    assert_eq!(all, ["1", "2", "25", "3", "9"]);
}

#[tokio::test]
async fn cursor_ends_when_last_key_is_deleted_mid_walk() {
    let store = test_store();
    let a = p("A");
    for id in ["1", "2", "3"] {
        store.put(&a, id, json!({})).await.unwrap();
    }

    let mut cursor = store.cursor(&a).page_size(2);
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "1");
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "2");
    store.delete(&a, "3").await.unwrap();
    store.put(&a, "4", json!({})).await.unwrap();
    assert!(cursor.next().await.unwrap().is_none());
}

#[tokio::test]
async fn cursor_over_empty_partition_yields_nothing() {
    let store = test_store();
    let mut cursor = store.cursor(&p("empty"));
    assert!(cursor.next().await.unwrap().is_none());
}

#[tokio::test]
async fn for_each_visits_every_record() {
    let store = test_store();
    let a = p("A");
    for i in 0..5 {
        store.put(&a, &i.to_string(), json!({"i": i})).await.unwrap();
    }
    let mut total = 0;
    store
        .for_each(&a, |r| total += r.payload["i"].as_i64().unwrap())
        .await
        .unwrap();
    assert_eq!(total, 10);
}
