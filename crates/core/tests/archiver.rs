//! Behavioural tests for the archiver write path against the in-memory store.
//!
//! Covers idempotence under both conflict policies, all-or-nothing
//! atomicity, per-record partial success, and how retry interacts with
//! transient and permanent storage failures.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use caselog_core::archiver::{Archiver, ArchiverConfig};
use caselog_core::caselog::{CaseLogRecord, ConflictPolicy, WriteMode};
use caselog_core::error::{CoreError, StorageError, StorageErrorKind};
use caselog_core::memory::InMemoryCaseLogStore;
use caselog_core::retry::RetryPolicy;

fn archiver(store: &InMemoryCaseLogStore, policy: ConflictPolicy) -> Archiver {
    Archiver::new(
        Arc::new(store.clone()),
        ArchiverConfig {
            policy,
            retry: RetryPolicy::new(3, Duration::ZERO),
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_policy_keeps_first_write() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let first = CaseLogRecord::new("A", "x").with_case_id("C1").with_comments("one");
    let second = CaseLogRecord::new("A", "y").with_case_id("C2").with_comments("two");

    archiver.write(&[first], WriteMode::AllOrNothing).await.unwrap();
    let before = store.get("A").await.unwrap();
    let result = archiver.write(&[second], WriteMode::AllOrNothing).await.unwrap();
    let after = store.get("A").await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after.name, "x");
    assert_eq!(result.inserted, 1);
    assert_eq!(result.rows_affected, Some(0));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn merge_policy_takes_second_write_and_keeps_identity() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Merge);

    let first = CaseLogRecord::new("A", "x")
        .with_case_id("C1")
        .with_comments("one")
        .with_status("Open");
    let second = CaseLogRecord::new("A", "y")
        .with_case_id("C2")
        .with_comments("two")
        .with_status("Closed");

    archiver.write(&[first], WriteMode::PerRecord).await.unwrap();
    let before = store.get("A").await.unwrap();
    archiver.write(&[second], WriteMode::PerRecord).await.unwrap();
    let after = store.get("A").await.unwrap();

    assert_eq!(after.id, before.id);
    assert_eq!(after.external_id, "A");
    assert_eq!(after.name, "y");
    assert_eq!(after.case_id.as_deref(), Some("C2"));
    assert_eq!(after.comments.as_deref(), Some("two"));
    // Archival metadata is write-once.
    assert_eq!(after.status.as_deref(), Some("Open"));
}

#[tokio::test]
async fn in_batch_duplicates_submitted_twice_under_merge_end_with_last_value() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Merge);
    let batch = vec![CaseLogRecord::new("A", "x"), CaseLogRecord::new("A", "y")];

    for mode in [WriteMode::AllOrNothing, WriteMode::PerRecord] {
        archiver.write(&batch, mode).await.unwrap();
        archiver.write(&batch, mode).await.unwrap();
        assert_eq!(store.get("A").await.unwrap().name, "y", "mode {mode}");
    }
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn in_batch_duplicates_under_skip_keep_first_value() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch = vec![CaseLogRecord::new("A", "x"), CaseLogRecord::new("A", "y")];

    let result = archiver.write(&batch, WriteMode::AllOrNothing).await.unwrap();

    assert_eq!(result.received, 2);
    assert_eq!(result.rows_affected, Some(1));
    assert_eq!(store.get("A").await.unwrap().name, "x");
}

// ---------------------------------------------------------------------------
// All-or-nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mid_batch_failure_leaves_no_rows() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_writes_for("B", StorageError::permanent("value too long for type"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch = vec![
        CaseLogRecord::new("A", "a"),
        CaseLogRecord::new("B", "b"),
        CaseLogRecord::new("C", "c"),
    ];

    let err = archiver.write(&batch, WriteMode::AllOrNothing).await.unwrap_err();

    assert_matches!(err, CoreError::Storage(StorageError { kind: StorageErrorKind::Permanent, .. }));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn invalid_record_rejects_whole_batch_before_storage() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch = vec![CaseLogRecord::new("A", "a"), CaseLogRecord::new("B", "")];

    let err = archiver.write(&batch, WriteMode::AllOrNothing).await.unwrap_err();

    assert_matches!(err, CoreError::Validation(msg) if msg.contains("record 1"));
    assert_eq!(store.session_requests().await, 0);
}

// ---------------------------------------------------------------------------
// Per-record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn per_record_reports_storage_failures_and_continues() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_writes_for("B", StorageError::permanent("violates check constraint"))
        .await;
    store
        .fail_writes_for("D", StorageError::permanent("violates check constraint"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch: Vec<_> = ["A", "B", "C", "D", "E"]
        .into_iter()
        .map(|id| CaseLogRecord::new(id, format!("record {id}")))
        .collect();

    let result = archiver.write(&batch, WriteMode::PerRecord).await.unwrap();

    assert_eq!(result.received, 5);
    assert_eq!(result.inserted, 3);
    assert_eq!(result.failed.len(), 2);
    let mut failed_ids: Vec<_> = result
        .failed
        .iter()
        .map(|f| f.external_id.clone().unwrap())
        .collect();
    failed_ids.sort();
    assert_eq!(failed_ids, vec!["B", "D"]);
    assert!(result.failed[0].error.contains("check constraint"));
    assert_eq!(store.len().await, 3);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn per_record_collects_invalid_records_without_storage_calls() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let mut missing_id = CaseLogRecord::new("X", "no id");
    missing_id.external_id = None;
    let batch = vec![
        CaseLogRecord::new("A", "a"),
        CaseLogRecord::new("B", "   "),
        missing_id,
    ];

    let result = archiver.write(&batch, WriteMode::PerRecord).await.unwrap();

    assert_eq!(result.inserted, 1);
    assert_eq!(result.failed.len(), 2);
    assert_eq!(result.failed[0].external_id.as_deref(), Some("B"));
    assert_eq!(result.failed[1].external_id, None);
    assert_eq!(store.write_calls().await, 1);
}

#[tokio::test]
async fn per_record_with_only_invalid_records_never_opens_a_session() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let result = archiver
        .write(&[CaseLogRecord::new("A", "")], WriteMode::PerRecord)
        .await
        .unwrap();

    assert_eq!(result.inserted, 0);
    assert_eq!(result.attempts, 0);
    assert_eq!(store.session_requests().await, 0);
}

// ---------------------------------------------------------------------------
// Validation never reaches storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_batch_is_a_client_error_in_both_modes() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);

    for mode in [WriteMode::AllOrNothing, WriteMode::PerRecord] {
        let err = archiver.write(&[], mode).await.unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }
    assert_eq!(store.session_requests().await, 0);
    assert_eq!(store.write_calls().await, 0);
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_then_success_writes_once() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_writes(2, StorageError::transient("could not serialize access"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch = vec![CaseLogRecord::new("A", "a"), CaseLogRecord::new("B", "b")];

    let result = archiver.write(&batch, WriteMode::AllOrNothing).await.unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(store.write_calls().await, 3);
    assert_eq!(store.session_requests().await, 3);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn transient_session_failures_retry_whole_per_record_call() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_sessions(2, StorageError::transient("connection refused"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Merge);
    let batch = vec![CaseLogRecord::new("A", "a"), CaseLogRecord::new("B", "b")];

    let result = archiver.write(&batch, WriteMode::PerRecord).await.unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(result.inserted, 2);
    assert!(result.failed.is_empty());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn transient_record_failure_retries_whole_per_record_call() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_writes(1, StorageError::transient("connection reset by peer"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);
    let batch = vec![CaseLogRecord::new("A", "a"), CaseLogRecord::new("B", "b")];

    let result = archiver.write(&batch, WriteMode::PerRecord).await.unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(result.inserted, 2);
    assert!(result.failed.is_empty(), "{:?}", result.failed);
    assert_eq!(store.session_requests().await, 2);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn retried_per_record_call_still_collects_permanent_failures() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Merge);
    archiver
        .write(&[CaseLogRecord::new("A", "first")], WriteMode::AllOrNothing)
        .await
        .unwrap();
    store
        .fail_writes_for("C", StorageError::permanent("invalid input syntax"))
        .await;
    store
        .fail_next_writes(1, StorageError::transient("server closed the connection"))
        .await;
    let batch: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|id| CaseLogRecord::new(id, format!("record {id}")))
        .collect();

    let result = archiver.write(&batch, WriteMode::PerRecord).await.unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(result.inserted, 3);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].external_id.as_deref(), Some("C"));
    assert_eq!(store.len().await, 3);
    let a = store.get("A").await.unwrap();
    assert_eq!(a.name, "record A");
    assert_eq!(a.revision, 1);
}

#[tokio::test]
async fn per_record_transient_failures_exhaust_into_storage_error() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_writes(3, StorageError::transient("deadlock detected"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let err = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::PerRecord)
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::Storage(e) if e.is_transient());
    assert_eq!(store.write_calls().await, 3);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn exhausted_retries_surface_the_transient_error() {
    let store = InMemoryCaseLogStore::new();
    store.set_available(false).await;
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let err = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::AllOrNothing)
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::Storage(e) if e.is_transient());
    assert_eq!(store.session_requests().await, 3);
}

#[tokio::test]
async fn permanent_failure_is_attempted_exactly_once() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_writes(1, StorageError::permanent("invalid input syntax"))
        .await;
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let err = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::AllOrNothing)
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::Storage(e) if !e.is_transient());
    assert_eq!(store.write_calls().await, 1);
    assert_eq!(store.session_requests().await, 1);
}

#[tokio::test]
async fn disabled_retry_gives_up_after_one_transient_failure() {
    let store = InMemoryCaseLogStore::new();
    store
        .fail_next_writes(1, StorageError::transient("deadlock detected"))
        .await;
    let archiver = Archiver::new(
        Arc::new(store.clone()),
        ArchiverConfig {
            retry: RetryPolicy::disabled(),
            ..Default::default()
        },
    );

    let err = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::AllOrNothing)
        .await
        .unwrap_err();

    assert_matches!(err, CoreError::Storage(e) if e.is_transient());
    assert_eq!(store.write_calls().await, 1);
}

// ---------------------------------------------------------------------------
// Storage timeout
// ---------------------------------------------------------------------------

fn impatient_archiver(store: &InMemoryCaseLogStore) -> Archiver {
    Archiver::new(
        Arc::new(store.clone()),
        ArchiverConfig {
            retry: RetryPolicy::new(3, Duration::ZERO),
            storage_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn slow_writes_time_out_as_transient_after_every_attempt() {
    let store = InMemoryCaseLogStore::new();
    store.delay_next_writes(3, Duration::from_secs(5)).await;
    let archiver = impatient_archiver(&store);

    for mode in [WriteMode::AllOrNothing, WriteMode::PerRecord] {
        let err = archiver
            .write(&[CaseLogRecord::new("A", "a")], mode)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Storage(ref e) if e.is_transient());
        assert!(err.to_string().contains("timed out"), "{err}");
        store.delay_next_writes(3, Duration::from_secs(5)).await;
    }

    assert_eq!(store.write_calls().await, 6);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn one_slow_write_is_retried_and_succeeds() {
    let store = InMemoryCaseLogStore::new();
    store.delay_next_writes(1, Duration::from_secs(5)).await;
    let archiver = impatient_archiver(&store);

    let result = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::AllOrNothing)
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(store.len().await, 1);
}

// ---------------------------------------------------------------------------
// Instrumentation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timings_are_reported_and_consistent() {
    let store = InMemoryCaseLogStore::new();
    let archiver = archiver(&store, ConflictPolicy::Skip);

    let result = archiver
        .write(&[CaseLogRecord::new("A", "a")], WriteMode::AllOrNothing)
        .await
        .unwrap();

    let timings = result.timings.expect("instrumentation is on by default");
    assert!(timings.total_time_ms >= timings.db_time_ms);
    assert!(timings.cpu_time_ms >= 0.0);
}
