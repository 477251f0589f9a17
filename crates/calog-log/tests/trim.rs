mod common;

use calog_core::{MemoryBlockStore, StringEncoding};
use calog_log::{AppendOptions, Log, LogOptionsBuilder, TrimOptions};
use common::{hashes, payloads, sync, Harness};
use std::sync::Arc;

/// Two logs with interleaved appends, joined into the first:
/// canonical order is [a1, b1, a2, b2].
async fn joined(h: &Harness) -> Log<StringEncoding> {
    let log1 = h.log(0).await;
    let log2 = h.log(1).await;
    for (log, v) in [(&log1, "a1"), (&log2, "b1"), (&log1, "a2"), (&log2, "b2")] {
        log.append(&v.to_string(), AppendOptions::new()).await.unwrap();
    }
    sync(&log1, &log2).await;
    log1
}

#[tokio::test]
async fn trims_to_length() {
    let expected: [&[&str]; 4] = [
        &["b2"],
        &["a2", "b2"],
        &["b1", "a2", "b2"],
        &["a1", "b1", "a2", "b2"],
    ];
    for (i, want) in expected.iter().enumerate() {
        let h = Harness::new(2);
        let log = joined(&h).await;
        log.trim(&TrimOptions::length(i + 1)).await.unwrap();
        assert_eq!(payloads(&log), *want, "trim to {}", i + 1);
    }
}

#[tokio::test]
async fn trim_to_one_keeps_newest_entry() {
    let h = Harness::new(2);
    let log = joined(&h).await;
    let newest = log.values().pop().unwrap();

    let removed = log.trim(&TrimOptions::length(1)).await.unwrap();

    assert_eq!(removed.len(), 3);
    assert_eq!(log.len(), 1);
    assert_eq!(log.values(), vec![newest.clone()]);
    assert_eq!(newest.next().len(), 1);
    assert_eq!(hashes(&log.heads()), vec![*newest.hash()]);
}

#[tokio::test]
async fn trim_deletes_blocks_and_emits_removed() {
    let h = Harness::new(2);
    let log = joined(&h).await;
    let mut events = log.subscribe();
    let oldest = log.values()[0].clone();

    log.trim(&TrimOptions::length(3)).await.unwrap();

    assert!(!log.storage().has(oldest.hash()).await.unwrap());
    assert!(log.is_tombstoned(oldest.hash()));
    let change = events.recv().await.unwrap();
    assert!(change.added.is_empty());
    assert_eq!(hashes(&change.removed), vec![*oldest.hash()]);
}

#[tokio::test]
async fn trim_beyond_length_is_noop() {
    let h = Harness::new(2);
    let log = joined(&h).await;
    let before = hashes(&log.values());

    assert!(log.trim(&TrimOptions::length(4)).await.unwrap().is_empty());
    assert!(log.trim(&TrimOptions::length(100)).await.unwrap().is_empty());
    assert_eq!(hashes(&log.values()), before);
}

#[tokio::test]
async fn trims_to_byte_length() {
    let h = Harness::new(2);
    let log = joined(&h).await;
    let values = log.values();
    let newest_two: usize = values[2..].iter().map(|e| e.byte_len()).sum();

    assert!(log
        .trim(&TrimOptions::byte_length(log.byte_len()))
        .await
        .unwrap()
        .is_empty());

    let removed = log
        .trim(&TrimOptions::byte_length(newest_two))
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(payloads(&log), vec!["a2", "b2"]);
    assert_eq!(log.byte_len(), newest_two);
}

#[tokio::test]
async fn trims_automatically_after_append() {
    let h = Harness::new(1);
    let options = LogOptionsBuilder::new().trim(TrimOptions::length(3)).build();
    let log = h.log_on(0, Arc::new(MemoryBlockStore::new()), options).await;

    for i in 0..10 {
        log.append(&format!("e{}", i), AppendOptions::new()).await.unwrap();
    }
    let result = log.append(&"e10".to_string(), AppendOptions::new()).await.unwrap();

    assert_eq!(payloads(&log), vec!["e8", "e9", "e10"]);
    assert_eq!(result.removed.len(), 1);
}

#[tokio::test]
async fn join_after_trim_tolerates_pruned_ancestors() {
    let h = Harness::new(2);
    let log1 = h.log(0).await;
    let log2 = h.log(1).await;

    for i in 0..4 {
        log1.append(&format!("a{}", i), AppendOptions::new()).await.unwrap();
    }
    sync(&log2, &log1).await;
    log2.trim(&TrimOptions::length(1)).await.unwrap();

    // log1 builds on a3; its ancestors a0..a2 are gone from log2.
    let a4 = log1.append(&"a4".to_string(), AppendOptions::new()).await.unwrap().entry;
    let report = log2.join([a4.clone()]).await.unwrap();

    assert!(report.rejected.is_empty());
    assert_eq!(payloads(&log2), vec!["a3", "a4"]);

    // A concurrent branch forking from a trimmed entry is still accepted.
    let a2 = log1.values()[2].clone();
    let fork = log1
        .append(&"fork".to_string(), AppendOptions::new().with_next(vec![a2.clone()]))
        .await
        .unwrap()
        .entry;
    assert!(log2.is_tombstoned(a2.hash()));
    let report = log2.join([fork.clone()]).await.unwrap();

    assert!(report.rejected.is_empty());
    assert_eq!(hashes(&report.added), vec![*fork.hash()]);
    assert!(!log2.has(a2.hash()));
    assert_eq!(log2.heads().len(), 2);
}
