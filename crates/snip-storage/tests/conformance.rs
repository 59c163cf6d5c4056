//! Behaviour every storage backend must share, run against the backends
//! that need no external service.

use snip_core::codec::encode_url_code;
use snip_core::{Deadline, ErrorKind};
use snip_storage::{FileStorage, MemoryStorage, Storage};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: Option<TempDir>,
    storage: Arc<dyn Storage>,
}

fn memory() -> Fixture {
    Fixture {
        _dir: None,
        storage: Arc::new(MemoryStorage::new()),
    }
}

fn file() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = FileStorage::open(dir.path().join("urls.jsonl")).expect("open file storage");
    Fixture {
        _dir: Some(dir),
        storage: Arc::new(storage),
    }
}

fn urls(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

async fn write_is_idempotent_per_url(storage: Arc<dyn Storage>) {
    let first = storage
        .write_url(Deadline::never(), "https://example.com/a", 1)
        .await
        .unwrap();
    assert!(!first.conflict);
    assert_eq!(first.short_code, encode_url_code(1).unwrap());

    // another user writing the same URL gets the original owner's code
    let second = storage
        .write_url(Deadline::never(), "https://example.com/a", 2)
        .await
        .unwrap();
    assert!(second.conflict);
    assert_eq!(second.short_code, first.short_code);

    assert_eq!(storage.stats(Deadline::never()).await.unwrap(), 1);
    assert!(storage.user_urls(Deadline::never(), 2).await.is_err());
}

async fn batch_mixes_existing_and_new(storage: Arc<dyn Storage>) {
    storage
        .write_url(Deadline::never(), "https://example.com/old", 1)
        .await
        .unwrap();

    let result = storage
        .write_urls(
            Deadline::never(),
            &urls(&[
                "https://example.com/old",
                "https://example.com/new",
                "https://example.com/new",
            ]),
            1,
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result["https://example.com/old"].id, 1);
    assert_eq!(result["https://example.com/new"].id, 2);
    assert_eq!(
        result["https://example.com/new"].short_code,
        encode_url_code(2).unwrap()
    );
    assert_eq!(storage.stats(Deadline::never()).await.unwrap(), 2);
}

async fn read_distinguishes_unknown_and_deleted(storage: Arc<dyn Storage>) {
    let code = storage
        .write_url(Deadline::never(), "https://example.com/r", 1)
        .await
        .unwrap()
        .short_code;
    assert_eq!(
        storage.read_url(Deadline::never(), &code).await.unwrap(),
        "https://example.com/r"
    );

    let missing = storage
        .read_url(Deadline::never(), "zzzzzzzz")
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    storage
        .delete_urls(Deadline::never(), &[code.clone()])
        .await
        .unwrap();
    let gone = storage.read_url(Deadline::never(), &code).await.unwrap_err();
    assert_eq!(gone.kind(), ErrorKind::Gone);

    // deleted records still count and are still listed
    assert_eq!(storage.stats(Deadline::never()).await.unwrap(), 1);
    let listed = storage.user_urls(Deadline::never(), 1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].deleted);
}

async fn user_urls_are_in_creation_order(storage: Arc<dyn Storage>) {
    let err = storage.user_urls(Deadline::never(), 5).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    for path in ["one", "two", "three"] {
        storage
            .write_url(Deadline::never(), &format!("https://example.com/{path}"), 5)
            .await
            .unwrap();
    }
    storage
        .write_url(Deadline::never(), "https://example.com/other", 6)
        .await
        .unwrap();

    let listed = storage.user_urls(Deadline::never(), 5).await.unwrap();
    let ids: Vec<i64> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(listed.iter().all(|r| r.owner_user_id == 5));
}

async fn delete_checks_ownership(storage: Arc<dyn Storage>) {
    let written = storage
        .write_urls(
            Deadline::never(),
            &urls(&["https://example.com/1", "https://example.com/2"]),
            1,
        )
        .await
        .unwrap();
    let mine: Vec<String> = written.values().map(|r| r.short_code.clone()).collect();
    let theirs = storage
        .write_url(Deadline::never(), "https://example.com/3", 2)
        .await
        .unwrap()
        .short_code;

    storage
        .check_deleted_urls(Deadline::never(), 1, &mine)
        .await
        .unwrap();

    let mut mixed = mine.clone();
    mixed.push(theirs.clone());
    let err = storage
        .check_deleted_urls(Deadline::never(), 1, &mixed)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.to_string().contains(&theirs));

    let err = storage
        .check_deleted_urls(Deadline::never(), 1, &urls(&["zzzzzzzz"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    storage.delete_urls(Deadline::never(), &mine).await.unwrap();
    let err = storage
        .check_deleted_urls(Deadline::never(), 1, &mine)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    // deleting again is a no-op
    storage.delete_urls(Deadline::never(), &mine).await.unwrap();
    // the check never mutates
    assert_eq!(
        storage.read_url(Deadline::never(), &theirs).await.unwrap(),
        "https://example.com/3"
    );
}

async fn concurrent_writers_share_one_record(storage: Arc<dyn Storage>) {
    let mut handles = Vec::new();
    for owner in 0..16 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage
                .write_url(Deadline::never(), "https://example.com/race", owner)
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    let mut codes = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        if !outcome.conflict {
            created += 1;
        }
        codes.push(outcome.short_code);
    }

    assert_eq!(created, 1);
    codes.dedup();
    assert_eq!(codes.len(), 1);
    assert_eq!(storage.stats(Deadline::never()).await.unwrap(), 1);
}

async fn expired_batch_leaves_no_trace(storage: Arc<dyn Storage>) {
    let err = storage
        .write_urls(
            Deadline::after(Duration::ZERO),
            &urls(&["https://example.com/a", "https://example.com/b"]),
            1,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);

    assert_eq!(storage.stats(Deadline::never()).await.unwrap(), 0);
    let err = storage.user_urls(Deadline::never(), 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // no id was consumed by the aborted batch
    let outcome = storage
        .write_url(Deadline::never(), "https://example.com/a", 1)
        .await
        .unwrap();
    assert!(!outcome.conflict);
    assert_eq!(outcome.short_code, encode_url_code(1).unwrap());
}

async fn stop_is_repeatable(storage: Arc<dyn Storage>) {
    storage.stop().await;
    storage.stop().await;
}

macro_rules! conformance {
    ($backend:ident) => {
        mod $backend {
            #[tokio::test]
            async fn write_is_idempotent_per_url() {
                let fixture = super::$backend();
                super::write_is_idempotent_per_url(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn batch_mixes_existing_and_new() {
                let fixture = super::$backend();
                super::batch_mixes_existing_and_new(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn read_distinguishes_unknown_and_deleted() {
                let fixture = super::$backend();
                super::read_distinguishes_unknown_and_deleted(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn user_urls_are_in_creation_order() {
                let fixture = super::$backend();
                super::user_urls_are_in_creation_order(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn delete_checks_ownership() {
                let fixture = super::$backend();
                super::delete_checks_ownership(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn expired_batch_leaves_no_trace() {
                let fixture = super::$backend();
                super::expired_batch_leaves_no_trace(fixture.storage.clone()).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_writers_share_one_record() {
                let fixture = super::$backend();
                super::concurrent_writers_share_one_record(fixture.storage.clone()).await;
            }

            #[tokio::test]
            async fn stop_is_repeatable() {
                let fixture = super::$backend();
                super::stop_is_repeatable(fixture.storage.clone()).await;
            }
        }
    };
}

conformance!(memory);
conformance!(file);
