//! End-to-end KV RPC over a real TCP server.

mod common;

use std::time::Duration;

use heron_client::Client;
use heron_common::error::{ClientError, KvError};
use heron_kv::{ScanOptions, VMetaReq};

#[tokio::test]
async fn test_oneshot_set_get_delete_exists() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    assert!(!c.exists(b"nonExistingKey").await.unwrap());

    c.set(b"key1", b"value1", None).await.unwrap();
    let (v, _) = c.get(b"key1").await.unwrap();
    assert_eq!(v, b"value1");

    c.delete(b"key1").await.unwrap();
    let err = c.get(b"key1").await.unwrap_err();
    assert!(err.is_key_not_found());
}

#[tokio::test]
async fn test_interactive_update() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    c.update(|txn| {
        Box::pin(async move {
            txn.set(b"key2", b"value2", None).await?;

            let (v, _) = txn.get(b"key2").await?;
            assert_eq!(v, b"value2");

            txn.delete(b"key2").await?;
            let err = txn.get(b"key2").await.unwrap_err();
            assert!(err.is_key_not_found());

            assert!(!txn.exists(b"nonExistingKey").await?);
            Ok(())
        })
    })
    .await
    .unwrap();

    // Committed transaction left no trace of key2.
    assert!(!c.exists(b"key2").await.unwrap());
}

#[tokio::test]
async fn test_update_error_discards_writes() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let result = c
        .update(|txn| {
            Box::pin(async move {
                txn.set(b"doomed", b"v", None).await?;
                Err(ClientError::Remote {
                    code: 999,
                    msg: "caller bailed".into(),
                })
            })
        })
        .await;
    assert!(result.is_err());

    assert!(!c.exists(b"doomed").await.unwrap());
}

#[tokio::test]
async fn test_view_is_read_only() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    c.set(b"key3", b"value3", None).await.unwrap();

    c.view(|txn| {
        Box::pin(async move {
            let (v, _) = txn.get(b"key3").await?;
            assert_eq!(v, b"value3");

            let err = txn.set(b"key3", b"x", None).await.unwrap_err();
            assert!(matches!(err, ClientError::Kv(KvError::MutateForRoTxn)));

            assert!(!txn.exists(b"nonExistingKey").await?);
            Ok(())
        })
    })
    .await
    .unwrap();

    c.delete(b"key3").await.unwrap();
}

#[tokio::test]
async fn test_scan_ordering_and_limit_everywhere() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let prefix = b"unique_prefix";
    let n = 10usize;
    for i in 0..n {
        let key = format!("unique_prefix:{i}");
        c.set(key.as_bytes(), &[i as u8], None).await.unwrap();
    }

    let opts = || ScanOptions {
        prefix: prefix.to_vec(),
        limit: n - 1,
        ..Default::default()
    };

    let check = |entries: Vec<heron_kv::Entry>| {
        assert_eq!(entries.len(), n - 1);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.key, format!("unique_prefix:{i}").as_bytes());
            assert_eq!(entry.value, [i as u8]);
        }
    };

    // One-shot scan.
    check(c.scan(opts()).await.unwrap());

    // Scan inside an update transaction.
    let mut txn = c.begin_update();
    let entries = txn.scan(opts()).await.unwrap();
    txn.commit().await.unwrap();
    check(entries);

    // Scan inside a view transaction.
    let mut txn = c.begin_view();
    let entries = txn.scan(opts()).await.unwrap();
    txn.discard().await.unwrap();
    check(entries);

    // Scans on an unchanged database are idempotent.
    let again = c.scan(opts()).await.unwrap();
    check(again);
}

#[tokio::test]
async fn test_scan_zero_limit_returns_nothing() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();
    c.set(b"p:1", b"v", None).await.unwrap();

    let entries = c
        .scan(ScanOptions {
            prefix: b"p:".to_vec(),
            limit: 0,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_value_meta_tag_travels_the_wire() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let meta = VMetaReq {
        ttl: Duration::from_secs(3600),
        tag: 42,
    };
    c.set(b"tagged", b"v", Some(meta)).await.unwrap();

    let (v, meta) = c.get(b"tagged").await.unwrap();
    assert_eq!(v, b"v");
    assert_eq!(meta.tag, 42);
    assert!(meta.expires_at > 0);
}

#[tokio::test]
async fn test_conflicting_commits_surface_conflict() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let mut a = c.begin_update();
    let mut b = c.begin_update();
    a.set(b"contested", b"a", None).await.unwrap();
    b.set(b"contested", b"b", None).await.unwrap();

    a.commit().await.unwrap();
    let err = b.commit().await.unwrap_err();
    assert!(matches!(err, ClientError::Kv(KvError::Conflict)));

    let (v, _) = c.get(b"contested").await.unwrap();
    assert_eq!(v, b"a");
}

#[tokio::test]
async fn test_empty_transaction_commit_and_discard_are_noops() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let mut txn = c.begin_update();
    txn.commit().await.unwrap();

    let mut txn = c.begin_view();
    txn.discard().await.unwrap();
}

#[tokio::test]
async fn test_transactions_interleave_on_one_connection() {
    let (addr, _engine) = common::start_server().await;
    let c = Client::connect(addr).await.unwrap();

    let mut a = c.begin_update();
    let mut b = c.begin_update();
    a.set(b"ka", b"1", None).await.unwrap();
    b.set(b"kb", b"2", None).await.unwrap();

    // Neither sees the other's uncommitted write.
    assert!(!a.exists(b"kb").await.unwrap());
    assert!(!b.exists(b"ka").await.unwrap());

    a.commit().await.unwrap();
    b.commit().await.unwrap();

    assert!(c.exists(b"ka").await.unwrap());
    assert!(c.exists(b"kb").await.unwrap());
}
