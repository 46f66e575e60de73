//! Create-schema DDL jobs driven through the background worker.

use std::sync::Arc;

use heron_common::config::DocumentConfig;
use heron_common::error::DocumentError;
use heron_common::shutdown::ShutdownSignal;
use heron_document::keys::{document_sequence_keyword, sequence_key};
use heron_document::meta::Meta;
use heron_document::model::{ActionKind, Job, SchemaState};
use heron_document::{Ddl, DdlOptions};
use heron_kv::provider::MemoryEngine;
use heron_kv::util::{run_in_update_txn, run_in_view_txn};
use heron_kv::{KvEngine, KvTxn};

fn setup() -> (Arc<dyn KvEngine>, Ddl) {
    let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
    let ddl = Ddl::new(engine.clone(), DdlOptions::new(DocumentConfig::default()));
    (engine, ddl)
}

/// Job ids follow the db and collection ids out of the same allocator.
fn job_id_for(db_id: i64, collection_count: i64) -> i64 {
    db_id + collection_count + 1
}

#[test]
fn test_create_schema_reaches_synced() {
    let (engine, ddl) = setup();
    let cancel = ShutdownSignal::new();

    let db_id = ddl.create_schema(&cancel, "orders", &["items", "events"]).unwrap();

    run_in_view_txn(&*engine, |txn| {
        let collections = {
            let m = Meta::new(txn);

            let db = m.get_database(db_id)?;
            assert_eq!(db.name, "orders");
            assert_eq!(db.state, SchemaState::Public);

            let collections = m.list_collections(db_id)?;
            assert_eq!(collections.len(), 2);
            for c in &collections {
                assert_eq!(c.state, SchemaState::Public);
            }

            // Exactly one schema-version bump, with its diff recorded.
            assert_eq!(m.get_schema_version()?, 1);
            let diff = m.schema_diff(1)?.expect("schema diff");
            assert_eq!(diff.kind, ActionKind::CreateSchema);
            assert_eq!(diff.collection_ids.len(), 2);

            // The job is archived exactly once, synced.
            let job = m
                .history_ddl_job(job_id_for(db_id, 2))?
                .expect("job in history");
            assert!(job.is_synced());
            assert_eq!(m.ddl_job_queue_len()?, 0);
            collections
        };

        // Each collection got its own document sequence.
        for c in &collections {
            let key = sequence_key(&document_sequence_keyword(c.id));
            assert!(txn.exists(&key)?);
        }
        Ok::<_, DocumentError>(())
    })
    .unwrap();
}

#[test]
fn test_duplicate_schema_name_is_cancelled() {
    let (engine, ddl) = setup();
    let cancel = ShutdownSignal::new();

    let first = ddl.create_schema(&cancel, "dup", &["c"]).unwrap();

    let err = ddl.create_schema(&cancel, "dup", &["c2"]).unwrap_err();
    assert!(matches!(err, DocumentError::DbAlreadyExists(_)));

    let dup_db_id = first + 3; // next allocation after [db, c, job]
    run_in_view_txn(&*engine, |txn| {
        {
            let m = Meta::new(txn);

            // Only the first database exists and the version did not move.
            assert_eq!(m.list_databases()?.len(), 1);
            assert_eq!(m.get_schema_version()?, 1);
            assert_eq!(m.ddl_job_queue_len()?, 0);

            // The failed job is archived as cancelled, with its error.
            let job = m
                .history_ddl_job(job_id_for(dup_db_id, 1))?
                .expect("cancelled job in history");
            assert!(job.is_cancelled());
            assert!(job.error.is_some());
        }

        // No sequence was left behind for the duplicate's collection.
        let key = sequence_key(&document_sequence_keyword(dup_db_id + 1));
        assert!(!txn.exists(&key)?);
        Ok::<_, DocumentError>(())
    })
    .unwrap();
}

#[test]
fn test_unknown_job_kind_is_cancelled() {
    let (engine, ddl) = setup();

    // Enqueue a job the worker does not implement.
    let job_id = run_in_update_txn(&*engine, |txn| {
        let mut m = Meta::new(txn);
        let job = Job::new(777, ActionKind::DropSchema, &serde_json::json!({}))?;
        m.enqueue_ddl_job(&job)?;
        Ok::<_, DocumentError>(777)
    })
    .unwrap();

    ddl.notify_worker();

    // Poll history until the worker settles it.
    let signal = ShutdownSignal::new();
    let mut archived = None;
    for _ in 0..100 {
        archived = ddl.history_job(job_id).unwrap();
        if archived.is_some() {
            break;
        }
        signal.wait_timeout(std::time::Duration::from_millis(50));
    }
    let job = archived.expect("job should reach history");
    assert!(job.is_cancelled());
    assert!(job.error.is_some());
}

#[test]
fn test_sequential_schemas_bump_version_each() {
    let (engine, ddl) = setup();
    let cancel = ShutdownSignal::new();

    ddl.create_schema(&cancel, "one", &["a"]).unwrap();
    ddl.create_schema(&cancel, "two", &["b"]).unwrap();

    run_in_view_txn(&*engine, |txn| {
        let m = Meta::new(txn);
        assert_eq!(m.list_databases()?.len(), 2);
        assert_eq!(m.get_schema_version()?, 2);
        assert!(m.schema_diff(1)?.is_some());
        assert!(m.schema_diff(2)?.is_some());
        Ok::<_, DocumentError>(())
    })
    .unwrap();
}

#[test]
fn test_stop_is_idempotent_and_drop_safe() {
    let (_engine, ddl) = setup();
    ddl.stop();
    ddl.stop();
    drop(ddl);
}
