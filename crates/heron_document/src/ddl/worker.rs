//! The single DDL worker loop.
//!
//! One iteration drains the head of the job queue inside a fresh RW meta
//! transaction: settled jobs move to history, runnable jobs execute under a
//! panic-recovery guard, failures retry up to `JOB_MAX_ERROR_COUNT` times
//! unless the handler demands immediate failure. A schema change becomes
//! visible after `2 x lease`, which the loop waits out before the next job.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use heron_common::config::choose_time;
use heron_common::error::DocumentError;
use heron_kv::{KvEngine, KvTxn};

use crate::ddl::DdlInner;
use crate::dml::{create_sequence, drop_sequence_if_exists, try_until_success};
use crate::meta::Meta;
use crate::model::{
    job_error_from, ActionKind, DbInfo, Job, JobError, JobErrorCode, JobState, SchemaDiff,
    SchemaState,
};

const JOB_MAX_ERROR_COUNT: i32 = 3;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Outcome of one `run_job` dispatch.
struct RunOutcome {
    schema_version: i64,
    /// Invoked if the surrounding meta transaction fails to commit.
    cleanup: Option<Cleanup>,
    /// Skip retries and finish the job on this error.
    fail_now: bool,
    result: Result<(), DocumentError>,
}

impl RunOutcome {
    fn ok() -> Self {
        Self {
            schema_version: 0,
            cleanup: None,
            fail_now: false,
            result: Ok(()),
        }
    }

    fn err(e: DocumentError) -> Self {
        Self {
            schema_version: 0,
            cleanup: None,
            fail_now: false,
            result: Err(e),
        }
    }
}

pub(crate) fn run(inner: Arc<DdlInner>, notify_rx: Receiver<()>) {
    let tick = choose_time(
        inner.config.lease() * 2,
        inner.config.worker_max_tick_interval(),
    );
    tracing::info!(tick_ms = tick.as_millis() as u64, "ddl worker started");

    loop {
        match notify_rx.recv_timeout(tick) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if inner.signal.is_shutdown() {
            break;
        }
        if let Err(e) = handle_job_queue(&inner) {
            tracing::error!(error = %e, "handle ddl job queue");
        }
        if inner.signal.is_shutdown() {
            break;
        }
    }
    tracing::info!("ddl worker stopped");
}

/// Drain the queue until it is empty or an iteration fails.
fn handle_job_queue(inner: &Arc<DdlInner>) -> Result<(), DocumentError> {
    loop {
        let mut no_job = false;
        let mut outcome = RunOutcome::ok();

        let mut txn = inner.engine.begin(true)?;
        let body: Result<(), DocumentError> = {
            let mut m = Meta::new(txn.as_mut());
            process_head_job(inner, &mut m, &mut no_job, &mut outcome)
        };

        match body {
            Ok(()) => {
                if let Err(commit_err) = txn.commit() {
                    if let Some(cleanup) = outcome.cleanup.take() {
                        cleanup();
                    }
                    let err = DocumentError::from(commit_err);
                    notify_changed(inner, Some(&err));
                    return Err(err);
                }
            }
            Err(e) => {
                txn.discard();
                if let Some(cleanup) = outcome.cleanup.take() {
                    cleanup();
                }
                notify_changed(inner, Some(&e));
                return Err(e);
            }
        }

        if no_job {
            return Ok(());
        }

        notify_changed(inner, outcome.result.as_ref().err());

        if outcome.result.is_err() {
            // Coarse back-off before the retry tick.
            inner.signal.wait_timeout(Duration::from_secs(1));
        }
        wait_schema_changed(inner);
        if inner.signal.is_shutdown() {
            return Ok(());
        }
    }
}

/// One queue-head step inside the open meta transaction.
fn process_head_job(
    inner: &Arc<DdlInner>,
    m: &mut Meta<'_>,
    no_job: &mut bool,
    outcome: &mut RunOutcome,
) -> Result<(), DocumentError> {
    let Some(mut job) = m.ddl_job_by_idx(0)? else {
        *no_job = true;
        return Ok(());
    };

    if job.is_done() || job.is_rollback_done() {
        if !job.is_rollback_done() {
            job.state = JobState::Synced;
        }
        return finish_job(m, &job);
    }

    *outcome = match catch_unwind(AssertUnwindSafe(|| run_job(inner, m, &mut job))) {
        Ok(o) => o,
        Err(_) => {
            // A buggy handler must not tear the worker down; flip the job
            // into rollback instead.
            job.state = JobState::Cancelling;
            job.error.get_or_insert(JobError {
                code: JobErrorCode::Other,
                msg: "ddl job handler panicked".into(),
            });
            RunOutcome::ok()
        }
    };

    if let Err(err) = &outcome.result {
        job.error_count += 1;
        job.error = Some(job_error_from(err));
        tracing::error!(job_id = job.id, error = %err, "run ddl job");
        if outcome.fail_now || job.error_count >= JOB_MAX_ERROR_COUNT {
            if !job.is_finished() && !job.is_cancelling() {
                job.state = JobState::Cancelled;
            }
            return finish_job(m, &job);
        }
    }

    if job.is_cancelled() {
        return finish_job(m, &job);
    }

    m.update_ddl_job(0, &job)
}

fn run_job(inner: &Arc<DdlInner>, m: &mut Meta<'_>, job: &mut Job) -> RunOutcome {
    if job.is_finished() {
        return RunOutcome::ok();
    }
    if job.is_cancelling() {
        // Sequence cleanup already ran on the failure path; all that is
        // left is to settle the job.
        job.state = JobState::RollbackDone;
        job.error.get_or_insert(JobError {
            code: JobErrorCode::Other,
            msg: "ddl job rolled back".into(),
        });
        return RunOutcome::ok();
    }

    job.state = JobState::Running;
    match job.kind {
        ActionKind::CreateSchema => on_create_schema(inner, m, job),
        kind => {
            job.state = JobState::Cancelled;
            RunOutcome::err(DocumentError::InvalidJobKind(kind as u8))
        }
    }
}

fn on_create_schema(inner: &Arc<DdlInner>, m: &mut Meta<'_>, job: &mut Job) -> RunOutcome {
    let mut db_info: DbInfo = match job.decode_arg() {
        Ok(info) => info,
        Err(e) => {
            job.state = JobState::Cancelled;
            return RunOutcome::err(e);
        }
    };

    match db_name_exists(m, &db_info.name) {
        Ok(true) => {
            return RunOutcome {
                schema_version: 0,
                cleanup: None,
                fail_now: true,
                result: Err(DocumentError::DbAlreadyExists(db_info.name)),
            }
        }
        Ok(false) => {}
        Err(e) => return RunOutcome::err(e),
    }

    let collection_ids: Vec<i64> = db_info.collections.iter().map(|c| c.id).collect();
    let cleanup = sequence_cleanup(inner, collection_ids.clone());

    let result = (|| -> Result<i64, DocumentError> {
        db_info.state = SchemaState::Public;
        for collection in &mut db_info.collections {
            create_sequence(&*inner.engine, collection.id)?;
            collection.state = SchemaState::Public;
            for index in &mut collection.indices {
                index.state = SchemaState::Public;
            }
        }

        m.create_database(&db_info)?;
        for collection in &db_info.collections {
            m.create_collection(db_info.id, collection)?;
        }

        let version = update_schema_version(m, job, &collection_ids)?;
        job.finish_db_job(JobState::Done, SchemaState::Public, version, &db_info)?;
        Ok(version)
    })();

    match result {
        Ok(version) => RunOutcome {
            schema_version: version,
            cleanup: Some(cleanup),
            fail_now: false,
            result: Ok(()),
        },
        Err(e) => {
            // Unwind any sequences created before the failure.
            cleanup();
            RunOutcome::err(e)
        }
    }
}

/// Bump the schema version and record what changed at it.
fn update_schema_version(
    m: &mut Meta<'_>,
    job: &Job,
    collection_ids: &[i64],
) -> Result<i64, DocumentError> {
    let version = m.gen_schema_version()?;
    let diff = SchemaDiff {
        version,
        kind: job.kind,
        collection_ids: collection_ids.to_vec(),
        raw_arg: job.raw_arg.clone(),
    };
    m.set_schema_diff(&diff)?;
    Ok(version)
}

fn finish_job(m: &mut Meta<'_>, job: &Job) -> Result<(), DocumentError> {
    m.dequeue_ddl_job()?;
    m.add_history_ddl_job(job)
}

fn db_name_exists(m: &Meta<'_>, name: &str) -> Result<bool, DocumentError> {
    Ok(m.list_databases()?.iter().any(|db| db.name == name))
}

/// Drop the document sequences of the given collections, retrying each until
/// it succeeds or shutdown is requested.
fn sequence_cleanup(inner: &Arc<DdlInner>, collection_ids: Vec<i64>) -> Cleanup {
    let engine = inner.engine.clone();
    let signal = inner.signal.clone();
    Box::new(move || {
        for cid in collection_ids {
            try_until_success(&signal, Duration::from_secs(1), || {
                match drop_sequence_if_exists(&*engine, cid) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(cid, error = %e, "drop sequence");
                        false
                    }
                }
            });
        }
    })
}

fn notify_changed(inner: &Arc<DdlInner>, err: Option<&DocumentError>) {
    if let Some(callback) = &inner.callback {
        (callback.on_changed)(err);
    }
}

/// Minimal interval before the new schema version is considered observed.
/// A multi-process deployment would poll peer versions here.
fn wait_schema_changed(inner: &Arc<DdlInner>) {
    let lease = inner.config.lease();
    if lease.is_zero() {
        return;
    }
    inner.signal.wait_timeout(lease * 2);
}
