//! DDL owner: accepts schema-change submissions, runs the single background
//! worker that drains the durable job queue, and lets submitters wait for
//! their job to settle.

mod worker;

use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use heron_common::config::{choose_time, DocumentConfig};
use heron_common::error::DocumentError;
use heron_common::shutdown::ShutdownSignal;
use heron_kv::util::{run_in_update_txn, run_in_view_txn};
use heron_kv::KvEngine;

use crate::meta::{IdAllocator, Meta};
use crate::model::{ActionKind, CollectionInfo, DbInfo, Job, SchemaState};

/// Hook invoked after every worker iteration that touched a job.
pub struct DdlCallback {
    pub on_changed: Box<dyn Fn(Option<&DocumentError>) + Send + Sync>,
}

pub struct DdlOptions {
    pub config: DocumentConfig,
    pub callback: Option<DdlCallback>,
    /// Share with the `Db` handle when both run on one engine, so global-id
    /// generation stays serialized process-wide.
    pub id_alloc: Arc<IdAllocator>,
}

impl DdlOptions {
    pub fn new(config: DocumentConfig) -> Self {
        Self {
            config,
            callback: None,
            id_alloc: Arc::new(IdAllocator::new()),
        }
    }

    pub fn with_id_allocator(mut self, id_alloc: Arc<IdAllocator>) -> Self {
        self.id_alloc = id_alloc;
        self
    }

    pub fn with_callback(mut self, callback: DdlCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

pub(crate) struct DdlInner {
    pub(crate) engine: Arc<dyn KvEngine>,
    pub(crate) config: DocumentConfig,
    pub(crate) callback: Option<DdlCallback>,
    pub(crate) id_alloc: Arc<IdAllocator>,
    pub(crate) signal: ShutdownSignal,
}

/// The DDL owner. Dropping it stops the worker.
pub struct Ddl {
    inner: Arc<DdlInner>,
    notify_tx: SyncSender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Ddl {
    pub fn new(engine: Arc<dyn KvEngine>, options: DdlOptions) -> Self {
        let inner = Arc::new(DdlInner {
            engine,
            config: options.config,
            callback: options.callback,
            id_alloc: options.id_alloc,
            signal: ShutdownSignal::new(),
        });
        // Capacity 1: a pending wake-up is enough, extra notifies are
        // dropped and the ticker catches anything missed.
        let (notify_tx, notify_rx) = sync_channel(1);
        let worker_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("heron-ddl-worker".into())
            .spawn(move || worker::run(worker_inner, notify_rx))
            .expect("spawn ddl worker");
        Self {
            inner,
            notify_tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Submit a create-schema job for a database with the given collections
    /// and wait until the worker settles it. Returns the allocated database
    /// id once the schema is synced.
    pub fn create_schema(
        &self,
        cancel: &ShutdownSignal,
        db_name: &str,
        collection_names: &[&str],
    ) -> Result<i64, DocumentError> {
        let alloc = self.inner.id_alloc.clone();
        let (db_id, job_id) = run_in_update_txn(&*self.inner.engine, |txn| {
            let mut m = Meta::new(txn);
            let ids = m.gen_global_ids(&alloc, collection_names.len() + 2)?;
            let (db_id, rest) = ids.split_first().expect("ids");
            let (job_id, collection_ids) = rest.split_last().expect("ids");

            let db_info = DbInfo {
                id: *db_id,
                name: db_name.to_string(),
                state: SchemaState::None,
                collections: collection_names
                    .iter()
                    .zip(collection_ids)
                    .map(|(name, cid)| CollectionInfo {
                        id: *cid,
                        name: (*name).to_string(),
                        state: SchemaState::None,
                        indices: vec![],
                    })
                    .collect(),
            };

            let job = Job::new(*job_id, ActionKind::CreateSchema, &db_info)?;
            m.enqueue_ddl_job(&job)?;
            Ok::<_, DocumentError>((*db_id, *job_id))
        })?;

        self.notify_worker();
        self.check_job(cancel, job_id, ActionKind::CreateSchema)?;
        Ok(db_id)
    }

    /// Wake the worker. Non-blocking: a full notify slot means a wake-up is
    /// already pending.
    pub fn notify_worker(&self) {
        let _ = self.notify_tx.try_send(());
    }

    pub fn history_job(&self, job_id: i64) -> Result<Option<Job>, DocumentError> {
        run_in_view_txn(&*self.inner.engine, |txn| {
            Meta::new(txn).history_ddl_job(job_id)
        })
    }

    /// Poll history until the job is synced or surfaces its recorded error.
    fn check_job(
        &self,
        cancel: &ShutdownSignal,
        job_id: i64,
        kind: ActionKind,
    ) -> Result<(), DocumentError> {
        let interval = choose_time(self.inner.config.lease() * 10, check_job_max_interval(kind));
        loop {
            if cancel.wait_timeout(interval) || self.inner.signal.is_shutdown() {
                return Err(DocumentError::Canceled);
            }

            let history = match self.history_job(job_id) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(job_id, error = %e, "read ddl history");
                    continue;
                }
            };
            let Some(job) = history else {
                tracing::debug!(job_id, "job not yet in history");
                continue;
            };

            if job.is_synced() {
                return Ok(());
            }
            match job.error {
                Some(err) => return Err(err.into_document_error()),
                // A job can only be archived unsynced through a failure
                // path, which always records the error.
                None => unreachable!(
                    "job {} archived in state {:?} without an error",
                    job.id, job.state
                ),
            }
        }
    }

    pub fn stop(&self) {
        self.inner.signal.shutdown();
        let _ = self.notify_tx.try_send(());
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ddl {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_job_max_interval(kind: ActionKind) -> Duration {
    match kind {
        // Adding an index takes far longer to process.
        ActionKind::AddIndex => Duration::from_secs(3),
        ActionKind::CreateSchema | ActionKind::CreateCollection => Duration::from_millis(500),
        _ => Duration::from_secs(1),
    }
}
