//! Schema meta store: databases, collections, global ids, schema versions,
//! and the durable DDL job queues, all inside one caller transaction.
//!
//! Layout within the meta namespace:
//! - `dbs` hash: field `db:<id>` → DbInfo JSON
//! - `db:<id>` hash: field `collection:<cid>` → CollectionInfo JSON,
//!   field `collectionAutoID:<cid>` → counter
//! - string counters `nextGlobalID`, `schemaVersion`
//! - strings `schemaDiff:<version>` → SchemaDiff JSON
//! - lists `DDLJobList` / `DDLJobAddIdxList`, hash `DDLJobHistory`

use parking_lot::Mutex;

use heron_common::error::{DocumentError, KvError, StructureError};
use heron_kv::KvTxn;
use heron_structure::TxStructure;

use crate::keys::meta_prefix;
use crate::model::{CollectionInfo, DbInfo, Job, SchemaDiff};

const DBS_KEY: &[u8] = b"dbs";
const NEXT_GLOBAL_ID_KEY: &[u8] = b"nextGlobalID";
const SCHEMA_VERSION_KEY: &[u8] = b"schemaVersion";
const COLLECTION_PREFIX: &[u8] = b"collection:";

const DDL_JOB_LIST_KEY: &[u8] = b"DDLJobList";
const DDL_JOB_ADD_IDX_LIST_KEY: &[u8] = b"DDLJobAddIdxList";
const DDL_JOB_HISTORY_KEY: &[u8] = b"DDLJobHistory";

/// Serializes global-id generation across concurrent meta transactions, so
/// two transactions never race the same read-modify-write on `nextGlobalID`.
#[derive(Default)]
pub struct IdAllocator {
    lock: Mutex<()>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Which DDL queue a `Meta` handle operates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobListKey {
    /// All actions except "add index".
    #[default]
    Default,
    /// Add-index jobs only; they are long-running and get their own queue.
    AddIndex,
}

impl JobListKey {
    fn key(self) -> &'static [u8] {
        match self {
            JobListKey::Default => DDL_JOB_LIST_KEY,
            JobListKey::AddIndex => DDL_JOB_ADD_IDX_LIST_KEY,
        }
    }
}

/// Meta operations bound to one transaction.
pub struct Meta<'a> {
    t: TxStructure<'a>,
    job_list: JobListKey,
}

impl<'a> Meta<'a> {
    pub fn new(txn: &'a mut dyn KvTxn) -> Self {
        Self::with_job_list(txn, JobListKey::Default)
    }

    pub fn with_job_list(txn: &'a mut dyn KvTxn, job_list: JobListKey) -> Self {
        Self {
            t: TxStructure::new(txn, meta_prefix()),
            job_list,
        }
    }

    // ── Global ids and schema version ────────────────────────────────────

    pub fn gen_global_id(&mut self, alloc: &IdAllocator) -> Result<i64, DocumentError> {
        let _guard = alloc.lock.lock();
        Ok(self.t.inc(NEXT_GLOBAL_ID_KEY, 1)?)
    }

    /// Generate `n` consecutive ids; the caller owns `(top - n, top]`.
    pub fn gen_global_ids(
        &mut self,
        alloc: &IdAllocator,
        n: usize,
    ) -> Result<Vec<i64>, DocumentError> {
        let _guard = alloc.lock.lock();
        let top = self.t.inc(NEXT_GLOBAL_ID_KEY, n as i64)?;
        Ok(((top - n as i64 + 1)..=top).collect())
    }

    pub fn get_global_id(&self) -> Result<i64, DocumentError> {
        Ok(self.t.get_i64(NEXT_GLOBAL_ID_KEY)?)
    }

    pub fn gen_schema_version(&mut self) -> Result<i64, DocumentError> {
        Ok(self.t.inc(SCHEMA_VERSION_KEY, 1)?)
    }

    pub fn get_schema_version(&self) -> Result<i64, DocumentError> {
        Ok(self.t.get_i64(SCHEMA_VERSION_KEY)?)
    }

    // ── Keys ─────────────────────────────────────────────────────────────

    fn db_key(db_id: i64) -> Vec<u8> {
        format!("db:{db_id}").into_bytes()
    }

    fn collection_key(cid: i64) -> Vec<u8> {
        format!("collection:{cid}").into_bytes()
    }

    fn collection_auto_id_key(cid: i64) -> Vec<u8> {
        format!("collectionAutoID:{cid}").into_bytes()
    }

    // ── Existence preconditions ──────────────────────────────────────────

    fn check_db_exists(&self, db_key: &[u8]) -> Result<(), DocumentError> {
        match self.t.hget(DBS_KEY, db_key) {
            Ok(_) => Ok(()),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Err(DocumentError::DbNotExists),
            Err(e) => Err(e.into()),
        }
    }

    fn check_db_not_exists(&self, db_key: &[u8]) -> Result<(), DocumentError> {
        match self.t.hget(DBS_KEY, db_key) {
            Ok(_) => Err(DocumentError::DbExists),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn check_collection_exists(
        &self,
        db_key: &[u8],
        collection_key: &[u8],
    ) -> Result<(), DocumentError> {
        match self.t.hget(db_key, collection_key) {
            Ok(_) => Ok(()),
            Err(StructureError::Kv(KvError::KeyNotFound)) => {
                Err(DocumentError::CollectionNotExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_collection_not_exists(
        &self,
        db_key: &[u8],
        collection_key: &[u8],
    ) -> Result<(), DocumentError> {
        match self.t.hget(db_key, collection_key) {
            Ok(_) => Err(DocumentError::CollectionExists),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ── Databases ────────────────────────────────────────────────────────

    pub fn create_database(&mut self, db_info: &DbInfo) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_info.id);
        self.check_db_not_exists(&db_key)?;
        let data = encode_json(db_info)?;
        Ok(self.t.hset(DBS_KEY, &db_key, &data)?)
    }

    pub fn update_database(&mut self, db_info: &DbInfo) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_info.id);
        self.check_db_exists(&db_key)?;
        let data = encode_json(db_info)?;
        Ok(self.t.hset(DBS_KEY, &db_key, &data)?)
    }

    pub fn drop_database(&mut self, db_id: i64) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        self.t.hclear(&db_key)?;
        Ok(self.t.hdel(DBS_KEY, &db_key)?)
    }

    pub fn get_database(&self, db_id: i64) -> Result<DbInfo, DocumentError> {
        let db_key = Self::db_key(db_id);
        match self.t.hget(DBS_KEY, &db_key) {
            Ok(raw) => decode_json(&raw),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Err(DocumentError::DbNotExists),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_databases(&self) -> Result<Vec<DbInfo>, DocumentError> {
        let pairs = self.t.hget_all(DBS_KEY)?;
        pairs.iter().map(|p| decode_json(&p.value)).collect()
    }

    // ── Collections ──────────────────────────────────────────────────────

    pub fn create_collection(
        &mut self,
        db_id: i64,
        collection_info: &CollectionInfo,
    ) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        let collection_key = Self::collection_key(collection_info.id);
        self.check_collection_not_exists(&db_key, &collection_key)?;
        let data = encode_json(collection_info)?;
        Ok(self.t.hset(&db_key, &collection_key, &data)?)
    }

    pub fn update_collection(
        &mut self,
        db_id: i64,
        collection_info: &CollectionInfo,
    ) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        let collection_key = Self::collection_key(collection_info.id);
        self.check_collection_exists(&db_key, &collection_key)?;
        let data = encode_json(collection_info)?;
        Ok(self.t.hset(&db_key, &collection_key, &data)?)
    }

    /// Drop a collection; `del_auto_id` also removes its auto-id counter.
    pub fn drop_collection(
        &mut self,
        db_id: i64,
        cid: i64,
        del_auto_id: bool,
    ) -> Result<(), DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        let collection_key = Self::collection_key(cid);
        self.check_collection_exists(&db_key, &collection_key)?;
        self.t.hdel(&db_key, &collection_key)?;
        if del_auto_id {
            self.t.hdel(&db_key, &Self::collection_auto_id_key(cid))?;
        }
        Ok(())
    }

    pub fn get_collection(&self, db_id: i64, cid: i64) -> Result<CollectionInfo, DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        match self.t.hget(&db_key, &Self::collection_key(cid)) {
            Ok(raw) => decode_json(&raw),
            Err(StructureError::Kv(KvError::KeyNotFound)) => {
                Err(DocumentError::CollectionNotExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All collections of a database. The per-db hash also carries auto-id
    /// counters, so filter on the collection field prefix.
    pub fn list_collections(&self, db_id: i64) -> Result<Vec<CollectionInfo>, DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        let pairs = self.t.hget_all(&db_key)?;
        pairs
            .iter()
            .filter(|p| p.field.starts_with(COLLECTION_PREFIX))
            .map(|p| decode_json(&p.value))
            .collect()
    }

    /// Add `step` to the collection's auto id and return the sum.
    pub fn gen_auto_collection_id(
        &mut self,
        db_id: i64,
        cid: i64,
        step: i64,
    ) -> Result<i64, DocumentError> {
        let db_key = Self::db_key(db_id);
        self.check_db_exists(&db_key)?;
        let collection_key = Self::collection_key(cid);
        self.check_collection_exists(&db_key, &collection_key)?;
        Ok(self
            .t
            .hinc(&db_key, &Self::collection_auto_id_key(cid), step)?)
    }

    pub fn get_auto_collection_id(&self, db_id: i64, cid: i64) -> Result<i64, DocumentError> {
        Ok(self
            .t
            .hget_i64(&Self::db_key(db_id), &Self::collection_auto_id_key(cid))?)
    }

    // ── DDL queues ───────────────────────────────────────────────────────

    pub fn enqueue_ddl_job(&mut self, job: &Job) -> Result<(), DocumentError> {
        let data = job.encode()?;
        Ok(self.t.rpush(self.job_list.key(), &data)?)
    }

    pub fn dequeue_ddl_job(&mut self) -> Result<Option<Job>, DocumentError> {
        match self.t.lpop(self.job_list.key())? {
            Some(raw) => Ok(Some(Job::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn ddl_job_by_idx(&self, index: i64) -> Result<Option<Job>, DocumentError> {
        match self.t.lindex(self.job_list.key(), index)? {
            Some(raw) => Ok(Some(Job::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn update_ddl_job(&mut self, index: i64, job: &Job) -> Result<(), DocumentError> {
        let data = job.encode()?;
        Ok(self.t.lset(self.job_list.key(), index, &data)?)
    }

    pub fn ddl_job_queue_len(&self) -> Result<i64, DocumentError> {
        Ok(self.t.llen(self.job_list.key())?)
    }

    pub fn add_history_ddl_job(&mut self, job: &Job) -> Result<(), DocumentError> {
        let data = job.encode()?;
        Ok(self
            .t
            .hset(DDL_JOB_HISTORY_KEY, job.id.to_string().as_bytes(), &data)?)
    }

    pub fn history_ddl_job(&self, job_id: i64) -> Result<Option<Job>, DocumentError> {
        match self.t.hget(DDL_JOB_HISTORY_KEY, job_id.to_string().as_bytes()) {
            Ok(raw) => Ok(Some(Job::decode(&raw)?)),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Schema diffs ─────────────────────────────────────────────────────

    pub fn set_schema_diff(&mut self, diff: &SchemaDiff) -> Result<(), DocumentError> {
        let key = format!("schemaDiff:{}", diff.version).into_bytes();
        let data = encode_json(diff)?;
        Ok(self.t.set(&key, &data)?)
    }

    pub fn schema_diff(&self, version: i64) -> Result<Option<SchemaDiff>, DocumentError> {
        let key = format!("schemaDiff:{version}").into_bytes();
        match self.t.get(&key) {
            Ok(raw) => Ok(Some(decode_json(&raw)?)),
            Err(StructureError::Kv(KvError::KeyNotFound)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DocumentError> {
    serde_json::to_vec(value).map_err(|e| DocumentError::Codec(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, DocumentError> {
    serde_json::from_slice(raw).map_err(|e| DocumentError::Codec(e.to_string()))
}
