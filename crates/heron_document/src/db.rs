//! The document database handle: owns the engine reference, the close
//! barrier, the global-id allocator, and the cache of collection handles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use heron_common::config::DocumentConfig;
use heron_common::error::{DocumentError, KvError, StructureError};
use heron_common::shutdown::CloseBarrier;
use heron_kv::util::run_in_update_txn;
use heron_kv::KvEngine;
use heron_structure::{decode_i64, encode_i64, TxStructure};

use crate::collection::Collection;
use crate::keys::meta_prefix;
use crate::meta::{IdAllocator, Meta};

/// Name→cid mapping for collections opened directly on a `Db` handle.
const COLLECTION_IDS_KEY: &[u8] = b"collectionIds";

#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    engine: Arc<dyn KvEngine>,
    config: DocumentConfig,
    barrier: CloseBarrier,
    id_alloc: Arc<IdAllocator>,
    collections: Mutex<HashMap<String, Collection>>,
}

impl Db {
    pub fn new(engine: Arc<dyn KvEngine>, config: DocumentConfig) -> Self {
        Self {
            inner: Arc::new(DbInner {
                engine,
                config,
                barrier: CloseBarrier::new(),
                id_alloc: Arc::new(IdAllocator::new()),
                collections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The allocator serializing global-id generation for this process.
    /// Share it with the `Ddl` owner when both run on one engine.
    pub fn id_allocator(&self) -> Arc<IdAllocator> {
        self.inner.id_alloc.clone()
    }

    pub fn engine(&self) -> Arc<dyn KvEngine> {
        self.inner.engine.clone()
    }

    /// Open (or create) the collection named `name`. The collection id is
    /// minted from the global id space on first open and persisted, so the
    /// same name maps to the same key range across restarts.
    pub fn collection(&self, name: &str) -> Result<Collection, DocumentError> {
        if self.inner.barrier.is_closing() {
            return Err(DocumentError::DbClosed);
        }

        let mut cache = self.inner.collections.lock();
        if let Some(c) = cache.get(name) {
            return Ok(c.clone());
        }

        let cid = self.lookup_or_mint_cid(name)?;
        let collection = Collection::new(
            self.inner.engine.clone(),
            self.inner.barrier.clone(),
            cid,
            name.to_string(),
            self.inner.config.doc_id_bandwidth,
        )?;
        cache.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    fn lookup_or_mint_cid(&self, name: &str) -> Result<i64, DocumentError> {
        let engine = self.inner.engine.clone();
        let alloc = self.inner.id_alloc.clone();
        run_in_update_txn(&*engine, |txn| -> Result<i64, DocumentError> {
            let existing = {
                let t = TxStructure::new(txn, meta_prefix());
                match t.hget(COLLECTION_IDS_KEY, name.as_bytes()) {
                    Ok(raw) => Some(decode_i64(&raw, "collection id")?),
                    Err(StructureError::Kv(KvError::KeyNotFound)) => None,
                    Err(e) => return Err(e.into()),
                }
            };
            if let Some(cid) = existing {
                return Ok(cid);
            }
            let cid = {
                let mut m = Meta::new(txn);
                m.gen_global_id(&alloc)?
            };
            let mut t = TxStructure::new(txn, meta_prefix());
            t.hset(COLLECTION_IDS_KEY, name.as_bytes(), &encode_i64(cid))?;
            Ok(cid)
        })
    }

    /// Stop admitting operations, wait for in-flight ones to drain, then
    /// hand each collection's unused ids back.
    pub fn close(&self) {
        self.inner.barrier.close();
        let cache = self.inner.collections.lock();
        for collection in cache.values() {
            if let Err(e) = collection.release_sequence() {
                tracing::error!(collection = collection.name(), error = %e, "release sequence");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_kv::provider::MemoryEngine;

    fn new_db() -> Db {
        Db::new(Arc::new(MemoryEngine::new()), DocumentConfig::default())
    }

    #[test]
    fn test_collection_handles_are_cached() {
        let db = new_db();
        let a = db.collection("c").unwrap();
        let b = db.collection("c").unwrap();
        assert_eq!(a.cid(), b.cid());
    }

    #[test]
    fn test_distinct_names_get_distinct_cids() {
        let db = new_db();
        let a = db.collection("a").unwrap();
        let b = db.collection("b").unwrap();
        assert_ne!(a.cid(), b.cid());
    }

    #[test]
    fn test_cid_mapping_survives_reopen() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let db = Db::new(engine.clone(), DocumentConfig::default());
        let cid = db.collection("c").unwrap().cid();
        db.close();

        let db2 = Db::new(engine, DocumentConfig::default());
        assert_eq!(db2.collection("c").unwrap().cid(), cid);
    }

    #[test]
    fn test_collection_after_close_fails() {
        let db = new_db();
        db.collection("c").unwrap();
        db.close();
        assert!(matches!(db.collection("c"), Err(DocumentError::DbClosed)));
    }
}
