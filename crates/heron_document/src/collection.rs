//! Collection CRUD over sequence-minted document ids.
//!
//! Every operation runs the same prologue: reject when the owning `Db` has
//! closed, register with the close barrier, and release the slot on return.
//! When the caller supplies no transaction, a one-shot transaction is
//! synthesized and committed (mutators) or discarded (readers) exactly once.

use std::sync::Arc;

use heron_common::error::{DocumentError, KvError};
use heron_common::shutdown::{CloseBarrier, CloseGuard};
use heron_kv::util::{run_in_update_txn, run_in_view_txn};
use heron_kv::{KvEngine, KvTxn};

use crate::codec::{self, Document};
use crate::keys::{collection_document_key, document_sequence_keyword};
use crate::sequence::Sequence;

#[derive(Clone)]
pub struct Collection {
    engine: Arc<dyn KvEngine>,
    barrier: CloseBarrier,
    cid: i64,
    name: String,
    document_sequence: Arc<Sequence>,
}

impl Collection {
    pub(crate) fn new(
        engine: Arc<dyn KvEngine>,
        barrier: CloseBarrier,
        cid: i64,
        name: String,
        bandwidth: u64,
    ) -> Result<Self, DocumentError> {
        let document_sequence = Arc::new(Sequence::new(
            engine.clone(),
            &document_sequence_keyword(cid),
            bandwidth,
        )?);
        Ok(Self {
            engine,
            barrier,
            cid,
            name,
            document_sequence,
        })
    }

    pub fn cid(&self) -> i64 {
        self.cid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn prologue(&self) -> Result<CloseGuard<'_>, DocumentError> {
        if self.barrier.is_closing() {
            return Err(DocumentError::DbClosed);
        }
        self.barrier.enter().ok_or(DocumentError::DbClosing)
    }

    fn in_txn<T>(
        &self,
        writable: bool,
        txn: Option<&mut dyn KvTxn>,
        f: impl FnOnce(&mut dyn KvTxn) -> Result<T, DocumentError>,
    ) -> Result<T, DocumentError> {
        match txn {
            Some(t) => f(t),
            None if writable => run_in_update_txn(&*self.engine, f),
            None => run_in_view_txn(&*self.engine, f),
        }
    }

    /// Insert a document and return its freshly minted id.
    pub fn insert_one(
        &self,
        doc: &Document,
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<i64, DocumentError> {
        let data = codec::encode(doc)?;
        let _guard = self.prologue()?;

        let did = self.document_sequence.next()? as i64;
        let key = collection_document_key(self.cid, did);
        self.in_txn(true, txn, |t| {
            t.set(&key, &data, None)?;
            Ok(())
        })?;
        Ok(did)
    }

    /// Replace the document at `did`. Fails with `DocNotFound` when it does
    /// not exist.
    pub fn update_one(
        &self,
        did: i64,
        doc: &Document,
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<(), DocumentError> {
        self.update_impl(did, doc, false, txn).map(|_| ())
    }

    /// Create-or-replace. Returns `true` when the document was created.
    pub fn upsert_one(
        &self,
        did: i64,
        doc: &Document,
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<bool, DocumentError> {
        self.update_impl(did, doc, true, txn)
    }

    fn update_impl(
        &self,
        did: i64,
        doc: &Document,
        upsert: bool,
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<bool, DocumentError> {
        let data = codec::encode(doc)?;
        let _guard = self.prologue()?;

        let key = collection_document_key(self.cid, did);
        self.in_txn(true, txn, |t| {
            let exists = t.exists(&key)?;
            if !exists && !upsert {
                return Err(DocumentError::DocNotFound);
            }
            t.set(&key, &data, None)?;
            Ok(!exists)
        })
    }

    pub fn delete_one(&self, did: i64, txn: Option<&mut dyn KvTxn>) -> Result<(), DocumentError> {
        let _guard = self.prologue()?;
        let key = collection_document_key(self.cid, did);
        self.in_txn(true, txn, |t| {
            t.delete(&key)?;
            Ok(())
        })
    }

    pub fn get_one(
        &self,
        did: i64,
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<Document, DocumentError> {
        let _guard = self.prologue()?;
        let key = collection_document_key(self.cid, did);
        self.in_txn(false, txn, |t| match t.get(&key) {
            Ok((raw, _)) => codec::decode(&raw),
            Err(KvError::KeyNotFound) => Err(DocumentError::DocNotFound),
            Err(e) => Err(e.into()),
        })
    }

    pub fn get_many(
        &self,
        dids: &[i64],
        txn: Option<&mut dyn KvTxn>,
    ) -> Result<Vec<Document>, DocumentError> {
        let _guard = self.prologue()?;
        self.in_txn(false, txn, |t| {
            let mut docs = Vec::with_capacity(dids.len());
            for &did in dids {
                let key = collection_document_key(self.cid, did);
                match t.get(&key) {
                    Ok((raw, _)) => docs.push(codec::decode(&raw)?),
                    Err(KvError::KeyNotFound) => return Err(DocumentError::DocNotFound),
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(docs)
        })
    }

    pub(crate) fn release_sequence(&self) -> Result<(), DocumentError> {
        self.document_sequence.release_remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_common::config::DocumentConfig;
    use heron_kv::provider::MemoryEngine;
    use serde_json::json;

    use crate::db::Db;

    fn doc(key: &str, value: &str) -> Document {
        let mut d = Document::new();
        d.insert(key.into(), json!(value));
        d
    }

    fn new_db() -> Db {
        Db::new(Arc::new(MemoryEngine::new()), DocumentConfig::default())
    }

    #[test]
    fn test_insert_get_update_delete() {
        let db = new_db();
        let c = db.collection("c").unwrap();

        let did = c.insert_one(&doc("key", "value"), None).unwrap();
        assert!(did > 0);

        let got = c.get_one(did, None).unwrap();
        assert_eq!(got["key"], json!("value"));

        c.update_one(did, &doc("key", "value2"), None).unwrap();
        assert_eq!(c.get_one(did, None).unwrap()["key"], json!("value2"));

        c.delete_one(did, None).unwrap();
        assert!(matches!(
            c.get_one(did, None),
            Err(DocumentError::DocNotFound)
        ));
    }

    #[test]
    fn test_update_missing_doc_is_doc_not_found() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        assert!(matches!(
            c.update_one(12345, &doc("k", "v"), None),
            Err(DocumentError::DocNotFound)
        ));
    }

    #[test]
    fn test_upsert_reports_is_new() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        assert!(c.upsert_one(7, &doc("k", "v"), None).unwrap());
        assert!(!c.upsert_one(7, &doc("k", "v2"), None).unwrap());
        assert_eq!(c.get_one(7, None).unwrap()["k"], json!("v2"));
    }

    #[test]
    fn test_get_many_fails_on_any_miss() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        let a = c.insert_one(&doc("k", "1"), None).unwrap();
        let b = c.insert_one(&doc("k", "2"), None).unwrap();

        let docs = c.get_many(&[a, b], None).unwrap();
        assert_eq!(docs.len(), 2);

        assert!(matches!(
            c.get_many(&[a, 9999], None),
            Err(DocumentError::DocNotFound)
        ));
    }

    #[test]
    fn test_document_ids_increase() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        let a = c.insert_one(&doc("k", "1"), None).unwrap();
        let b = c.insert_one(&doc("k", "2"), None).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_caller_transaction_is_not_committed() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        let engine = db.engine();

        let mut txn = engine.begin(true).unwrap();
        let did = c.insert_one(&doc("k", "v"), Some(txn.as_mut())).unwrap();
        // Visible inside the transaction...
        assert!(c.get_one(did, Some(txn.as_mut())).is_ok());
        txn.discard();

        // ...but discarded along with it.
        assert!(matches!(
            c.get_one(did, None),
            Err(DocumentError::DocNotFound)
        ));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let db = new_db();
        let c = db.collection("c").unwrap();
        db.close();
        assert!(matches!(
            c.insert_one(&doc("k", "v"), None),
            Err(DocumentError::DbClosed)
        ));
        assert!(matches!(c.get_one(1, None), Err(DocumentError::DbClosed)));
    }
}
