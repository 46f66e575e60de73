//! Document-level data plumbing shared by the store and the DDL worker.

use std::time::Duration;

use heron_common::error::{DocumentError, KvError};
use heron_common::shutdown::ShutdownSignal;
use heron_kv::util::run_in_update_txn;
use heron_kv::{KvEngine, KvTxn};

use crate::keys::{document_sequence_keyword, sequence_key};

/// Create the persisted document-id sequence for collection `cid`,
/// initializing its counter to zero. Idempotent.
pub fn create_sequence(engine: &dyn KvEngine, cid: i64) -> Result<(), DocumentError> {
    let key = sequence_key(&document_sequence_keyword(cid));
    run_in_update_txn(engine, |txn| -> Result<(), DocumentError> {
        match txn.get(&key) {
            Ok(_) => Ok(()),
            Err(KvError::KeyNotFound) => {
                txn.set(&key, &0u64.to_be_bytes(), None)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    })
}

/// Drop the persisted document-id sequence for collection `cid`, if present.
pub fn drop_sequence_if_exists(engine: &dyn KvEngine, cid: i64) -> Result<(), DocumentError> {
    let key = sequence_key(&document_sequence_keyword(cid));
    run_in_update_txn(engine, |txn| -> Result<(), DocumentError> {
        txn.delete(&key)?;
        Ok(())
    })
}

/// Keep calling `f` until it reports success, sleeping `interval` between
/// attempts. Bails out early when `signal` requests shutdown.
pub fn try_until_success(signal: &ShutdownSignal, interval: Duration, mut f: impl FnMut() -> bool) {
    loop {
        if f() {
            return;
        }
        if signal.wait_timeout(interval) {
            return;
        }
    }
}
