//! Small transaction-running helpers shared by the upper layers.

use heron_common::error::KvError;

use crate::txn::{KvEngine, KvTxn};

/// Run `f` inside a fresh read-write transaction and commit it. The
/// transaction is discarded if `f` fails.
pub fn run_in_update_txn<T, E>(
    engine: &dyn KvEngine,
    f: impl FnOnce(&mut dyn KvTxn) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<KvError>,
{
    let mut txn = engine.begin(true)?;
    match f(txn.as_mut()) {
        Ok(v) => {
            txn.commit()?;
            Ok(v)
        }
        Err(e) => {
            txn.discard();
            Err(e)
        }
    }
}

/// Run `f` inside a fresh read-only transaction, discarding it afterwards.
pub fn run_in_view_txn<T, E>(
    engine: &dyn KvEngine,
    f: impl FnOnce(&mut dyn KvTxn) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<KvError>,
{
    let mut txn = engine.begin(false)?;
    let result = f(txn.as_mut());
    txn.discard();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryEngine;

    #[test]
    fn test_update_txn_commits_on_ok() {
        let e = MemoryEngine::new();
        run_in_update_txn::<_, KvError>(&e, |txn| txn.set(b"k", b"v", None)).unwrap();
        let txn = e.begin(false).unwrap();
        assert_eq!(txn.get(b"k").unwrap().0, b"v");
    }

    #[test]
    fn test_update_txn_discards_on_err() {
        let e = MemoryEngine::new();
        let r = run_in_update_txn::<(), KvError>(&e, |txn| {
            txn.set(b"k", b"v", None)?;
            Err(KvError::Internal("boom".into()))
        });
        assert!(r.is_err());
        let txn = e.begin(false).unwrap();
        assert_eq!(txn.get(b"k"), Err(KvError::KeyNotFound));
    }

    #[test]
    fn test_view_txn_reads() {
        let e = MemoryEngine::new();
        run_in_update_txn::<_, KvError>(&e, |txn| txn.set(b"k", b"v", None)).unwrap();
        let v = run_in_view_txn::<_, KvError>(&e, |txn| txn.get(b"k").map(|(v, _)| v)).unwrap();
        assert_eq!(v, b"v");
    }
}
