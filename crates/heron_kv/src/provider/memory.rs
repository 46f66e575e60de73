//! In-memory MVCC provider.
//!
//! An ordered map of per-key version chains. Transactions read from the
//! snapshot taken at begin (plus their own write buffer) and commit with
//! first-committer-wins conflict detection: if any key in the write set
//! gained a committed version after our snapshot, the commit fails with
//! `Conflict`. Committed versions older than the oldest live snapshot are
//! pruned as commits touch their chains.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use heron_common::error::KvError;

use crate::txn::{KvEngine, KvOptions, KvResult, KvTxn, ScanOptions, VMetaReq, VMetaResp};

/// Upper bound on writes buffered by one transaction.
const MAX_TXN_WRITES: usize = 100_000;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: u64,
    tag: u8,
}

impl StoredValue {
    fn expired(&self, now: u64) -> bool {
        self.expires_at > 0 && self.expires_at <= now
    }

    fn meta(&self) -> VMetaResp {
        VMetaResp {
            expires_at: self.expires_at,
            tag: self.tag,
        }
    }
}

/// One committed version of a key. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Version {
    ts: u64,
    value: Option<StoredValue>,
}

struct EngineInner {
    /// Version chains, ascending by commit timestamp within each key.
    chains: RwLock<BTreeMap<Vec<u8>, Vec<Version>>>,
    /// Last assigned commit timestamp.
    commit_ts: AtomicU64,
    /// Live snapshot timestamps with refcounts, for the prune watermark.
    active: Mutex<BTreeMap<u64, usize>>,
    closed: AtomicBool,
}

/// The in-memory engine handle. Cheap to clone.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    pub fn open(_opts: KvOptions) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                chains: RwLock::new(BTreeMap::new()),
                commit_ts: AtomicU64::new(0),
                active: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn new() -> Self {
        Self::open(KvOptions::default())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryEngine {
    fn begin(&self, writable: bool) -> KvResult<Box<dyn KvTxn>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KvError::EngineClosed);
        }
        let read_ts = self.inner.commit_ts.load(Ordering::Acquire);
        *self.inner.active.lock().entry(read_ts).or_insert(0) += 1;
        Ok(Box::new(MemoryTxn {
            inner: self.inner.clone(),
            read_ts,
            writable,
            writes: BTreeMap::new(),
            finished: false,
        }))
    }

    fn close(&self) -> KvResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryTxn {
    inner: Arc<EngineInner>,
    read_ts: u64,
    writable: bool,
    writes: BTreeMap<Vec<u8>, Option<StoredValue>>,
    finished: bool,
}

impl MemoryTxn {
    fn lookup(&self, key: &[u8], now: u64) -> Option<StoredValue> {
        if let Some(buffered) = self.writes.get(key) {
            return buffered.clone().filter(|v| !v.expired(now));
        }
        let chains = self.inner.chains.read();
        visible(chains.get(key), self.read_ts)
            .cloned()
            .filter(|v| !v.expired(now))
    }

    fn release_snapshot(&self) {
        let mut active = self.inner.active.lock();
        if let Some(count) = active.get_mut(&self.read_ts) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.read_ts);
            }
        }
    }

    fn buffer_write(&mut self, key: &[u8], value: Option<StoredValue>) -> KvResult<()> {
        if !self.writable {
            return Err(KvError::MutateForRoTxn);
        }
        if self.finished {
            return Err(KvError::Internal("transaction already finished".into()));
        }
        if self.writes.len() >= MAX_TXN_WRITES && !self.writes.contains_key(key) {
            return Err(KvError::TxnTooBig);
        }
        self.writes.insert(key.to_vec(), value);
        Ok(())
    }
}

impl KvTxn for MemoryTxn {
    fn set(&mut self, key: &[u8], value: &[u8], meta: Option<VMetaReq>) -> KvResult<()> {
        let meta = meta.unwrap_or_default();
        let expires_at = if meta.ttl.is_zero() {
            0
        } else {
            now_unix() + meta.ttl.as_secs().max(1)
        };
        self.buffer_write(
            key,
            Some(StoredValue {
                data: value.to_vec(),
                expires_at,
                tag: meta.tag,
            }),
        )
    }

    fn get(&self, key: &[u8]) -> KvResult<(Vec<u8>, VMetaResp)> {
        match self.lookup(key, now_unix()) {
            Some(v) => {
                let meta = v.meta();
                Ok((v.data, meta))
            }
            None => Err(KvError::KeyNotFound),
        }
    }

    fn exists(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.lookup(key, now_unix()).is_some())
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.buffer_write(key, None)
    }

    fn scan(
        &self,
        opts: &ScanOptions,
        f: &mut dyn FnMut(&[u8], &[u8], VMetaResp) -> bool,
    ) -> KvResult<()> {
        let now = now_unix();
        let range = prefix_range(&opts.prefix);

        // Merge the committed snapshot view with this transaction's buffer.
        let mut view: BTreeMap<Vec<u8>, StoredValue> = BTreeMap::new();
        {
            let chains = self.inner.chains.read();
            for (key, versions) in chains.range::<[u8], _>(bounds(&range)) {
                if let Some(v) = visible(Some(versions), self.read_ts) {
                    if !v.expired(now) {
                        view.insert(key.clone(), v.clone());
                    }
                }
            }
        }
        for (key, buffered) in self.writes.range::<[u8], _>(bounds(&range)) {
            match buffered {
                Some(v) if !v.expired(now) => {
                    view.insert(key.clone(), v.clone());
                }
                _ => {
                    view.remove(key);
                }
            }
        }

        let in_window = |key: &[u8]| match (&opts.offset, opts.reverse) {
            (Some(off), false) => key >= off.as_slice(),
            (Some(off), true) => key <= off.as_slice(),
            (None, _) => true,
        };

        let mut emitted = 0usize;
        let mut emit = |key: &Vec<u8>, v: &StoredValue| -> bool {
            if !in_window(key) {
                return true;
            }
            if opts.limit > 0 && emitted >= opts.limit {
                return false;
            }
            emitted += 1;
            let value: &[u8] = if opts.key_only { &[] } else { &v.data };
            f(key, value, v.meta())
        };

        if opts.reverse {
            for (key, v) in view.iter().rev() {
                if !emit(key, v) {
                    break;
                }
            }
        } else {
            for (key, v) in view.iter() {
                if !emit(key, v) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> KvResult<()> {
        if self.finished {
            return Err(KvError::Internal("transaction already finished".into()));
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            self.finished = true;
            self.release_snapshot();
            return Err(KvError::EngineClosed);
        }
        self.finished = true;
        if self.writes.is_empty() {
            self.release_snapshot();
            return Ok(());
        }

        let mut chains = self.inner.chains.write();

        // First committer wins: any committed version newer than our
        // snapshot on a key we wrote aborts the transaction.
        for key in self.writes.keys() {
            if let Some(versions) = chains.get(key) {
                if let Some(last) = versions.last() {
                    if last.ts > self.read_ts {
                        self.release_snapshot();
                        return Err(KvError::Conflict);
                    }
                }
            }
        }

        let ts = self.inner.commit_ts.load(Ordering::Relaxed) + 1;
        for (key, value) in std::mem::take(&mut self.writes) {
            chains.entry(key).or_default().push(Version {
                ts,
                value,
            });
        }
        self.inner.commit_ts.store(ts, Ordering::Release);

        self.release_snapshot();
        let watermark = self
            .inner
            .active
            .lock()
            .keys()
            .next()
            .copied()
            .unwrap_or(ts);
        prune(&mut chains, watermark);
        Ok(())
    }

    fn discard(&mut self) {
        if !self.finished {
            self.finished = true;
            self.writes.clear();
            self.release_snapshot();
        }
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Latest version visible at `read_ts`, tombstones excluded.
fn visible<'a>(versions: Option<&'a Vec<Version>>, read_ts: u64) -> Option<&'a StoredValue> {
    let versions = versions?;
    versions
        .iter()
        .rev()
        .find(|v| v.ts <= read_ts)
        .and_then(|v| v.value.as_ref())
}

/// Drop versions no live snapshot can observe. A chain reduced to a single
/// tombstone below the watermark disappears entirely.
fn prune(chains: &mut BTreeMap<Vec<u8>, Vec<Version>>, watermark: u64) {
    chains.retain(|_, versions| {
        if let Some(keep_from) = versions.iter().rposition(|v| v.ts <= watermark) {
            versions.drain(..keep_from);
        }
        !(versions.len() == 1 && versions[0].value.is_none() && versions[0].ts <= watermark)
    });
}

fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    (prefix.to_vec(), prefix_successor(prefix))
}

/// Smallest key greater than every key with the given prefix, if one exists.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

fn bounds(range: &(Vec<u8>, Option<Vec<u8>>)) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = Bound::Included(range.0.as_slice());
    let end = match &range.1 {
        Some(e) => Bound::Excluded(e.as_slice()),
        None => Bound::Unbounded,
    };
    (start, end)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
