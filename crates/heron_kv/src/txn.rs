//! Provider traits for the ordered KV substrate.
//!
//! The rest of the system only ever sees these traits; the engine behind
//! them is interchangeable. Transactions are interactive: a `KvTxn` stays
//! open across an arbitrary number of operations until exactly one of
//! `commit` or `discard` ends it.

use std::path::PathBuf;
use std::time::Duration;

use heron_common::error::KvError;

pub type KvResult<T> = Result<T, KvError>;

/// Options for opening an engine.
#[derive(Debug, Clone, Default)]
pub struct KvOptions {
    /// Data directory for disk-backed providers. The memory provider
    /// ignores it.
    pub dir: Option<PathBuf>,
}

/// Per-value metadata supplied on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VMetaReq {
    /// Time to live; zero means no expiry.
    pub ttl: Duration,
    /// Opaque user tag stored alongside the value.
    pub tag: u8,
}

/// Per-value metadata returned on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VMetaResp {
    /// Unix seconds at which the value expires; zero means never.
    pub expires_at: u64,
    pub tag: u8,
}

/// One key/value pair with its metadata, as produced by scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub meta: VMetaResp,
}

/// Options for a prefix scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only keys starting with this prefix are visited.
    pub prefix: Vec<u8>,
    /// Resume point within the prefix: ascending scans start at the first
    /// key >= offset, descending scans at the last key <= offset.
    pub offset: Option<Vec<u8>>,
    /// Visit keys in descending order.
    pub reverse: bool,
    /// Skip value materialization; the callback sees an empty value.
    pub key_only: bool,
    /// Stop after this many entries (0 = unlimited).
    pub limit: usize,
}

/// An ordered KV engine supporting interactive transactions.
pub trait KvEngine: Send + Sync {
    /// Open a transaction. `writable = false` yields a read-only snapshot.
    fn begin(&self, writable: bool) -> KvResult<Box<dyn KvTxn>>;

    /// Close the engine. In-flight transactions fail their commits.
    fn close(&self) -> KvResult<()>;
}

/// One interactive transaction.
///
/// Reads observe the transaction's snapshot plus its own writes. Implementors
/// must discard on drop if neither `commit` nor `discard` was called.
pub trait KvTxn: Send {
    fn set(&mut self, key: &[u8], value: &[u8], meta: Option<VMetaReq>) -> KvResult<()>;

    /// `KeyNotFound` on a miss or an expired value.
    fn get(&self, key: &[u8]) -> KvResult<(Vec<u8>, VMetaResp)>;

    fn exists(&self, key: &[u8]) -> KvResult<bool>;

    fn delete(&mut self, key: &[u8]) -> KvResult<()>;

    /// Visit entries matching `opts` in key order. The callback returns
    /// `false` to stop early.
    fn scan(
        &self,
        opts: &ScanOptions,
        f: &mut dyn FnMut(&[u8], &[u8], VMetaResp) -> bool,
    ) -> KvResult<()>;

    /// `Conflict` if a concurrent transaction committed a write to any key
    /// in this transaction's write set after our snapshot.
    fn commit(&mut self) -> KvResult<()>;

    fn discard(&mut self);
}
