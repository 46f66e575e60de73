//! Wire protocol message types and constants.
//!
//! One transaction is one stream: frames share a stream id, the first frame
//! sets the transaction mode via `FLAG_RW`, and `Commit`/`Discard` (or a
//! one-shot read frame) carry `FLAG_END`. Every request frame is answered by
//! exactly one response frame on the same stream.

use heron_common::error::KvError;

/// Frame header: opcode, flags, stream id (LE u64), payload length (LE u32).
pub const FRAME_HEADER_SIZE: usize = 1 + 1 + 8 + 4;

/// Maximum frame payload size: 16 MiB.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Hard cap on entries returned by one scan, enforced on both peers.
pub const MAX_SCAN_ENTRIES: u32 = 1024;

// ── Opcodes ──────────────────────────────────────────────────────────────

pub const OP_SET: u8 = 1;
pub const OP_EXISTS: u8 = 2;
pub const OP_GET: u8 = 3;
pub const OP_DELETE: u8 = 4;
pub const OP_SCAN: u8 = 5;
pub const OP_COMMIT: u8 = 6;
pub const OP_DISCARD: u8 = 7;

// ── Frame flags ──────────────────────────────────────────────────────────

/// Read-write transaction; meaningful on a stream's first frame.
pub const FLAG_RW: u8 = 0x01;
/// Terminal frame of the stream.
pub const FLAG_END: u8 = 0x02;

// ── Response codes ───────────────────────────────────────────────────────

pub const CODE_OK: u32 = 0;
pub const CODE_KEY_NOT_FOUND: u32 = 1;
pub const CODE_TXN_TOO_BIG: u32 = 2;
pub const CODE_CONFLICT: u32 = 3;
pub const CODE_MUTATE_RO: u32 = 4;
pub const CODE_INTERNAL: u32 = 5;

// ── Messages ─────────────────────────────────────────────────────────────

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub flags: u8,
    pub stream_id: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_end(&self) -> bool {
        self.flags & FLAG_END != 0
    }

    pub fn is_rw(&self) -> bool {
        self.flags & FLAG_RW != 0
    }
}

/// Write-side value metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueMeta {
    pub ttl_ms: u64,
    pub tag: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub meta: Option<ValueMeta>,
}

/// Get/Exists/Delete all carry just the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRequest {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub prefix: Vec<u8>,
    pub offset: Option<Vec<u8>>,
    pub reverse: bool,
    pub key_only: bool,
    pub limit: u32,
}

/// `{code, msg}` carried by every response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub code: u32,
    pub msg: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    pub fn from_kv_error(e: &KvError) -> Self {
        let code = match e {
            KvError::KeyNotFound => CODE_KEY_NOT_FOUND,
            KvError::TxnTooBig => CODE_TXN_TOO_BIG,
            KvError::Conflict => CODE_CONFLICT,
            KvError::MutateForRoTxn => CODE_MUTATE_RO,
            KvError::EngineClosed | KvError::Internal(_) => CODE_INTERNAL,
        };
        Self {
            code,
            msg: e.to_string(),
        }
    }

    /// Map a non-zero code back into the KV taxonomy, when it fits.
    pub fn to_kv_error(&self) -> Option<KvError> {
        match self.code {
            CODE_KEY_NOT_FOUND => Some(KvError::KeyNotFound),
            CODE_TXN_TOO_BIG => Some(KvError::TxnTooBig),
            CODE_CONFLICT => Some(KvError::Conflict),
            CODE_MUTATE_RO => Some(KvError::MutateForRoTxn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    pub status: Status,
    pub value: Vec<u8>,
    pub expires_at: u64,
    pub tag: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistsResponse {
    pub status: Status,
    pub exists: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expires_at: u64,
    pub tag: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResponse {
    pub status: Status,
    pub entries: Vec<WireEntry>,
}
