use thiserror::Error;

/// Convenience alias for `Result<T, HeronError>`.
pub type HeronResult<T> = Result<T, HeronError>;

/// Error classification for retry decisions.
///
/// - `UserError`   — bad input or a miss the caller asked about (4xx equivalent)
/// - `Retryable`   — commit lost to a concurrent writer; caller SHOULD retry
/// - `Transient`   — network/IO trouble; caller MAY retry after back-off
/// - `InternalBug` — should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum HeronError {
    #[error("KV error: {0}")]
    Kv(#[from] KvError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// KV substrate errors, as surfaced through the provider traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("key not found")]
    KeyNotFound,

    #[error("transaction too big, split it")]
    TxnTooBig,

    #[error("commit conflict with a concurrent transaction")]
    Conflict,

    #[error("mutation on a read-only transaction")]
    MutateForRoTxn,

    #[error("engine closed")]
    EngineClosed,

    #[error("internal KV error: {0}")]
    Internal(String),
}

/// Structured-encoding layer errors.
#[derive(Error, Debug)]
pub enum StructureError {
    #[error("KV error: {0}")]
    Kv(#[from] KvError),

    #[error("invalid {what} encoding")]
    InvalidValue { what: &'static str },

    #[error("list index {index} out of range [{head}, {tail})")]
    ListIndexOutOfRange { index: i64, head: i64, tail: i64 },
}

/// Document store and DDL errors.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document not found")]
    DocNotFound,

    #[error("db not exists")]
    DbNotExists,

    #[error("db exists")]
    DbExists,

    #[error("collection not exists")]
    CollectionNotExists,

    #[error("collection exists")]
    CollectionExists,

    #[error("db already exists: {0}")]
    DbAlreadyExists(String),

    #[error("db closed")]
    DbClosed,

    #[error("db closing, operation rejected")]
    DbClosing,

    #[error("empty keyword for sequence")]
    EmptyKeyword,

    #[error("zero bandwidth for sequence")]
    ZeroBandwidth,

    #[error("invalid ddl job kind: {0}")]
    InvalidJobKind(u8),

    #[error("ddl job cancelled: {0}")]
    JobCancelled(String),

    #[error("operation canceled")]
    Canceled,

    #[error("document codec error: {0}")]
    Codec(String),

    #[error("KV error: {0}")]
    Kv(#[from] KvError),

    #[error("structure error: {0}")]
    Structure(#[from] StructureError),
}

/// Wire protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("truncated frame: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid utf-8 in field {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-side errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("KV error: {0}")]
    Kv(#[from] KvError),

    #[error("peer closed the connection mid-transaction")]
    NetworkClosed,

    #[error("remote error (code {code}): {msg}")]
    Remote { code: u32, msg: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this error is the KV-level "key not found" miss.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, ClientError::Kv(KvError::KeyNotFound))
    }
}

impl HeronError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeronError::Kv(e) => kv_kind(e),
            HeronError::Structure(StructureError::Kv(e)) => kv_kind(e),
            HeronError::Structure(_) => ErrorKind::InternalBug,
            HeronError::Document(e) => match e {
                DocumentError::Kv(k) => kv_kind(k),
                DocumentError::Structure(StructureError::Kv(k)) => kv_kind(k),
                DocumentError::DocNotFound
                | DocumentError::DbNotExists
                | DocumentError::DbExists
                | DocumentError::CollectionNotExists
                | DocumentError::CollectionExists
                | DocumentError::DbAlreadyExists(_)
                | DocumentError::EmptyKeyword
                | DocumentError::ZeroBandwidth => ErrorKind::UserError,
                DocumentError::DbClosed
                | DocumentError::DbClosing
                | DocumentError::Canceled
                | DocumentError::JobCancelled(_) => ErrorKind::Transient,
                _ => ErrorKind::InternalBug,
            },
            HeronError::Protocol(ProtocolError::Io(_)) => ErrorKind::Transient,
            HeronError::Protocol(_) => ErrorKind::InternalBug,
            HeronError::Client(e) => match e {
                ClientError::Kv(k) => kv_kind(k),
                ClientError::NetworkClosed | ClientError::Io(_) => ErrorKind::Transient,
                ClientError::Protocol(_) | ClientError::Remote { .. } => ErrorKind::InternalBug,
            },
            HeronError::Internal(_) => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the caller should retry the whole transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }
}

fn kv_kind(e: &KvError) -> ErrorKind {
    match e {
        KvError::Conflict => ErrorKind::Retryable,
        KvError::KeyNotFound | KvError::TxnTooBig | KvError::MutateForRoTxn => ErrorKind::UserError,
        KvError::EngineClosed => ErrorKind::Transient,
        KvError::Internal(_) => ErrorKind::InternalBug,
    }
}
