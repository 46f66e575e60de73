//! KV substrate seam: the provider traits every upper layer is written
//! against, plus the in-process memory provider.

pub mod provider;
pub mod txn;
pub mod util;

pub use txn::{Entry, KvEngine, KvOptions, KvTxn, ScanOptions, VMetaReq, VMetaResp};
