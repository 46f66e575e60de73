//! Structured data types synthesized over the flat KV substrate.
//!
//! `TxStructure` gives one transaction a view of strings, big-endian i64
//! counters, hashes with O(1) length, and double-ended lists, all encoded
//! under a caller-supplied namespace prefix. Nothing here commits: every
//! operation runs inside the borrowed transaction.

mod codec;
mod structure;

pub use codec::{decode_i64, encode_i64};
pub use structure::{HashPair, TxStructure};
