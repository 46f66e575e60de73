//! Client for the KV RPC protocol.
//!
//! A `Client` owns one TCP connection; a reader task demultiplexes response
//! frames by stream id, so any number of transactions can share the
//! connection. One-shot verbs open a short-lived stream per call;
//! `update`/`view` hand the caller an interactive `Txn`.

mod client;
mod txn;

pub use client::Client;
pub use txn::Txn;
