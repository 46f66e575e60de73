//! KV RPC server.
//!
//! Accepts TCP connections and processes framed transactional streams. The
//! per-frame logic is synchronous and network-free (`dispatch`); the async
//! shell only moves bytes and owns the per-connection stream table.

pub mod dispatch;
pub mod server;

pub use dispatch::{dispatch, StreamTable};
pub use server::Server;
