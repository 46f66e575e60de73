//! Document layer: MongoDB-flavored databases and collections over the KV
//! substrate, with sequence-minted document ids, a schema meta store, and an
//! asynchronous DDL worker.

pub mod codec;
pub mod collection;
pub mod db;
pub mod ddl;
pub mod dml;
pub mod keys;
pub mod meta;
pub mod model;
pub mod sequence;

pub use codec::Document;
pub use collection::Collection;
pub use db::Db;
pub use ddl::{Ddl, DdlCallback, DdlOptions};
pub use meta::{IdAllocator, JobListKey, Meta};
pub use sequence::Sequence;
